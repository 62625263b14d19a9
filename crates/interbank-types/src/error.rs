//! Error types for the interbank ledger.
//!
//! All errors use the `IB_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Validation errors (rejected before any mutation)
//! - 2xx: Voting outcomes
//! - 3xx: Storage errors
//! - 4xx: Message preparation errors
//! - 5xx: Unsupported / not yet implemented paths
//! - 6xx: Protocol and network errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{ForeignBankId, IdempotenceKey, NoVoteReason, Posting, RoutingNumber, Transaction, TxStatus};

/// Central error enum for all interbank operations.
#[derive(Debug, Error)]
pub enum InterbankError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// A posting names a bank that is neither us nor a configured peer.
    #[error("IB_ERR_100: Unknown destination bank: {0}")]
    UnknownDestination(RoutingNumber),

    /// A posting's account number carries no routing prefix.
    #[error("IB_ERR_101: Invalid account number in posting: {0:?}")]
    InvalidAccountNumber(Box<Posting>),

    /// The transaction does not touch this bank at all.
    #[error("IB_ERR_102: Transaction does not involve bank {0}")]
    NotInvolved(RoutingNumber),

    /// An immediate transaction touched a peer bank.
    #[error("IB_ERR_103: Immediate transaction must be local to bank {ours}, got {destinations:?}")]
    NotLocalOnly {
        ours: RoutingNumber,
        destinations: Vec<RoutingNumber>,
    },

    /// An inbound transaction arrived without the initiator's ID.
    #[error("IB_ERR_104: Inbound transaction is missing its ID")]
    MissingTransactionId,

    // =================================================================
    // Voting (2xx)
    // =================================================================
    /// Local phase 1 rejected the transaction. A business outcome, not a
    /// system fault: the enclosing unit was rolled back.
    #[error("IB_ERR_200: Local part voted NO: {reasons:?}")]
    LocalPartVotedNo {
        transaction: Box<Transaction>,
        reasons: Vec<NoVoteReason>,
    },

    // =================================================================
    // Storage Errors (3xx)
    // =================================================================
    /// No transaction log entry for this ID.
    #[error("IB_ERR_300: No such transaction: {0}")]
    NoSuchTransaction(ForeignBankId),

    /// No outbox entry for this key.
    #[error("IB_ERR_301: No such outbox message: {0}")]
    NoSuchOutboxMessage(IdempotenceKey),

    /// The unit of work was marked rollback-only.
    #[error("IB_ERR_302: Unit of work is marked rollback-only")]
    RollbackOnly,

    /// The journal could not be read or written.
    #[error("IB_ERR_303: Journal error: {0}")]
    Journal(String),

    /// A status change the transaction state machine forbids.
    #[error("IB_ERR_304: Transaction {transaction_id} cannot move from {from} to {to}")]
    InvalidTransition {
        transaction_id: ForeignBankId,
        from: TxStatus,
        to: TxStatus,
    },

    /// An account with this number already exists.
    #[error("IB_ERR_305: Account already exists: {0}")]
    DuplicateAccount(String),

    /// Another unit held an account row lock for too long.
    #[error("IB_ERR_306: Timed out waiting for row lock on account {0}")]
    LockTimeout(String),

    // =================================================================
    // Message Preparation (4xx)
    // =================================================================
    /// A transaction or message body could not be encoded or decoded.
    #[error("IB_ERR_400: Message preparation failed: {0}")]
    MessagePrepFailed(String),

    // =================================================================
    // Unsupported (5xx)
    // =================================================================
    /// A code path that has not been implemented yet. Never a vote reason.
    #[error("IB_ERR_500: Not implemented: {0}")]
    Unsupported(String),

    // =================================================================
    // Protocol / Network (6xx)
    // =================================================================
    /// No routing table entry for this bank.
    #[error("IB_ERR_600: Unknown peer bank: {0}")]
    UnknownPeer(RoutingNumber),

    /// Inbound request without a recognised API key, or from a bank other
    /// than the one that issued the idempotence key.
    #[error("IB_ERR_601: Unauthenticated: {0}")]
    Unauthenticated(String),

    /// A peer answered in a way the protocol does not allow.
    #[error("IB_ERR_602: Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Sending a message to a peer failed. Retried by the outbox relay.
    #[error("IB_ERR_603: Delivery to {destination} failed: {reason}")]
    Delivery {
        destination: RoutingNumber,
        reason: String,
    },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("IB_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("IB_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("IB_ERR_903: I/O error: {0}")]
    Io(String),
}

impl InterbankError {
    /// Whether this is a business NO vote rather than a fault.
    #[must_use]
    pub fn is_vote_no(&self) -> bool {
        matches!(self, Self::LocalPartVotedNo { .. })
    }

    /// Whether the request was rejected before touching any state.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::UnknownDestination(_)
                | Self::InvalidAccountNumber(_)
                | Self::NotInvolved(_)
                | Self::NotLocalOnly { .. }
                | Self::MissingTransactionId
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, InterbankError>;

impl From<std::io::Error> for InterbankError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Encoding failures. Bodies read back from storage map to `Internal`
/// at the call site instead.
impl From<serde_json::Error> for InterbankError {
    fn from(err: serde_json::Error) -> Self {
        Self::MessagePrepFailed(err.to_string())
    }
}
