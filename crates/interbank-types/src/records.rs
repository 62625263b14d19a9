//! Durable protocol records: the transaction log, outbox and inbox rows.
//!
//! ## Transaction status
//!
//! ```text
//!   ┌───────────────┐  all YES   ┌───────────┐
//!   │ AWAITING_VOTES├───────────▶│ COMMITTED │
//!   └──────┬────────┘            └───────────┘
//!          │ NO / timeout / rollback
//!          ▼
//!   ┌─────────────┐
//!   │ ROLLED_BACK │
//!   └─────────────┘
//! ```
//!
//! Single-bank transactions are written directly as `COMMITTED`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ForeignBankId, IdempotenceKey, InterbankError, Result, RoutingNumber};

/// Lifecycle status of a transaction this bank voted YES on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    AwaitingVotes,
    Committed,
    RolledBack,
}

impl TxStatus {
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::AwaitingVotes, Self::Committed | Self::RolledBack)
        )
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::AwaitingVotes)
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AwaitingVotes => write!(f, "AWAITING_VOTES"),
            Self::Committed => write!(f, "COMMITTED"),
            Self::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// Which side of the protocol this bank plays for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxRole {
    /// We submitted the transaction and collect the votes.
    Initiator,
    /// We voted on a transaction initiated elsewhere.
    #[serde(rename_all = "camelCase")]
    Participant { initiator: RoutingNumber },
}

/// A transaction this bank voted YES on, or one it was told to roll back
/// before it ever voted. Survives restarts; it is the recovery log for
/// everything that happened after phase 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutingTransaction {
    pub transaction_id: ForeignBankId,
    /// JSON-encoded [`crate::Transaction`].
    pub tx_body: String,
    pub votes_cast: u32,
    /// Number of distinct banks involved, including us.
    pub votes_needed: u32,
    pub votes_are_yes: bool,
    pub role: TxRole,
    pub status: TxStatus,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl ExecutingTransaction {
    /// Record created right after a successful local phase 1: our own
    /// YES is the first vote.
    #[must_use]
    pub fn prepared(
        transaction_id: ForeignBankId,
        tx_body: String,
        votes_needed: u32,
        role: TxRole,
    ) -> Self {
        Self {
            transaction_id,
            tx_body,
            votes_cast: 1,
            votes_needed,
            votes_are_yes: true,
            role,
            status: TxStatus::AwaitingVotes,
            created_at: Utc::now(),
            finalized_at: None,
        }
    }

    /// Rollback received for a transaction we never voted on. Nothing was
    /// reserved; the record only makes a late `NEW_TX` for it vote NO.
    #[must_use]
    pub fn rolled_back_unseen(transaction_id: ForeignBankId, initiator: RoutingNumber) -> Self {
        let now = Utc::now();
        Self {
            transaction_id,
            tx_body: String::new(),
            votes_cast: 0,
            votes_needed: 0,
            votes_are_yes: false,
            role: TxRole::Participant { initiator },
            status: TxStatus::RolledBack,
            created_at: now,
            finalized_at: Some(now),
        }
    }

    /// Count one remote vote.
    pub fn record_vote(&mut self, yes: bool) {
        self.votes_cast += 1;
        self.votes_are_yes &= yes;
    }

    /// Every bank voted and all of them said YES.
    #[must_use]
    pub fn all_votes_yes(&self) -> bool {
        self.votes_are_yes && self.votes_cast >= self.votes_needed
    }

    #[must_use]
    pub fn is_initiator(&self) -> bool {
        self.role == TxRole::Initiator
    }

    /// Move to a final status.
    ///
    /// # Errors
    /// Returns `InvalidTransition` if the record is already final.
    pub fn finalize(&mut self, status: TxStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(InterbankError::InvalidTransition {
                transaction_id: self.transaction_id.clone(),
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.finalized_at = Some(Utc::now());
        Ok(())
    }
}

/// An outbound message waiting to be (or already) delivered to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxMessage {
    pub idempotence_key: IdempotenceKey,
    pub destination: RoutingNumber,
    /// JSON-encoded [`crate::Message`].
    pub body: String,
    pub delivered: bool,
    /// `None` until the first send attempt.
    pub last_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    #[must_use]
    pub fn new(idempotence_key: IdempotenceKey, destination: RoutingNumber, body: String) -> Self {
        Self {
            idempotence_key,
            destination,
            body,
            delivered: false,
            last_sent_at: None,
            created_at: Utc::now(),
        }
    }

    /// Undelivered and not sent since `cutoff`.
    #[must_use]
    pub fn is_due(&self, cutoff: DateTime<Utc>) -> bool {
        !self.delivered && self.last_sent_at.is_none_or(|sent| sent < cutoff)
    }
}

/// A processed inbound message and the response we gave, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxMessage {
    pub idempotence_key: IdempotenceKey,
    /// JSON-encoded response body (a vote for `NEW_TX`, empty otherwise).
    pub response: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboxMessage {
    #[must_use]
    pub fn new(idempotence_key: IdempotenceKey, response: Option<String>) -> Self {
        Self {
            idempotence_key,
            response,
            received_at: Utc::now(),
        }
    }
}
