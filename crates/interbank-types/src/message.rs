//! Protocol messages exchanged between banks.
//!
//! Every message is wrapped in an envelope carrying the sender's
//! [`IdempotenceKey`]. The receiving bank uses the key to recognise
//! redeliveries and replay the response it already gave.
//!
//! ```text
//!   IB                         peer
//!   ── NEW_TX ───────────────▶  phase 1, vote
//!   ◀─────────────── YES / NO ─
//!   ── COMMIT_TX / ROLLBACK_TX ▶ phase 2 / release
//!   ◀──────────────────── 204 ─
//! ```

use serde::{Deserialize, Serialize};

use crate::{ForeignBankId, IdempotenceKey, Posting, Transaction};

/// Envelope around a protocol payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub idempotence_key: IdempotenceKey,
    pub message: T,
}

/// Payload of a `COMMIT_TX` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitTransaction {
    pub transaction_id: ForeignBankId,
}

/// Payload of a `ROLLBACK_TX` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackTransaction {
    pub transaction_id: ForeignBankId,
}

/// The wire envelope, tagged on `messageType`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    NewTx(Envelope<Transaction>),
    CommitTx(Envelope<CommitTransaction>),
    RollbackTx(Envelope<RollbackTransaction>),
}

impl Message {
    #[must_use]
    pub fn idempotence_key(&self) -> &IdempotenceKey {
        match self {
            Self::NewTx(e) => &e.idempotence_key,
            Self::CommitTx(e) => &e.idempotence_key,
            Self::RollbackTx(e) => &e.idempotence_key,
        }
    }

    /// The transaction this message is about, if it carries one.
    #[must_use]
    pub fn transaction_id(&self) -> Option<&ForeignBankId> {
        match self {
            Self::NewTx(e) => e.message.transaction_id.as_ref(),
            Self::CommitTx(e) => Some(&e.message.transaction_id),
            Self::RollbackTx(e) => Some(&e.message.transaction_id),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewTx(_) => "NEW_TX",
            Self::CommitTx(_) => "COMMIT_TX",
            Self::RollbackTx(_) => "ROLLBACK_TX",
        }
    }
}

/// Why a bank voted NO on a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoVoteReason {
    UnbalancedTx,
    NoSuchAccount { posting: Posting },
    NoSuchAsset { posting: Posting },
    InsufficientAsset { posting: Posting },
    OptionAmountIncorrect { posting: Posting },
    OptionUsedOrExpired { posting: Posting },
    UnacceptableAsset { posting: Posting },
}

impl NoVoteReason {
    /// The posting that caused the rejection, if the reason names one.
    #[must_use]
    pub fn posting(&self) -> Option<&Posting> {
        match self {
            Self::UnbalancedTx => None,
            Self::NoSuchAccount { posting }
            | Self::NoSuchAsset { posting }
            | Self::InsufficientAsset { posting }
            | Self::OptionAmountIncorrect { posting }
            | Self::OptionUsedOrExpired { posting }
            | Self::UnacceptableAsset { posting } => Some(posting),
        }
    }
}

/// A bank's answer to `NEW_TX`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "vote", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteResponse {
    Yes,
    No { reasons: Vec<NoVoteReason> },
}

impl VoteResponse {
    /// YES for an empty reason list, NO otherwise.
    #[must_use]
    pub fn from_reasons(reasons: Vec<NoVoteReason>) -> Self {
        if reasons.is_empty() {
            Self::Yes
        } else {
            Self::No { reasons }
        }
    }

    #[must_use]
    pub fn is_yes(&self) -> bool {
        matches!(self, Self::Yes)
    }
}
