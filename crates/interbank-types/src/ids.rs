//! Identifiers shared by every bank in the federation.
//!
//! Banks are addressed by a [`RoutingNumber`]. Anything that must be
//! referenced across banks (transactions, foreign account holders, options)
//! is a [`ForeignBankId`]: the issuing bank's routing number plus an opaque,
//! locally-generated string. Locally generated IDs use UUIDv7 so they sort
//! by creation time without any coordination.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RoutingNumber
// ---------------------------------------------------------------------------

/// Integer identifying a bank in the federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingNumber(pub u32);

impl fmt::Display for RoutingNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

// ---------------------------------------------------------------------------
// AccountNumber
// ---------------------------------------------------------------------------

/// Globally unique account number. The first three digits encode the
/// routing number of the bank holding the account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(pub String);

impl AccountNumber {
    #[must_use]
    pub fn new(number: impl Into<String>) -> Self {
        Self(number.into())
    }

    /// Routing number encoded in the account number prefix, or `None` when
    /// the prefix is not three ASCII digits.
    #[must_use]
    pub fn routing_number(&self) -> Option<RoutingNumber> {
        let prefix = self.0.get(..3)?;
        if !prefix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        prefix.parse().ok().map(RoutingNumber)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ForeignBankId
// ---------------------------------------------------------------------------

/// A reference to an entity owned by some bank: transaction IDs, foreign
/// account holders and option negotiations all use this shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForeignBankId {
    pub routing_number: RoutingNumber,
    pub id: String,
}

impl ForeignBankId {
    #[must_use]
    pub fn new(routing_number: RoutingNumber, id: impl Into<String>) -> Self {
        Self {
            routing_number,
            id: id.into(),
        }
    }

    /// Fresh ID issued by the bank with `routing_number`.
    #[must_use]
    pub fn generate(routing_number: RoutingNumber) -> Self {
        Self::new(routing_number, Uuid::now_v7().to_string())
    }
}

impl fmt::Display for ForeignBankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.routing_number, self.id)
    }
}

// ---------------------------------------------------------------------------
// IdempotenceKey
// ---------------------------------------------------------------------------

/// Deduplication token for one protocol message. Scoped to the issuing bank;
/// a correct issuer never reuses one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotenceKey {
    pub routing_number: RoutingNumber,
    pub locally_generated_key: String,
}

impl IdempotenceKey {
    #[must_use]
    pub fn new(routing_number: RoutingNumber, key: impl Into<String>) -> Self {
        Self {
            routing_number,
            locally_generated_key: key.into(),
        }
    }

    #[must_use]
    pub fn generate(routing_number: RoutingNumber) -> Self {
        Self::new(routing_number, Uuid::now_v7().to_string())
    }
}

impl fmt::Display for IdempotenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.routing_number, self.locally_generated_key)
    }
}
