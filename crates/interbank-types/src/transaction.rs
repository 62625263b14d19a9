//! The wire transaction model: postings against account-like entities.
//!
//! A [`Transaction`] is an ordered list of [`Posting`]s. A negative amount
//! credits the posting's holder (value leaves the account); a positive amount
//! debits it (value arrives). For every asset that appears in a transaction
//! the amounts must sum to exactly zero.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountNumber, ForeignBankId, RoutingNumber};

// ---------------------------------------------------------------------------
// TxAccount
// ---------------------------------------------------------------------------

/// The entity a posting is applied to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxAccount {
    /// A person held at some bank, referenced by that bank's ID.
    Person { id: ForeignBankId },
    /// A plain account, located by its number.
    Account { num: AccountNumber },
    /// An option contract negotiated at some bank.
    Option { id: ForeignBankId },
    /// Bank-local sink/source used to create or destroy value.
    #[serde(rename_all = "camelCase")]
    MemoryHole { routing_number: RoutingNumber },
}

impl TxAccount {
    /// Routing number of the bank responsible for this entity.
    ///
    /// `None` only for an [`TxAccount::Account`] whose number has no valid
    /// routing prefix.
    #[must_use]
    pub fn routing_number(&self) -> Option<RoutingNumber> {
        match self {
            Self::Person { id } | Self::Option { id } => Some(id.routing_number),
            Self::Account { num } => num.routing_number(),
            Self::MemoryHole { routing_number } => Some(*routing_number),
        }
    }
}

// ---------------------------------------------------------------------------
// TxAsset
// ---------------------------------------------------------------------------

/// A monetary price attached to an option contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonetaryValue {
    pub currency: String,
    pub amount: Decimal,
}

/// Terms of an option contract moved as an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionDescription {
    pub negotiation_id: ForeignBankId,
    pub stock: String,
    pub price_per_unit: MonetaryValue,
    pub settlement_date: DateTime<Utc>,
    pub amount: u64,
}

/// What is being moved by a posting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxAsset {
    Monetary { currency: String },
    Stock { ticker: String },
    Option(OptionDescription),
}

impl TxAsset {
    #[must_use]
    pub fn monetary(currency: impl Into<String>) -> Self {
        Self::Monetary {
            currency: currency.into(),
        }
    }

    /// Currency code when this is a monetary asset.
    #[must_use]
    pub fn currency(&self) -> Option<&str> {
        match self {
            Self::Monetary { currency } => Some(currency),
            Self::Stock { .. } | Self::Option(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Posting
// ---------------------------------------------------------------------------

/// One signed amount of one asset against one account-like entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Posting {
    pub account: TxAccount,
    pub amount: Decimal,
    pub asset: TxAsset,
}

impl Posting {
    #[must_use]
    pub fn new(account: TxAccount, amount: Decimal, asset: TxAsset) -> Self {
        Self {
            account,
            amount,
            asset,
        }
    }
}

/// Fixture constructors for tests.
#[cfg(any(test, feature = "test-helpers"))]
impl Posting {
    /// Monetary posting against a plain account.
    pub fn monetary(account: &str, amount: Decimal, currency: &str) -> Self {
        Self::new(
            TxAccount::Account {
                num: AccountNumber::new(account),
            },
            amount,
            TxAsset::monetary(currency),
        )
    }

    /// Monetary posting against a bank's memory hole.
    pub fn memory_hole(routing_number: RoutingNumber, amount: Decimal, currency: &str) -> Self {
        Self::new(
            TxAccount::MemoryHole { routing_number },
            amount,
            TxAsset::monetary(currency),
        )
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A multi-party transaction as exchanged between banks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub postings: Vec<Posting>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<ForeignBankId>,
}

impl Transaction {
    #[must_use]
    pub fn new(postings: Vec<Posting>, message: impl Into<String>) -> Self {
        Self {
            postings,
            message: message.into(),
            transaction_id: None,
        }
    }

    /// Whether every asset's postings sum to exactly zero.
    ///
    /// Decimal comparison is by value, so `5` and `5.000` are equal.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        let mut sums: Vec<(&TxAsset, Decimal)> = Vec::new();
        for posting in &self.postings {
            match sums.iter_mut().find(|(asset, _)| **asset == posting.asset) {
                Some((_, sum)) => *sum += posting.amount,
                None => sums.push((&posting.asset, posting.amount)),
            }
        }
        sums.iter().all(|(_, sum)| sum.is_zero())
    }

    /// Routing numbers of every bank touched by a posting, or the first
    /// posting whose routing number cannot be determined.
    pub fn destinations(&self) -> std::result::Result<BTreeSet<RoutingNumber>, &Posting> {
        self.postings
            .iter()
            .map(|p| p.account.routing_number().ok_or(p))
            .collect()
    }

    /// Postings handled by the bank with `routing_number`.
    pub fn local_postings(&self, routing_number: RoutingNumber) -> impl Iterator<Item = &Posting> {
        self.postings
            .iter()
            .filter(move |p| p.account.routing_number() == Some(routing_number))
    }
}
