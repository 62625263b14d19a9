//! Local account balances.
//!
//! Every account has a settled `balance` and an `available_balance`: the
//! balance minus whatever in-flight (prepared but not committed) postings
//! have reserved.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::AccountNumber;

/// An account held at this bank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub number: AccountNumber,
    /// ISO currency code the account is denominated in.
    pub currency: String,
    /// Settled total.
    pub balance: Decimal,
    /// Portion of `balance` not reserved by a prepared posting.
    pub available_balance: Decimal,
}

impl Account {
    /// Create an account with equal balance and available balance.
    #[must_use]
    pub fn new(number: AccountNumber, currency: impl Into<String>, balance: Decimal) -> Self {
        Self {
            number,
            currency: currency.into(),
            balance,
            available_balance: balance,
        }
    }

    /// Amount currently held back by prepared postings.
    #[must_use]
    pub fn reserved(&self) -> Decimal {
        self.balance - self.available_balance
    }
}

/// Fixture constructors for tests.
#[cfg(any(test, feature = "test-helpers"))]
impl Account {
    pub fn fixture(number: &str, currency: &str, balance: i64) -> Self {
        Self::new(AccountNumber::new(number), currency, Decimal::new(balance, 0))
    }
}
