//! Balance store: account rows and their locked read-modify-write.
//!
//! Writers must hold the row lock ([`UnitOfWork::lock_account`]) before
//! [`UnitOfWork::save_account`]; saving an unlocked row is refused.

use interbank_types::{Account, AccountNumber, InterbankError, Result};
use tracing::trace;

use crate::{UnitOfWork, unit::read_through};

impl UnitOfWork<'_> {
    /// Open a new account.
    ///
    /// # Errors
    /// `DuplicateAccount` if the number is taken.
    pub fn insert_account(&mut self, account: Account) -> Result<()> {
        self.ensure_writable()?;
        if self.account(&account.number)?.is_some() {
            return Err(InterbankError::DuplicateAccount(account.number.0));
        }
        self.staged
            .accounts
            .insert(account.number.clone(), account);
        Ok(())
    }

    /// Read an account without locking it.
    pub fn account(&self, number: &AccountNumber) -> Result<Option<Account>> {
        let tables = self.db.tables()?;
        Ok(read_through(&self.staged.accounts, &tables.accounts, number))
    }

    /// Take the exclusive row lock on `number` (blocking while another unit
    /// holds it) and return a fresh read. `None` if no such account exists.
    pub fn lock_account(&mut self, number: &AccountNumber) -> Result<Option<Account>> {
        if self.account(number)?.is_none() {
            return Ok(None);
        }
        self.db.locks.acquire(number, self.id())?;
        if !self.held.contains(number) {
            self.held.push(number.clone());
        }
        trace!(unit = %self.id(), account = %number, "Row locked");
        // Re-read: the row may have changed while we waited.
        self.account(number)
    }

    /// Stage an updated account row. The row must be locked by this unit.
    pub fn save_account(&mut self, account: Account) -> Result<()> {
        self.ensure_writable()?;
        if !self.held.contains(&account.number) {
            return Err(InterbankError::Internal(format!(
                "account {} saved without holding its row lock",
                account.number
            )));
        }
        self.staged
            .accounts
            .insert(account.number.clone(), account);
        Ok(())
    }

    /// Whether this unit holds the row lock on `number`.
    #[must_use]
    pub fn holds_lock(&self, number: &AccountNumber) -> bool {
        self.held.contains(number)
    }
}
