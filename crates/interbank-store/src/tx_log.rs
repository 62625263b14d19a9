//! Durable transaction log: every transaction this bank voted YES on.

use chrono::{DateTime, Utc};
use interbank_types::{ExecutingTransaction, ForeignBankId, InterbankError, Result, TxStatus};

use crate::{
    UnitOfWork,
    unit::{read_through, scan},
};

impl UnitOfWork<'_> {
    /// Record a freshly prepared transaction.
    ///
    /// # Errors
    /// `Internal` if a record with the same ID already exists.
    pub fn record_executing(&mut self, tx: ExecutingTransaction) -> Result<()> {
        self.ensure_writable()?;
        if self.executing(&tx.transaction_id)?.is_some() {
            return Err(InterbankError::Internal(format!(
                "transaction {} already recorded",
                tx.transaction_id
            )));
        }
        self.staged
            .executing
            .insert(tx.transaction_id.clone(), tx);
        Ok(())
    }

    pub fn executing(&self, id: &ForeignBankId) -> Result<Option<ExecutingTransaction>> {
        let tables = self.db.tables()?;
        Ok(read_through(&self.staged.executing, &tables.executing, id))
    }

    /// Stage an updated record.
    ///
    /// # Errors
    /// `NoSuchTransaction` if it was never recorded.
    pub fn save_executing(&mut self, tx: ExecutingTransaction) -> Result<()> {
        self.ensure_writable()?;
        if self.executing(&tx.transaction_id)?.is_none() {
            return Err(InterbankError::NoSuchTransaction(tx.transaction_id));
        }
        self.staged
            .executing
            .insert(tx.transaction_id.clone(), tx);
        Ok(())
    }

    /// Transactions we initiated that are still waiting for votes and were
    /// created before `cutoff`.
    pub fn pending_initiated(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExecutingTransaction>> {
        let tables = self.db.tables()?;
        Ok(scan(&self.staged.executing, &tables.executing, |tx| {
            tx.is_initiator() && tx.status == TxStatus::AwaitingVotes && tx.created_at < cutoff
        }))
    }
}
