//! The atomic unit of work.

use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::Ordering,
};

use interbank_types::{
    Account, AccountNumber, ExecutingTransaction, ForeignBankId, IdempotenceKey, InboxMessage,
    InterbankError, OutboxMessage, Result,
};
use tracing::trace;

use crate::Database;

/// Identifies one unit of work (the owner of row locks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit:{}", self.0)
    }
}

/// Writes buffered by a unit until commit.
#[derive(Debug, Default)]
pub(crate) struct Staged {
    pub(crate) accounts: BTreeMap<AccountNumber, Account>,
    pub(crate) executing: BTreeMap<ForeignBankId, ExecutingTransaction>,
    pub(crate) outbox: BTreeMap<IdempotenceKey, OutboxMessage>,
    pub(crate) inbox: BTreeMap<IdempotenceKey, InboxMessage>,
}

impl Staged {
    pub(crate) fn len(&self) -> usize {
        self.accounts.len() + self.executing.len() + self.outbox.len() + self.inbox.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An open atomic unit.
///
/// Reads see the unit's own staged writes first, then committed state.
/// Nothing the unit writes is visible to anyone else until
/// [`commit`](Self::commit). Row locks taken through
/// [`lock_account`](Self::lock_account) are held until the unit ends.
pub struct UnitOfWork<'db> {
    pub(crate) db: &'db Database,
    id: UnitId,
    pub(crate) staged: Staged,
    pub(crate) held: Vec<AccountNumber>,
    rollback_only: bool,
}

impl<'db> UnitOfWork<'db> {
    pub(crate) fn new(db: &'db Database) -> Self {
        let id = UnitId(db.next_unit.fetch_add(1, Ordering::Relaxed));
        trace!(unit = %id, "Unit of work opened");
        Self {
            db,
            id,
            staged: Staged::default(),
            held: Vec::new(),
            rollback_only: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Mark the unit so it can only end in a rollback.
    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    #[must_use]
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// Fails once the unit has been marked rollback-only.
    pub fn ensure_writable(&self) -> Result<()> {
        if self.rollback_only {
            return Err(InterbankError::RollbackOnly);
        }
        Ok(())
    }

    /// Number of staged writes.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.staged.len()
    }

    /// Apply every staged write atomically and release row locks.
    ///
    /// # Errors
    /// `RollbackOnly` if the unit was marked for rollback (its writes are
    /// discarded), or a `Journal` error if the snapshot could not be written
    /// (nothing is applied).
    pub fn commit(mut self) -> Result<()> {
        if self.rollback_only {
            trace!(unit = %self.id, "Commit refused: rollback-only");
            return Err(InterbankError::RollbackOnly);
        }
        let staged = std::mem::take(&mut self.staged);
        self.db.apply(staged)
    }

    /// Discard every staged write and release row locks.
    pub fn rollback(self) {
        trace!(unit = %self.id, writes = self.staged.len(), "Unit of work rolled back");
    }
}

impl Drop for UnitOfWork<'_> {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            self.db.locks.release_all(self.id);
        }
    }
}

impl fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("writes", &self.staged.len())
            .field("held", &self.held)
            .field("rollback_only", &self.rollback_only)
            .finish()
    }
}

/// Staged value for `key` if present, committed value otherwise.
pub(crate) fn read_through<K: Ord, V: Clone>(
    staged: &BTreeMap<K, V>,
    committed: &BTreeMap<K, V>,
    key: &K,
) -> Option<V> {
    staged.get(key).or_else(|| committed.get(key)).cloned()
}

/// Every row matching `pred`, staged values shadowing committed ones.
pub(crate) fn scan<K: Ord + Clone, V: Clone>(
    staged: &BTreeMap<K, V>,
    committed: &BTreeMap<K, V>,
    pred: impl Fn(&V) -> bool,
) -> Vec<V> {
    let mut merged: BTreeMap<&K, &V> = committed.iter().collect();
    merged.extend(staged.iter());
    merged.into_values().filter(|v| pred(v)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_ids_are_distinct() {
        let db = Database::in_memory();
        let a = db.begin();
        let b = db.begin();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn rollback_only_unit_refuses_commit() {
        let db = Database::in_memory();
        let mut unit = db.begin();
        unit.insert_account(Account::fixture("444001", "RSD", 10))
            .unwrap();
        unit.set_rollback_only();
        assert!(matches!(unit.ensure_writable(), Err(InterbankError::RollbackOnly)));
        assert!(matches!(unit.commit(), Err(InterbankError::RollbackOnly)));
        assert!(db.account(&AccountNumber::new("444001")).unwrap().is_none());
    }

    #[test]
    fn rollback_discards_writes() {
        let db = Database::in_memory();
        let mut unit = db.begin();
        unit.insert_account(Account::fixture("444001", "RSD", 10))
            .unwrap();
        assert_eq!(unit.pending_writes(), 1);
        unit.rollback();
        assert!(db.account(&AccountNumber::new("444001")).unwrap().is_none());
    }

    #[test]
    fn scan_prefers_staged_rows() {
        let mut committed = BTreeMap::new();
        committed.insert(1, "old");
        committed.insert(2, "keep");
        let mut staged = BTreeMap::new();
        staged.insert(1, "new");
        staged.insert(3, "added");
        let rows = scan(&staged, &committed, |_| true);
        assert_eq!(rows, vec!["new", "keep", "added"]);
    }
}
