//! The committed tables and the entry point for units of work.

use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{Mutex, MutexGuard, atomic::AtomicU64},
};

use chrono::{DateTime, Utc};
use interbank_types::{
    Account, AccountNumber, ExecutingTransaction, ForeignBankId, IdempotenceKey, InboxMessage,
    InterbankError, OutboxMessage, Result,
};
use tracing::{debug, info};

use crate::{
    journal::{Journal, Snapshot},
    locks::RowLocks,
    unit::{Staged, UnitOfWork},
};

/// Committed state of every table.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub(crate) accounts: BTreeMap<AccountNumber, Account>,
    pub(crate) executing: BTreeMap<ForeignBankId, ExecutingTransaction>,
    pub(crate) outbox: BTreeMap<IdempotenceKey, OutboxMessage>,
    pub(crate) inbox: BTreeMap<IdempotenceKey, InboxMessage>,
}

impl Tables {
    fn apply(&mut self, staged: Staged) {
        self.accounts.extend(staged.accounts);
        self.executing.extend(staged.executing);
        self.outbox.extend(staged.outbox);
        self.inbox.extend(staged.inbox);
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            accounts: self.accounts.values().cloned().collect(),
            executing: self.executing.values().cloned().collect(),
            outbox: self.outbox.values().cloned().collect(),
            inbox: self.inbox.values().cloned().collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            accounts: snapshot
                .accounts
                .into_iter()
                .map(|a| (a.number.clone(), a))
                .collect(),
            executing: snapshot
                .executing
                .into_iter()
                .map(|t| (t.transaction_id.clone(), t))
                .collect(),
            outbox: snapshot
                .outbox
                .into_iter()
                .map(|m| (m.idempotence_key.clone(), m))
                .collect(),
            inbox: snapshot
                .inbox
                .into_iter()
                .map(|m| (m.idempotence_key.clone(), m))
                .collect(),
        }
    }
}

/// Rows removed by [`Database::prune`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub executing: usize,
    pub outbox: usize,
    pub inbox: usize,
}

impl PruneStats {
    #[must_use]
    pub fn total(&self) -> usize {
        self.executing + self.outbox + self.inbox
    }
}

/// One bank's database.
pub struct Database {
    tables: Mutex<Tables>,
    pub(crate) locks: RowLocks,
    journal: Option<Journal>,
    pub(crate) next_unit: AtomicU64,
}

impl Database {
    /// A database that lives only as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_tables(Tables::default(), None)
    }

    /// Open (or create) a journaled database at `path`, restoring the last
    /// committed snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let journal = Journal::new(path);
        let tables = match journal.load()? {
            Some(snapshot) => {
                info!(
                    path = %journal.path().display(),
                    accounts = snapshot.accounts.len(),
                    executing = snapshot.executing.len(),
                    outbox = snapshot.outbox.len(),
                    inbox = snapshot.inbox.len(),
                    "Restored journal"
                );
                Tables::from_snapshot(snapshot)
            }
            None => Tables::default(),
        };
        Ok(Self::with_tables(tables, Some(journal)))
    }

    fn with_tables(tables: Tables, journal: Option<Journal>) -> Self {
        Self {
            tables: Mutex::new(tables),
            locks: RowLocks::new(),
            journal,
            next_unit: AtomicU64::new(1),
        }
    }

    /// Open a new atomic unit of work.
    #[must_use]
    pub fn begin(&self) -> UnitOfWork<'_> {
        UnitOfWork::new(self)
    }

    pub(crate) fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| InterbankError::Internal("table lock poisoned".into()))
    }

    /// Apply a unit's staged writes atomically. The journal is written
    /// first; if that fails nothing becomes visible.
    pub(crate) fn apply(&self, staged: Staged) -> Result<()> {
        if staged.is_empty() {
            return Ok(());
        }
        let writes = staged.len();
        self.mutate(|tables| tables.apply(staged))?;
        debug!(writes, "Unit of work committed");
        Ok(())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> Result<R> {
        let mut tables = self.tables()?;
        match &self.journal {
            Some(journal) => {
                let mut next = tables.clone();
                let out = f(&mut next);
                journal.write(&next.to_snapshot())?;
                *tables = next;
                Ok(out)
            }
            None => Ok(f(&mut tables)),
        }
    }

    /// Remove finalized transaction log rows, delivered outbox rows and
    /// inbox rows older than `cutoff`.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<PruneStats> {
        let stats = self.mutate(|tables| {
            let mut stats = PruneStats::default();

            let before = tables.executing.len();
            tables
                .executing
                .retain(|_, tx| tx.finalized_at.is_none_or(|at| at >= cutoff));
            stats.executing = before - tables.executing.len();

            let before = tables.outbox.len();
            tables
                .outbox
                .retain(|_, msg| !msg.delivered || msg.created_at >= cutoff);
            stats.outbox = before - tables.outbox.len();

            let before = tables.inbox.len();
            tables.inbox.retain(|_, msg| msg.received_at >= cutoff);
            stats.inbox = before - tables.inbox.len();

            stats
        })?;
        if stats.total() > 0 {
            info!(
                executing = stats.executing,
                outbox = stats.outbox,
                inbox = stats.inbox,
                "Pruned finalized rows"
            );
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------
    // Committed-state reads (no locks, for inspection and tests)
    // -----------------------------------------------------------------

    pub fn account(&self, number: &AccountNumber) -> Result<Option<Account>> {
        Ok(self.tables()?.accounts.get(number).cloned())
    }

    pub fn executing(&self, id: &ForeignBankId) -> Result<Option<ExecutingTransaction>> {
        Ok(self.tables()?.executing.get(id).cloned())
    }

    pub fn executing_all(&self) -> Result<Vec<ExecutingTransaction>> {
        Ok(self.tables()?.executing.values().cloned().collect())
    }

    pub fn outbox_messages(&self) -> Result<Vec<OutboxMessage>> {
        Ok(self.tables()?.outbox.values().cloned().collect())
    }

    pub fn inbox_message(&self, key: &IdempotenceKey) -> Result<Option<InboxMessage>> {
        Ok(self.tables()?.inbox.get(key).cloned())
    }

    /// Whether commits are written to disk.
    #[must_use]
    pub fn is_journaled(&self) -> bool {
        self.journal.is_some()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("journal", &self.journal)
            .finish_non_exhaustive()
    }
}
