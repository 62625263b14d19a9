//! Exclusive per-row locks on account rows.
//!
//! A unit of work that locks an account keeps the lock until it commits,
//! rolls back or is dropped. Other units asking for the same row block until
//! then, up to a timeout. Locks are re-entrant for the owning unit.

use std::{
    collections::HashMap,
    sync::{Condvar, Mutex},
    time::{Duration, Instant},
};

use interbank_types::{AccountNumber, InterbankError, Result, constants};

use crate::UnitId;

/// Lock manager for account rows.
#[derive(Debug)]
pub struct RowLocks {
    owners: Mutex<HashMap<AccountNumber, UnitId>>,
    released: Condvar,
    timeout: Duration,
}

impl Default for RowLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl RowLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_millis(constants::ROW_LOCK_TIMEOUT_MS))
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            owners: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            timeout,
        }
    }

    /// Block until `unit` owns the lock on `account`.
    ///
    /// # Errors
    /// `LockTimeout` if another unit keeps the row past the timeout.
    pub fn acquire(&self, account: &AccountNumber, unit: UnitId) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut owners = self.owners.lock().map_err(poisoned)?;
        loop {
            match owners.get(account) {
                None => {
                    owners.insert(account.clone(), unit);
                    return Ok(());
                }
                Some(owner) if *owner == unit => return Ok(()),
                Some(_) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(InterbankError::LockTimeout(account.to_string()));
                    }
                    owners = self
                        .released
                        .wait_timeout(owners, remaining)
                        .map_err(poisoned)?
                        .0;
                }
            }
        }
    }

    /// Release every lock held by `unit` and wake waiters.
    pub fn release_all(&self, unit: UnitId) {
        // A poisoned map still has to be cleaned up, or waiters hang forever.
        let mut owners = match self.owners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = owners.len();
        owners.retain(|_, owner| *owner != unit);
        if owners.len() != before {
            self.released.notify_all();
        }
    }

    /// The unit currently holding `account`, if any.
    #[must_use]
    pub fn owner(&self, account: &AccountNumber) -> Option<UnitId> {
        self.owners
            .lock()
            .ok()
            .and_then(|owners| owners.get(account).copied())
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> InterbankError {
    InterbankError::Internal("row lock table poisoned".into())
}
