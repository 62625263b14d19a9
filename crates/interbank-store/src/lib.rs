//! # interbank-store
//!
//! Durable state of one bank: account balances, the transaction log, the
//! outbox and the inbox.
//!
//! ## Architecture
//!
//! All mutations go through a [`UnitOfWork`] opened with
//! [`Database::begin`]. A unit stages every write and applies them together
//! on [`UnitOfWork::commit`]; dropping or rolling back a unit discards them.
//! Account rows are read-modify-written under exclusive per-row locks held
//! until the unit ends.
//!
//! When opened on a journal path, every commit rewrites a JSON snapshot
//! before it becomes visible, so transaction log and outbox rows survive a
//! crash and drive recovery on restart.

pub mod balances;
pub mod database;
pub mod inbox;
pub mod journal;
pub mod locks;
pub mod outbox;
pub mod tx_log;
pub mod unit;

pub use database::{Database, PruneStats};
pub use journal::{Journal, Snapshot};
pub use locks::RowLocks;
pub use unit::{UnitId, UnitOfWork};
