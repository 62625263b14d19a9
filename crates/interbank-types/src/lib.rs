//! # interbank-types
//!
//! Shared types, errors, and configuration for the interbank ledger.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`RoutingNumber`], [`AccountNumber`], [`ForeignBankId`], [`IdempotenceKey`]
//! - **Transaction model**: [`Transaction`], [`Posting`], [`TxAccount`], [`TxAsset`]
//! - **Wire protocol**: [`Message`], [`Envelope`], [`VoteResponse`], [`NoVoteReason`]
//! - **Local accounts**: [`Account`]
//! - **Durable records**: [`ExecutingTransaction`], [`OutboxMessage`], [`InboxMessage`]
//! - **Configuration**: [`BankConfig`], [`PeerConfig`], [`RoutingTable`]
//! - **Errors**: [`InterbankError`] with `IB_ERR_` prefix codes
//! - **Constants**: system-wide defaults

pub mod account;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod message;
pub mod records;
pub mod transaction;

pub use account::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use message::*;
pub use records::*;
pub use transaction::*;

// Constants are accessed via `interbank_types::constants::FOO`
// (not re-exported to avoid name collisions).
