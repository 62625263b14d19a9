//! # interbank-executor
//!
//! Executes transactions that span several banks with a two-phase commit.
//!
//! - [`phase`]: local phase 1 (reserve), phase 2 (apply) and release.
//! - [`executor`]: [`InterbankExecutor`], the initiator side plus outbox
//!   bookkeeping and timeouts.
//! - [`inbound`]: the participant side, handling messages from peers.
//! - [`delivery`]: the transport seam and its HTTP implementation.
//! - [`relay`]: the background task draining the outbox.
//!
//! Every state change happens inside one [`interbank_store::UnitOfWork`]
//! while the executor's transaction key is held, so a vote, the balance
//! changes it causes and the messages it produces commit together.

pub mod delivery;
pub mod executor;
pub mod inbound;
pub mod phase;
pub mod relay;

pub use delivery::{DeliveryReceipt, HttpDelivery, MessageDelivery};
pub use executor::InterbankExecutor;
pub use inbound::InboundReply;
pub use phase::LocalPhaseEngine;
pub use relay::{OutboxRelay, SweepStats};
