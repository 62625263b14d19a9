//! System-wide constants for the interbank ledger.

/// Routing number this bank answers to unless configured otherwise.
pub const DEFAULT_ROUTING_NUMBER: u32 = 444;

/// Default interval after which an undelivered outbox message is resent.
pub const DEFAULT_RESEND_INTERVAL_MS: u64 = 120_000;

/// Default time an initiated transaction may wait for peer votes before it
/// is rolled back.
pub const DEFAULT_VOTE_TIMEOUT_MS: u64 = 86_400_000;

/// Default retention of finalized log rows, delivered outbox rows and inbox
/// rows.
pub const DEFAULT_RETENTION_MS: u64 = 7 * 86_400_000;

/// How long a unit of work waits for another unit's account row lock.
pub const ROW_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Timeout for one HTTP delivery attempt to a peer.
pub const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 10_000;

/// HTTP path peers post protocol messages to.
pub const INTERBANK_PATH: &str = "/interbank";

/// Header carrying the caller's API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
