//! Node wiring: store, executor, relay and HTTP server.

use std::sync::Arc;

use interbank_executor::{HttpDelivery, InterbankExecutor, MessageDelivery, OutboxRelay};
use interbank_store::Database;
use interbank_types::{InterbankError, Result, TxStatus};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{
    NodeConfig,
    http::{self, AppState},
};

/// A fully wired bank node, ready to serve.
pub struct Node {
    executor: Arc<InterbankExecutor>,
    delivery: Arc<dyn MessageDelivery>,
}

impl Node {
    /// Open the store, seed accounts and build the executor with HTTP
    /// delivery to the configured peers.
    pub fn build(config: &NodeConfig) -> Result<Self> {
        let executor = Self::executor(config)?;
        let delivery = HttpDelivery::new(executor.routes().clone(), config.delivery_timeout())?;
        Ok(Self::with_delivery(executor, Arc::new(delivery)))
    }

    /// Use a custom transport instead of HTTP.
    #[must_use]
    pub fn with_delivery(executor: Arc<InterbankExecutor>, delivery: Arc<dyn MessageDelivery>) -> Self {
        Self { executor, delivery }
    }

    /// Open the store and build the executor, without any transport.
    pub fn executor(config: &NodeConfig) -> Result<Arc<InterbankExecutor>> {
        let db = match &config.journal_path {
            Some(path) => Database::open(path)?,
            None => {
                warn!("No journal_path configured, state will not survive a restart");
                Database::in_memory()
            }
        };
        seed_accounts(&db, config)?;
        report_recovery(&db)?;
        Ok(Arc::new(InterbankExecutor::new(Arc::new(db), config.bank.clone())?))
    }

    #[must_use]
    pub fn executor_handle(&self) -> &Arc<InterbankExecutor> {
        &self.executor
    }

    /// Start the outbox relay and serve the interbank endpoint on `listener`
    /// until the server stops.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let relay = OutboxRelay::new(Arc::clone(&self.executor), self.delivery);
        let relay_task = tokio::spawn(relay.run());

        let app = http::router(AppState::new(Arc::clone(&self.executor)));
        let addr = listener.local_addr()?;
        info!(
            addr = %addr,
            routing_number = %self.executor.routing_number(),
            "Interbank endpoint listening"
        );

        let served = axum::serve(listener, app).await;
        relay_task.abort();
        served.map_err(|e| InterbankError::Io(format!("server error: {e}")))
    }
}

/// Open configured accounts that do not exist yet.
fn seed_accounts(db: &Database, config: &NodeConfig) -> Result<()> {
    let mut unit = db.begin();
    let mut opened = 0_usize;
    for seed in &config.accounts {
        if unit.account(&seed.number)?.is_none() {
            unit.insert_account(seed.to_account())?;
            opened += 1;
        }
    }
    unit.commit()?;
    if opened > 0 {
        info!(opened, "Seed accounts opened");
    }
    Ok(())
}

fn report_recovery(db: &Database) -> Result<()> {
    let pending = db
        .executing_all()?
        .iter()
        .filter(|rec| rec.status == TxStatus::AwaitingVotes)
        .count();
    let undelivered = db.outbox_messages()?.iter().filter(|m| !m.delivered).count();
    if pending > 0 || undelivered > 0 {
        info!(pending, undelivered, "Resuming unfinished transactions");
    }
    Ok(())
}
