//! Shared fixtures: in-process banks wired together without HTTP.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use interbank_executor::{DeliveryReceipt, InboundReply, InterbankExecutor, MessageDelivery};
use interbank_store::Database;
use interbank_types::*;
use rust_decimal::Decimal;

pub const A: RoutingNumber = RoutingNumber(444);
pub const B: RoutingNumber = RoutingNumber(111);

pub fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

/// Config for `ours` peering with `other`. A zero resend interval makes
/// every sweep retry whatever is still undelivered.
pub fn bank_config(ours: RoutingNumber, other: RoutingNumber) -> BankConfig {
    BankConfig {
        routing_number: ours,
        resend_interval_ms: 0,
        peers: vec![PeerConfig {
            routing_number: other,
            api_key: format!("key-{other}"),
            base_url: format!("http://bank-{other}"),
        }],
        ..BankConfig::default()
    }
}

pub fn seed(db: &Database, accounts: &[(&str, &str, i64)]) {
    let mut unit = db.begin();
    for (num, currency, balance) in accounts {
        unit.insert_account(Account::fixture(num, currency, *balance))
            .unwrap();
    }
    unit.commit().unwrap();
}

pub fn bank(ours: RoutingNumber, other: RoutingNumber, accounts: &[(&str, &str, i64)]) -> Arc<InterbankExecutor> {
    let db = Arc::new(Database::in_memory());
    seed(&db, accounts);
    Arc::new(InterbankExecutor::new(db, bank_config(ours, other)).unwrap())
}

pub fn journaled_bank(path: &Path, ours: RoutingNumber, other: RoutingNumber) -> Arc<InterbankExecutor> {
    let db = Arc::new(Database::open(path).unwrap());
    Arc::new(InterbankExecutor::new(db, bank_config(ours, other)).unwrap())
}

pub fn balances(bank: &InterbankExecutor, num: &str) -> (Decimal, Decimal) {
    let acct = bank
        .database()
        .account(&AccountNumber::new(num))
        .unwrap()
        .unwrap();
    (acct.balance, acct.available_balance)
}

/// An executor plus the transport it sends with.
pub struct Bank {
    pub executor: Arc<InterbankExecutor>,
    pub wire: Arc<Loopback>,
}

/// Hands messages straight to the peer executor's inbound handler.
pub struct Loopback {
    from: RoutingNumber,
    peers: Mutex<HashMap<RoutingNumber, Arc<InterbankExecutor>>>,
    /// Every delivery fails before reaching the peer.
    down: AtomicBool,
    /// The peer processes the message but the reply never arrives.
    lose_replies: AtomicBool,
}

impl Loopback {
    pub fn new(from: RoutingNumber) -> Arc<Self> {
        Arc::new(Self {
            from,
            peers: Mutex::new(HashMap::new()),
            down: AtomicBool::new(false),
            lose_replies: AtomicBool::new(false),
        })
    }

    pub fn connect(&self, peer: &Arc<InterbankExecutor>) {
        self.peers
            .lock()
            .unwrap()
            .insert(peer.routing_number(), Arc::clone(peer));
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_lose_replies(&self, lose: bool) {
        self.lose_replies.store(lose, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageDelivery for Loopback {
    fn name(&self) -> &'static str {
        "loopback"
    }

    async fn deliver(&self, destination: RoutingNumber, body: &str) -> Result<DeliveryReceipt> {
        let failed = |reason: String| InterbankError::Delivery {
            destination,
            reason,
        };
        if self.down.load(Ordering::SeqCst) {
            return Err(failed("connection refused".into()));
        }
        let peer = self
            .peers
            .lock()
            .unwrap()
            .get(&destination)
            .cloned()
            .ok_or(InterbankError::UnknownPeer(destination))?;

        let message: Message = serde_json::from_str(body)?;
        let reply = match peer.handle_message(self.from, message) {
            Ok(reply) => reply,
            // The endpoint answers these with 400.
            Err(e) if e.is_validation() || matches!(e, InterbankError::ProtocolViolation(_)) => {
                return Ok(DeliveryReceipt::Rejected(e.to_string()));
            }
            Err(e) => return Err(failed(e.to_string())),
        };

        if self.lose_replies.load(Ordering::SeqCst) {
            return Err(failed("reply lost".into()));
        }
        Ok(match reply {
            InboundReply::Vote(vote) => DeliveryReceipt::Vote(vote),
            InboundReply::Accepted => DeliveryReceipt::Acknowledged,
        })
    }
}
