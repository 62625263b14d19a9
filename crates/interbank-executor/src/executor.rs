//! The interbank transaction executor.
//!
//! Initiator lifecycle of one transaction:
//!
//! ```text
//!   submit_tx ──phase 1 NO──▶ LocalPartVotedNo (nothing stored)
//!       │
//!       ├─ only us ─────────▶ phase 2 ──▶ Committed
//!       │
//!       └─ peers ──▶ AwaitingVotes ──all YES──▶ phase 2 ──▶ Committed ─▶ COMMIT_TX
//!                        │
//!                        └──first NO / vote timeout──▶ release ──▶ RolledBack ─▶ ROLLBACK_TX
//! ```
//!
//! Every phase 1, phase 2, release and outbox mutation runs while holding the
//! transaction key, one process-wide lock. Row locks inside the unit of work
//! still guard the accounts themselves.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use interbank_store::{Database, PruneStats, UnitOfWork};
use interbank_types::{
    BankConfig, CommitTransaction, Envelope, ExecutingTransaction, ForeignBankId, IdempotenceKey,
    InterbankError, Message, OutboxMessage, Result, RollbackTransaction, RoutingNumber,
    RoutingTable, Transaction, TxRole, TxStatus, VoteResponse,
};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::{DeliveryReceipt, LocalPhaseEngine};

/// Executes transactions across this bank and its peers.
pub struct InterbankExecutor {
    db: Arc<Database>,
    config: BankConfig,
    routes: RoutingTable,
    engine: LocalPhaseEngine,
    transaction_key: Mutex<()>,
    flush: Arc<Notify>,
}

impl InterbankExecutor {
    /// Create an executor over `db`.
    ///
    /// # Errors
    /// `Configuration` if the peer list is inconsistent.
    pub fn new(db: Arc<Database>, config: BankConfig) -> Result<Self> {
        let routes = config.routing_table()?;
        let engine = LocalPhaseEngine::new(config.routing_number);
        info!(
            routing_number = %config.routing_number,
            peers = config.peers.len(),
            journaled = db.is_journaled(),
            "Interbank executor ready"
        );
        Ok(Self {
            db,
            config,
            routes,
            engine,
            transaction_key: Mutex::new(()),
            flush: Arc::new(Notify::new()),
        })
    }

    #[must_use]
    pub fn routing_number(&self) -> RoutingNumber {
        self.config.routing_number
    }

    #[must_use]
    pub fn config(&self) -> &BankConfig {
        &self.config
    }

    #[must_use]
    pub fn routes(&self) -> &RoutingTable {
        &self.routes
    }

    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    #[must_use]
    pub(crate) fn engine(&self) -> &LocalPhaseEngine {
        &self.engine
    }

    /// Notified whenever a commit enqueued outbox messages.
    #[must_use]
    pub fn flush_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.flush)
    }

    /// Current status of a transaction this bank knows about.
    pub fn status(&self, id: &ForeignBankId) -> Result<Option<TxStatus>> {
        Ok(self.db.executing(id)?.map(|rec| rec.status))
    }

    // -----------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------

    /// Start a transaction. Any ID already on `tx` is replaced with a fresh
    /// one under our routing number.
    ///
    /// Returns once local phase 1 has committed. A transaction touching
    /// only this bank is complete at that point; otherwise it is awaiting
    /// the peers' votes and finishes in the background.
    ///
    /// # Errors
    /// - Validation errors (`InvalidAccountNumber`, `UnknownDestination`,
    ///   `NotInvolved`) before anything is touched.
    /// - `LocalPartVotedNo` if phase 1 rejected the local part. Nothing is
    ///   stored.
    pub fn submit_tx(&self, mut tx: Transaction) -> Result<ForeignBankId> {
        let ours = self.routing_number();
        let id = ForeignBankId::generate(ours);
        tx.transaction_id = Some(id.clone());

        let destinations = self.destinations(&tx)?;
        if !destinations.contains(&ours) {
            return Err(InterbankError::NotInvolved(ours));
        }
        let peers: Vec<RoutingNumber> = destinations.iter().copied().filter(|rn| *rn != ours).collect();

        let _key = self.lock_key();
        let mut unit = self.db.begin();
        let tx = self.prepare_or_fail(&mut unit, tx)?;

        let votes_needed = u32::try_from(destinations.len())
            .map_err(|_| InterbankError::Internal("too many destinations".into()))?;
        let mut record =
            ExecutingTransaction::prepared(id.clone(), encode(&tx)?, votes_needed, TxRole::Initiator);

        if peers.is_empty() {
            self.engine.commit(&mut unit, &tx)?;
            record.finalize(TxStatus::Committed)?;
            unit.record_executing(record)?;
            unit.commit()?;
            info!(transaction_id = %id, "Local transaction committed");
            return Ok(id);
        }

        unit.record_executing(record)?;
        for peer in &peers {
            let envelope = tx.clone();
            self.enqueue(&mut unit, *peer, |key| {
                Message::NewTx(Envelope {
                    idempotence_key: key,
                    message: envelope,
                })
            })?;
        }
        unit.commit()?;
        info!(transaction_id = %id, peers = ?peers, "Transaction prepared, awaiting votes");
        self.flush.notify_one();
        Ok(id)
    }

    /// Execute an all-local transaction inside the caller's unit of work.
    ///
    /// Phase 1 and phase 2 both run in `unit`, so the caller's rollback
    /// undoes everything. On any error `unit` is marked rollback-only.
    ///
    /// # Errors
    /// - `NotLocalOnly` if a posting belongs to another bank.
    /// - `LocalPartVotedNo` if phase 1 rejected the transaction.
    /// - `RollbackOnly` if `unit` was already marked for rollback.
    pub fn submit_immediate_tx(
        &self,
        unit: &mut UnitOfWork<'_>,
        mut tx: Transaction,
    ) -> Result<ForeignBankId> {
        unit.ensure_writable()?;
        let ours = self.routing_number();
        let id = ForeignBankId::generate(ours);
        tx.transaction_id = Some(id.clone());

        let result = self.execute_immediate(unit, tx);
        if let Err(e) = &result {
            debug!(transaction_id = %id, error = %e, "Immediate transaction failed");
            unit.set_rollback_only();
        }
        result.map(|()| id)
    }

    fn execute_immediate(&self, unit: &mut UnitOfWork<'_>, tx: Transaction) -> Result<()> {
        let ours = self.routing_number();
        let destinations = self.destinations(&tx)?;
        if destinations.iter().any(|rn| *rn != ours) {
            return Err(InterbankError::NotLocalOnly {
                ours,
                destinations: destinations.into_iter().collect(),
            });
        }
        let id = tx
            .transaction_id
            .clone()
            .ok_or(InterbankError::MissingTransactionId)?;

        let _key = self.lock_key();
        let tx = self.prepare_or_fail(unit, tx)?;
        self.engine.commit(unit, &tx)?;
        let mut record = ExecutingTransaction::prepared(id.clone(), encode(&tx)?, 1, TxRole::Initiator);
        record.finalize(TxStatus::Committed)?;
        unit.record_executing(record)?;
        info!(transaction_id = %id, "Immediate transaction applied");
        Ok(())
    }

    /// Run phase 1; on NO, mark the unit for rollback and fail with the reasons.
    fn prepare_or_fail(&self, unit: &mut UnitOfWork<'_>, tx: Transaction) -> Result<Transaction> {
        let reasons = self.engine.prepare(unit, &tx)?;
        if reasons.is_empty() {
            return Ok(tx);
        }
        info!(
            transaction_id = ?tx.transaction_id,
            reasons = ?reasons,
            "Local part voted NO"
        );
        unit.set_rollback_only();
        Err(InterbankError::LocalPartVotedNo {
            transaction: Box::new(tx),
            reasons,
        })
    }

    // -----------------------------------------------------------------
    // Outbox bookkeeping
    // -----------------------------------------------------------------

    /// Claim every outbox message due for (re)delivery.
    pub fn process_outbox(&self) -> Result<Vec<OutboxMessage>> {
        self.process_outbox_at(Utc::now())
    }

    /// [`process_outbox`](Self::process_outbox) with an explicit clock.
    ///
    /// A message is due if it is undelivered and was last sent before
    /// `now - resend_interval` (or never). Each due row is stamped with
    /// `now` before it is returned.
    pub fn process_outbox_at(&self, now: DateTime<Utc>) -> Result<Vec<OutboxMessage>> {
        let cutoff = before(now, self.config.resend_interval())?;

        let _key = self.lock_key();
        let mut unit = self.db.begin();
        let mut due = unit.due_outbox(cutoff)?;
        for msg in &mut due {
            msg.last_sent_at = Some(now);
            unit.save_outbox(msg.clone())?;
        }
        unit.commit()?;

        if !due.is_empty() {
            debug!(count = due.len(), "Outbox messages due");
        }
        Ok(due)
    }

    /// Record a peer's answer to an outbox message.
    ///
    /// The row is marked delivered. For a `NEW_TX` the receipt must carry
    /// the vote, which is counted once: a repeated acknowledgement of the
    /// same key is ignored.
    ///
    /// A permanently refused `NEW_TX` counts as a NO vote from that peer.
    ///
    /// # Errors
    /// - `NoSuchOutboxMessage` for an unknown key.
    /// - `ProtocolViolation` if a `NEW_TX` was answered without a vote. The
    ///   row stays undelivered.
    pub fn acknowledge(&self, key: &IdempotenceKey, receipt: DeliveryReceipt) -> Result<()> {
        let _key = self.lock_key();
        let mut unit = self.db.begin();
        let mut row = unit
            .outbox_message(key)?
            .ok_or_else(|| InterbankError::NoSuchOutboxMessage(key.clone()))?;
        if row.delivered {
            debug!(idempotence_key = %key, "Duplicate acknowledgement ignored");
            return Ok(());
        }

        let message: Message = decode_stored("outbox message", &row.body)?;
        let destination = row.destination;
        let mut enqueued = false;
        match (message, receipt) {
            (Message::NewTx(envelope), DeliveryReceipt::Vote(vote)) => {
                row.delivered = true;
                unit.save_outbox(row)?;
                let id = envelope
                    .message
                    .transaction_id
                    .ok_or(InterbankError::MissingTransactionId)?;
                enqueued = self.count_vote(&mut unit, &id, destination, &vote)?;
            }
            (Message::NewTx(envelope), DeliveryReceipt::Rejected(reason)) => {
                row.delivered = true;
                unit.save_outbox(row)?;
                let id = envelope
                    .message
                    .transaction_id
                    .ok_or(InterbankError::MissingTransactionId)?;
                warn!(
                    transaction_id = %id,
                    from = %destination,
                    reason = %reason,
                    "NEW_TX refused, counting as NO"
                );
                let refusal = VoteResponse::No {
                    reasons: Vec::new(),
                };
                enqueued = self.count_vote(&mut unit, &id, destination, &refusal)?;
            }
            (Message::NewTx(_), DeliveryReceipt::Acknowledged) => {
                return Err(InterbankError::ProtocolViolation(format!(
                    "bank {destination} acknowledged NEW_TX {key} without a vote"
                )));
            }
            (other, receipt) => {
                match receipt {
                    DeliveryReceipt::Vote(vote) => warn!(
                        idempotence_key = %key,
                        kind = other.kind(),
                        vote = ?vote,
                        "Unexpected vote on a decision message, ignored"
                    ),
                    DeliveryReceipt::Rejected(reason) => error!(
                        idempotence_key = %key,
                        kind = other.kind(),
                        destination = %destination,
                        reason = %reason,
                        "Decision refused by peer, giving up on this message"
                    ),
                    DeliveryReceipt::Acknowledged => {}
                }
                row.delivered = true;
                unit.save_outbox(row)?;
            }
        }
        unit.commit()?;
        debug!(idempotence_key = %key, destination = %destination, "Outbox message delivered");

        if enqueued {
            self.flush.notify_one();
        }
        Ok(())
    }

    /// Count one peer's vote. Returns whether decision messages were enqueued.
    fn count_vote(
        &self,
        unit: &mut UnitOfWork<'_>,
        id: &ForeignBankId,
        from: RoutingNumber,
        vote: &VoteResponse,
    ) -> Result<bool> {
        let Some(mut record) = unit.executing(id)? else {
            warn!(transaction_id = %id, from = %from, "Vote for unknown transaction");
            return Ok(false);
        };
        if record.status.is_final() {
            debug!(transaction_id = %id, from = %from, status = %record.status, "Late vote ignored");
            return Ok(false);
        }

        record.record_vote(vote.is_yes());
        info!(
            transaction_id = %id,
            from = %from,
            yes = vote.is_yes(),
            votes_cast = record.votes_cast,
            votes_needed = record.votes_needed,
            "Vote received"
        );

        if let VoteResponse::No { reasons } = vote {
            info!(transaction_id = %id, from = %from, reasons = ?reasons, "Peer voted NO");
            self.abort_initiated(unit, record)?;
            return Ok(true);
        }
        if record.all_votes_yes() {
            self.commit_initiated(unit, record)?;
            return Ok(true);
        }
        unit.save_executing(record)?;
        Ok(false)
    }

    fn commit_initiated(&self, unit: &mut UnitOfWork<'_>, mut record: ExecutingTransaction) -> Result<()> {
        let tx = decode(&record.tx_body)?;
        self.engine.commit(unit, &tx)?;
        record.finalize(TxStatus::Committed)?;
        let id = record.transaction_id.clone();
        unit.save_executing(record)?;
        Self::retire_proposals(unit, &id)?;
        for peer in self.peers_of(&tx)? {
            let transaction_id = id.clone();
            self.enqueue(unit, peer, |key| {
                Message::CommitTx(Envelope {
                    idempotence_key: key,
                    message: CommitTransaction { transaction_id },
                })
            })?;
        }
        info!(transaction_id = %id, "Transaction committed");
        Ok(())
    }

    fn abort_initiated(&self, unit: &mut UnitOfWork<'_>, mut record: ExecutingTransaction) -> Result<()> {
        let tx = decode(&record.tx_body)?;
        self.engine.release(unit, &tx)?;
        record.finalize(TxStatus::RolledBack)?;
        let id = record.transaction_id.clone();
        unit.save_executing(record)?;
        Self::retire_proposals(unit, &id)?;
        for peer in self.peers_of(&tx)? {
            let transaction_id = id.clone();
            self.enqueue(unit, peer, |key| {
                Message::RollbackTx(Envelope {
                    idempotence_key: key,
                    message: RollbackTransaction { transaction_id },
                })
            })?;
        }
        info!(transaction_id = %id, "Transaction rolled back");
        Ok(())
    }

    /// Stop resending `NEW_TX` for a transaction that reached a decision.
    /// Peers that never answered get the decision message instead.
    fn retire_proposals(unit: &mut UnitOfWork<'_>, id: &ForeignBankId) -> Result<()> {
        for mut row in unit.undelivered_outbox()? {
            let message: Message = decode_stored("outbox message", &row.body)?;
            let Message::NewTx(envelope) = message else {
                continue;
            };
            if envelope.message.transaction_id.as_ref() != Some(id) {
                continue;
            }
            debug!(
                transaction_id = %id,
                idempotence_key = %row.idempotence_key,
                destination = %row.destination,
                "Unanswered NEW_TX retired"
            );
            row.delivered = true;
            unit.save_outbox(row)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------

    /// Roll back initiated transactions whose votes did not arrive in time.
    pub fn expire_stale_votes(&self) -> Result<usize> {
        self.expire_stale_votes_at(Utc::now())
    }

    /// [`expire_stale_votes`](Self::expire_stale_votes) with an explicit clock.
    pub fn expire_stale_votes_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = before(now, self.config.vote_timeout())?;

        let _key = self.lock_key();
        let mut unit = self.db.begin();
        let stale = unit.pending_initiated(cutoff)?;
        let count = stale.len();
        for record in stale {
            warn!(
                transaction_id = %record.transaction_id,
                votes_cast = record.votes_cast,
                votes_needed = record.votes_needed,
                "Vote timeout, rolling back"
            );
            self.abort_initiated(&mut unit, record)?;
        }
        unit.commit()?;

        if count > 0 {
            self.flush.notify_one();
        }
        Ok(count)
    }

    /// Drop finalized transactions, delivered outbox rows and inbox rows
    /// older than the retention period.
    pub fn prune_finalized(&self) -> Result<PruneStats> {
        self.prune_finalized_at(Utc::now())
    }

    /// [`prune_finalized`](Self::prune_finalized) with an explicit clock.
    pub fn prune_finalized_at(&self, now: DateTime<Utc>) -> Result<PruneStats> {
        let cutoff = before(now, self.config.retention())?;
        let _key = self.lock_key();
        let stats = self.db.prune(cutoff)?;
        if stats.total() > 0 {
            info!(
                executing = stats.executing,
                outbox = stats.outbox,
                inbox = stats.inbox,
                "Pruned finalized records"
            );
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------

    /// Hold the process-wide transaction key.
    pub(crate) fn lock_key(&self) -> MutexGuard<'_, ()> {
        // The guarded value is `()`; a panic elsewhere leaves nothing to repair.
        self.transaction_key
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Destination banks of `tx`, every one of them known.
    pub(crate) fn destinations(&self, tx: &Transaction) -> Result<BTreeSet<RoutingNumber>> {
        let destinations = tx
            .destinations()
            .map_err(|posting| InterbankError::InvalidAccountNumber(Box::new(posting.clone())))?;
        if let Some(unknown) = destinations.iter().find(|rn| !self.routes.is_known(**rn)) {
            return Err(InterbankError::UnknownDestination(*unknown));
        }
        Ok(destinations)
    }

    fn peers_of(&self, tx: &Transaction) -> Result<Vec<RoutingNumber>> {
        let ours = self.routing_number();
        Ok(self
            .destinations(tx)?
            .into_iter()
            .filter(|rn| *rn != ours)
            .collect())
    }

    /// Stage a message for `destination` under a fresh idempotence key.
    fn enqueue(
        &self,
        unit: &mut UnitOfWork<'_>,
        destination: RoutingNumber,
        build: impl FnOnce(IdempotenceKey) -> Message,
    ) -> Result<()> {
        let key = IdempotenceKey::generate(self.routing_number());
        let message = build(key.clone());
        let body = encode(&message)?;
        debug!(
            idempotence_key = %key,
            destination = %destination,
            kind = message.kind(),
            "Message enqueued"
        );
        unit.enqueue(OutboxMessage::new(key, destination, body))
    }
}

impl std::fmt::Debug for InterbankExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterbankExecutor")
            .field("routing_number", &self.config.routing_number)
            .field("db", &self.db)
            .finish_non_exhaustive()
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(InterbankError::from)
}

pub(crate) fn decode(body: &str) -> Result<Transaction> {
    decode_stored("transaction", body)
}

/// Parse a body this bank stored itself. Failure means corrupt state, not a
/// bad request.
pub(crate) fn decode_stored<T: DeserializeOwned>(what: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| InterbankError::Internal(format!("corrupt stored {what}: {e}")))
}

/// `now - span`, as a configuration error if the span is out of range.
fn before(now: DateTime<Utc>, span: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or_else(|| InterbankError::Configuration(format!("interval out of range: {span:?}")))
}

#[cfg(test)]
mod tests {
    use interbank_types::{Account, AccountNumber, NoVoteReason, PeerConfig, Posting};
    use rust_decimal::Decimal;

    use super::*;

    const OURS: RoutingNumber = RoutingNumber(444);
    const PEER: RoutingNumber = RoutingNumber(111);

    fn dec(n: i64) -> Decimal {
        Decimal::new(n, 0)
    }

    fn executor() -> InterbankExecutor {
        let db = Arc::new(Database::in_memory());
        {
            let mut unit = db.begin();
            unit.insert_account(Account::fixture("444001", "RSD", 1000))
                .unwrap();
            unit.insert_account(Account::fixture("444002", "RSD", 0))
                .unwrap();
            unit.commit().unwrap();
        }
        let config = BankConfig {
            routing_number: OURS,
            peers: vec![PeerConfig {
                routing_number: PEER,
                api_key: "k-111".into(),
                base_url: "http://bank-111".into(),
            }],
            ..BankConfig::default()
        };
        InterbankExecutor::new(db, config).unwrap()
    }

    fn balances(ex: &InterbankExecutor, num: &str) -> (Decimal, Decimal) {
        let acct = ex
            .database()
            .account(&AccountNumber::new(num))
            .unwrap()
            .unwrap();
        (acct.balance, acct.available_balance)
    }

    fn deposit(amount: i64) -> Transaction {
        Transaction::new(
            vec![
                Posting::memory_hole(OURS, dec(-amount), "RSD"),
                Posting::monetary("444001", dec(amount), "RSD"),
            ],
            "deposit",
        )
    }

    fn outbound(amount: i64) -> Transaction {
        Transaction::new(
            vec![
                Posting::monetary("444001", dec(-amount), "RSD"),
                Posting::monetary("111001", dec(amount), "RSD"),
            ],
            "outbound",
        )
    }

    fn new_tx_key(ex: &InterbankExecutor) -> IdempotenceKey {
        ex.database()
            .outbox_messages()
            .unwrap()
            .into_iter()
            .find(|m| m.body.contains("NEW_TX"))
            .unwrap()
            .idempotence_key
    }

    #[test]
    fn single_bank_submit_commits_synchronously() {
        let ex = executor();
        let mut tx = deposit(10);
        tx.transaction_id = Some(ForeignBankId::new(OURS, "caller-chosen"));

        let id = ex.submit_tx(tx).unwrap();
        assert_ne!(id.id, "caller-chosen");
        assert_eq!(id.routing_number, OURS);
        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::Committed));
        assert_eq!(balances(&ex, "444001"), (dec(1010), dec(1010)));
        assert!(ex.database().outbox_messages().unwrap().is_empty());
    }

    #[test]
    fn voted_no_leaves_no_trace() {
        let ex = executor();
        let tx = Transaction::new(
            vec![
                Posting::memory_hole(OURS, dec(1100), "RSD"),
                Posting::monetary("444001", dec(-1100), "RSD"),
            ],
            "withdraw",
        );
        let err = ex.submit_tx(tx).unwrap_err();
        let InterbankError::LocalPartVotedNo { reasons, .. } = err else {
            panic!("expected a NO vote");
        };
        assert!(matches!(reasons.as_slice(), [NoVoteReason::InsufficientAsset { .. }]));
        assert_eq!(balances(&ex, "444001"), (dec(1000), dec(1000)));
        assert!(ex.database().executing_all().unwrap().is_empty());
    }

    #[test]
    fn unknown_destination_rejected_before_mutation() {
        let ex = executor();
        let tx = Transaction::new(
            vec![
                Posting::monetary("444001", dec(-5), "RSD"),
                Posting::monetary("999001", dec(5), "RSD"),
            ],
            "nowhere",
        );
        let err = ex.submit_tx(tx).unwrap_err();
        assert!(matches!(err, InterbankError::UnknownDestination(RoutingNumber(999))));
        assert!(err.is_validation());
        assert_eq!(balances(&ex, "444001"), (dec(1000), dec(1000)));
    }

    #[test]
    fn transaction_not_touching_us_is_rejected() {
        let ex = executor();
        let tx = Transaction::new(
            vec![
                Posting::monetary("111001", dec(-5), "RSD"),
                Posting::monetary("111002", dec(5), "RSD"),
            ],
            "elsewhere",
        );
        assert!(matches!(ex.submit_tx(tx), Err(InterbankError::NotInvolved(OURS))));
    }

    #[test]
    fn multi_bank_submit_reserves_and_enqueues() {
        let ex = executor();
        let id = ex.submit_tx(outbound(300)).unwrap();

        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::AwaitingVotes));
        assert_eq!(balances(&ex, "444001"), (dec(1000), dec(700)));

        let outbox = ex.database().outbox_messages().unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].destination, PEER);
        let Message::NewTx(envelope) = serde_json::from_str::<Message>(&outbox[0].body).unwrap() else {
            panic!("expected NEW_TX");
        };
        assert_eq!(envelope.message.transaction_id, Some(id));
        assert_eq!(envelope.idempotence_key, outbox[0].idempotence_key);
    }

    #[test]
    fn yes_vote_commits_and_notifies_peer() {
        let ex = executor();
        let id = ex.submit_tx(outbound(300)).unwrap();
        let key = new_tx_key(&ex);

        ex.acknowledge(&key, DeliveryReceipt::Vote(VoteResponse::Yes))
            .unwrap();
        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::Committed));
        assert_eq!(balances(&ex, "444001"), (dec(700), dec(700)));

        let pending: Vec<_> = ex
            .database()
            .outbox_messages()
            .unwrap()
            .into_iter()
            .filter(|m| !m.delivered)
            .collect();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].body.contains("COMMIT_TX"));
    }

    #[test]
    fn no_vote_releases_and_rolls_back() {
        let ex = executor();
        let id = ex.submit_tx(outbound(300)).unwrap();
        let key = new_tx_key(&ex);

        let vote = VoteResponse::from_reasons(vec![NoVoteReason::UnbalancedTx]);
        ex.acknowledge(&key, DeliveryReceipt::Vote(vote)).unwrap();
        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::RolledBack));
        assert_eq!(balances(&ex, "444001"), (dec(1000), dec(1000)));
        assert!(
            ex.database()
                .outbox_messages()
                .unwrap()
                .iter()
                .any(|m| m.body.contains("ROLLBACK_TX"))
        );
    }

    #[test]
    fn repeated_acknowledgement_counts_once() {
        let ex = executor();
        let id = ex.submit_tx(outbound(300)).unwrap();
        let key = new_tx_key(&ex);

        ex.acknowledge(&key, DeliveryReceipt::Vote(VoteResponse::Yes))
            .unwrap();
        ex.acknowledge(&key, DeliveryReceipt::Vote(VoteResponse::Yes))
            .unwrap();
        let rec = ex.database().executing(&id).unwrap().unwrap();
        assert_eq!(rec.votes_cast, 2);
        assert_eq!(balances(&ex, "444001"), (dec(700), dec(700)));
    }

    #[test]
    fn new_tx_without_vote_is_a_protocol_violation() {
        let ex = executor();
        ex.submit_tx(outbound(300)).unwrap();
        let key = new_tx_key(&ex);

        let err = ex
            .acknowledge(&key, DeliveryReceipt::Acknowledged)
            .unwrap_err();
        assert!(matches!(err, InterbankError::ProtocolViolation(_)));
        let row = ex.database().outbox_messages().unwrap().remove(0);
        assert!(!row.delivered);
    }

    #[test]
    fn unknown_outbox_key_is_an_error() {
        let ex = executor();
        let err = ex
            .acknowledge(&IdempotenceKey::new(OURS, "ghost"), DeliveryReceipt::Acknowledged)
            .unwrap_err();
        assert!(matches!(err, InterbankError::NoSuchOutboxMessage(_)));
    }

    #[test]
    fn outbox_resends_after_interval() {
        let ex = executor();
        ex.submit_tx(outbound(1)).unwrap();
        let t0 = Utc::now();
        let interval = chrono::Duration::from_std(ex.config().resend_interval()).unwrap();

        assert_eq!(ex.process_outbox_at(t0).unwrap().len(), 1);
        // Just sent: not due again until the interval has passed.
        assert!(ex.process_outbox_at(t0 + chrono::Duration::seconds(1)).unwrap().is_empty());
        let again = ex
            .process_outbox_at(t0 + interval + chrono::Duration::seconds(1))
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].last_sent_at, Some(t0 + interval + chrono::Duration::seconds(1)));
    }

    #[test]
    fn stale_votes_expire_into_rollback() {
        let ex = executor();
        let id = ex.submit_tx(outbound(300)).unwrap();

        assert_eq!(ex.expire_stale_votes().unwrap(), 0);
        let later = Utc::now()
            + chrono::Duration::from_std(ex.config().vote_timeout()).unwrap()
            + chrono::Duration::seconds(1);
        assert_eq!(ex.expire_stale_votes_at(later).unwrap(), 1);
        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::RolledBack));
        assert_eq!(balances(&ex, "444001"), (dec(1000), dec(1000)));

        // A vote arriving after the timeout changes nothing.
        let key = new_tx_key(&ex);
        ex.acknowledge(&key, DeliveryReceipt::Vote(VoteResponse::Yes))
            .unwrap();
        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::RolledBack));
    }

    #[test]
    fn decided_transaction_stops_proposing() {
        let ex = executor();
        ex.submit_tx(outbound(300)).unwrap();
        let later = Utc::now()
            + chrono::Duration::from_std(ex.config().vote_timeout()).unwrap()
            + chrono::Duration::seconds(1);
        ex.expire_stale_votes_at(later).unwrap();

        let much_later = later + chrono::Duration::days(32);
        ex.prune_finalized_at(much_later).unwrap();
        let due = ex.process_outbox_at(much_later).unwrap();
        assert_eq!(due.len(), 1);
        assert!(due[0].body.contains("ROLLBACK_TX"));
    }

    #[test]
    fn refused_new_tx_counts_as_no() {
        let ex = executor();
        let id = ex.submit_tx(outbound(300)).unwrap();
        let key = new_tx_key(&ex);

        ex.acknowledge(&key, DeliveryReceipt::Rejected("HTTP 400 Bad Request".into()))
            .unwrap();
        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::RolledBack));
        assert_eq!(balances(&ex, "444001"), (dec(1000), dec(1000)));
        let outbox = ex.database().outbox_messages().unwrap();
        assert!(outbox.iter().any(|m| m.idempotence_key == key && m.delivered));
        assert!(outbox.iter().any(|m| !m.delivered && m.body.contains("ROLLBACK_TX")));
    }

    #[test]
    fn corrupt_outbox_body_is_an_internal_fault() {
        let ex = executor();
        let key = IdempotenceKey::new(OURS, "garbled");
        {
            let mut unit = ex.database().begin();
            unit.enqueue(OutboxMessage::new(key.clone(), PEER, "garbage".into()))
                .unwrap();
            unit.commit().unwrap();
        }
        let err = ex
            .acknowledge(&key, DeliveryReceipt::Acknowledged)
            .unwrap_err();
        assert!(matches!(err, InterbankError::Internal(_)));
    }

    #[test]
    fn prune_drops_old_finalized_rows() {
        let ex = executor();
        let id = ex.submit_tx(deposit(1)).unwrap();
        assert_eq!(ex.prune_finalized().unwrap().total(), 0);

        let later = Utc::now()
            + chrono::Duration::from_std(ex.config().retention()).unwrap()
            + chrono::Duration::seconds(1);
        let stats = ex.prune_finalized_at(later).unwrap();
        assert_eq!(stats.executing, 1);
        assert!(ex.status(&id).unwrap().is_none());
    }

    #[test]
    fn immediate_tx_rides_caller_unit() {
        let ex = executor();
        let db = Arc::clone(ex.database());
        let tx = Transaction::new(
            vec![
                Posting::monetary("444001", dec(-250), "RSD"),
                Posting::monetary("444002", dec(250), "RSD"),
            ],
            "internal",
        );

        let mut unit = db.begin();
        let id = ex.submit_immediate_tx(&mut unit, tx.clone()).unwrap();
        // Not visible until the caller commits.
        assert_eq!(balances(&ex, "444002"), (dec(0), dec(0)));
        unit.commit().unwrap();
        assert_eq!(balances(&ex, "444001"), (dec(750), dec(750)));
        assert_eq!(balances(&ex, "444002"), (dec(250), dec(250)));
        assert_eq!(ex.status(&id).unwrap(), Some(TxStatus::Committed));

        // The caller's rollback undoes everything.
        let mut unit = db.begin();
        ex.submit_immediate_tx(&mut unit, tx).unwrap();
        unit.rollback();
        assert_eq!(balances(&ex, "444001"), (dec(750), dec(750)));
    }

    #[test]
    fn immediate_tx_rejects_peers_and_poisons_unit() {
        let ex = executor();
        let db = Arc::clone(ex.database());
        let mut unit = db.begin();
        let err = ex.submit_immediate_tx(&mut unit, outbound(1)).unwrap_err();
        assert!(matches!(err, InterbankError::NotLocalOnly { .. }));
        assert!(unit.is_rollback_only());
        assert!(ex.database().outbox_messages().unwrap().is_empty());
    }

    #[test]
    fn immediate_no_vote_marks_unit_rollback_only() {
        let ex = executor();
        let db = Arc::clone(ex.database());
        let tx = Transaction::new(
            vec![
                Posting::monetary("444002", dec(-1), "RSD"),
                Posting::monetary("444001", dec(1), "RSD"),
            ],
            "overdraw",
        );
        let mut unit = db.begin();
        let err = ex.submit_immediate_tx(&mut unit, tx).unwrap_err();
        assert!(err.is_vote_no());
        assert!(matches!(unit.commit(), Err(InterbankError::RollbackOnly)));
    }
}
