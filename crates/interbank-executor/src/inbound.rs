//! Participant side: messages arriving from peer banks.
//!
//! The inbox is consulted before anything else. A key seen before replays
//! the stored response without touching state, so a peer may redeliver as
//! often as it likes. Each inbound effect and its inbox row commit in one
//! unit of work.

use interbank_types::{
    ExecutingTransaction, ForeignBankId, IdempotenceKey, InboxMessage, InterbankError, Message,
    Result, RoutingNumber, Transaction, TxRole, TxStatus, VoteResponse,
};
use tracing::{debug, info, warn};

use crate::{
    InterbankExecutor,
    executor::{decode, decode_stored, encode},
};

/// What the HTTP layer sends back for an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundReply {
    /// Our vote on a `NEW_TX`.
    Vote(VoteResponse),
    /// `COMMIT_TX` / `ROLLBACK_TX` accepted; no body.
    Accepted,
}

/// Decision a peer asked us to apply.
#[derive(Debug, Clone, Copy)]
enum Decision {
    Commit,
    Rollback,
}

impl InterbankExecutor {
    /// Handle a message from the authenticated peer `sender`.
    ///
    /// # Errors
    /// - `Unauthenticated` if the idempotence key was issued by another bank.
    /// - Validation errors for a `NEW_TX` we cannot vote on
    ///   (`MissingTransactionId`, `InvalidAccountNumber`,
    ///   `UnknownDestination`, `NotInvolved`).
    pub fn handle_message(&self, sender: RoutingNumber, message: Message) -> Result<InboundReply> {
        let key = message.idempotence_key().clone();
        if key.routing_number != sender {
            return Err(InterbankError::Unauthenticated(format!(
                "bank {sender} sent a message keyed by bank {}",
                key.routing_number
            )));
        }

        let _key = self.lock_key();
        if let Some(seen) = self.database().inbox_message(&key)? {
            info!(idempotence_key = %key, kind = message.kind(), "Redelivery, replaying response");
            return replay(&seen, &message);
        }

        match message {
            Message::NewTx(envelope) => self.on_new_tx(sender, key, envelope.message),
            Message::CommitTx(envelope) => {
                self.on_decision(sender, key, &envelope.message.transaction_id, Decision::Commit)
            }
            Message::RollbackTx(envelope) => {
                self.on_decision(sender, key, &envelope.message.transaction_id, Decision::Rollback)
            }
        }
    }

    fn on_new_tx(
        &self,
        sender: RoutingNumber,
        key: IdempotenceKey,
        tx: Transaction,
    ) -> Result<InboundReply> {
        let id = tx
            .transaction_id
            .clone()
            .ok_or(InterbankError::MissingTransactionId)?;
        if id.routing_number != sender {
            return Err(InterbankError::ProtocolViolation(format!(
                "bank {sender} proposed transaction {id} owned by another bank"
            )));
        }
        let ours = self.routing_number();
        let destinations = self.destinations(&tx)?;
        if !destinations.contains(&ours) {
            return Err(InterbankError::NotInvolved(ours));
        }

        let db = self.database();
        let mut unit = db.begin();

        // Same transaction under a new key. While it is pending we hold the
        // reservations and stand by our YES; once decided, nothing is held.
        if let Some(existing) = unit.executing(&id)? {
            let vote = if existing.status.is_final() {
                VoteResponse::No {
                    reasons: Vec::new(),
                }
            } else {
                VoteResponse::Yes
            };
            info!(
                transaction_id = %id,
                status = %existing.status,
                vote = ?vote,
                "NEW_TX repeated under a new key"
            );
            unit.record_inbox(InboxMessage::new(key, Some(encode(&vote)?)))?;
            unit.commit()?;
            return Ok(InboundReply::Vote(vote));
        }

        let reasons = self.engine().prepare(&mut unit, &tx)?;
        let vote = VoteResponse::from_reasons(reasons);
        let response = encode(&vote)?;

        if vote.is_yes() {
            let votes_needed = u32::try_from(destinations.len())
                .map_err(|_| InterbankError::Internal("too many destinations".into()))?;
            unit.record_executing(ExecutingTransaction::prepared(
                id.clone(),
                encode(&tx)?,
                votes_needed,
                TxRole::Participant { initiator: sender },
            ))?;
            unit.record_inbox(InboxMessage::new(key, Some(response)))?;
            unit.commit()?;
        } else {
            unit.rollback();
            let mut unit = db.begin();
            unit.record_inbox(InboxMessage::new(key, Some(response)))?;
            unit.commit()?;
        }

        info!(transaction_id = %id, initiator = %sender, vote = ?vote, "Voted");
        Ok(InboundReply::Vote(vote))
    }

    fn on_decision(
        &self,
        sender: RoutingNumber,
        key: IdempotenceKey,
        id: &ForeignBankId,
        decision: Decision,
    ) -> Result<InboundReply> {
        let mut unit = self.database().begin();

        match unit.executing(id)? {
            None => {
                if id.routing_number != sender {
                    return Err(InterbankError::Unauthenticated(format!(
                        "bank {sender} is not the initiator of {id}"
                    )));
                }
                warn!(transaction_id = %id, decision = ?decision, "Decision for unknown transaction");
                // The NEW_TX may still be on its way; make sure it finds the
                // transaction already rolled back.
                if let Decision::Rollback = decision {
                    unit.record_executing(ExecutingTransaction::rolled_back_unseen(
                        id.clone(),
                        sender,
                    ))?;
                }
            }
            Some(record) if record.status.is_final() => {
                debug!(transaction_id = %id, status = %record.status, "Decision for finalized transaction ignored");
            }
            Some(record) => {
                let TxRole::Participant { initiator } = record.role else {
                    return Err(InterbankError::ProtocolViolation(format!(
                        "bank {sender} sent a decision for our own transaction {id}"
                    )));
                };
                if initiator != sender {
                    return Err(InterbankError::Unauthenticated(format!(
                        "bank {sender} is not the initiator of {id}"
                    )));
                }
                self.apply_decision(&mut unit, record, decision)?;
            }
        }

        unit.record_inbox(InboxMessage::new(key, None))?;
        unit.commit()?;
        Ok(InboundReply::Accepted)
    }

    fn apply_decision(
        &self,
        unit: &mut interbank_store::UnitOfWork<'_>,
        mut record: ExecutingTransaction,
        decision: Decision,
    ) -> Result<()> {
        let tx = decode(&record.tx_body)?;
        match decision {
            Decision::Commit => {
                self.engine().commit(unit, &tx)?;
                record.finalize(TxStatus::Committed)?;
            }
            Decision::Rollback => {
                self.engine().release(unit, &tx)?;
                record.finalize(TxStatus::RolledBack)?;
            }
        }
        info!(transaction_id = %record.transaction_id, status = %record.status, "Decision applied");
        unit.save_executing(record)
    }
}

fn replay(seen: &InboxMessage, message: &Message) -> Result<InboundReply> {
    match message {
        Message::NewTx(_) => {
            let body = seen.response.as_deref().ok_or_else(|| {
                InterbankError::Internal(format!(
                    "inbox row {} has no stored vote",
                    seen.idempotence_key
                ))
            })?;
            Ok(InboundReply::Vote(decode_stored("vote", body)?))
        }
        Message::CommitTx(_) | Message::RollbackTx(_) => Ok(InboundReply::Accepted),
    }
}
