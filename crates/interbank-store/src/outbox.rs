//! Outbox: outbound protocol messages, one row per (message, destination).

use chrono::{DateTime, Utc};
use interbank_types::{IdempotenceKey, InterbankError, OutboxMessage, Result};

use crate::{
    UnitOfWork,
    unit::{read_through, scan},
};

impl UnitOfWork<'_> {
    /// Queue a message for delivery.
    pub fn enqueue(&mut self, msg: OutboxMessage) -> Result<()> {
        self.ensure_writable()?;
        if self.outbox_message(&msg.idempotence_key)?.is_some() {
            return Err(InterbankError::Internal(format!(
                "idempotence key {} reused",
                msg.idempotence_key
            )));
        }
        self.staged
            .outbox
            .insert(msg.idempotence_key.clone(), msg);
        Ok(())
    }

    pub fn outbox_message(&self, key: &IdempotenceKey) -> Result<Option<OutboxMessage>> {
        let tables = self.db.tables()?;
        Ok(read_through(&self.staged.outbox, &tables.outbox, key))
    }

    /// Stage an updated row.
    ///
    /// # Errors
    /// `NoSuchOutboxMessage` if it was never enqueued.
    pub fn save_outbox(&mut self, msg: OutboxMessage) -> Result<()> {
        self.ensure_writable()?;
        if self.outbox_message(&msg.idempotence_key)?.is_none() {
            return Err(InterbankError::NoSuchOutboxMessage(msg.idempotence_key));
        }
        self.staged
            .outbox
            .insert(msg.idempotence_key.clone(), msg);
        Ok(())
    }

    /// Undelivered messages not sent since `cutoff`.
    pub fn due_outbox(&self, cutoff: DateTime<Utc>) -> Result<Vec<OutboxMessage>> {
        let tables = self.db.tables()?;
        Ok(scan(&self.staged.outbox, &tables.outbox, |m| m.is_due(cutoff)))
    }

    /// Every message not yet delivered, regardless of when it was last sent.
    pub fn undelivered_outbox(&self) -> Result<Vec<OutboxMessage>> {
        let tables = self.db.tables()?;
        Ok(scan(&self.staged.outbox, &tables.outbox, |m| !m.delivered))
    }
}
