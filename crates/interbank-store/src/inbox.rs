//! Inbox: idempotence keys of inbound messages already processed, with the
//! response given. Recorded in the same unit as the message's effects.

use interbank_types::{IdempotenceKey, InboxMessage, Result};
use tracing::debug;

use crate::{UnitOfWork, unit::read_through};

impl UnitOfWork<'_> {
    pub fn inbox_message(&self, key: &IdempotenceKey) -> Result<Option<InboxMessage>> {
        let tables = self.db.tables()?;
        Ok(read_through(&self.staged.inbox, &tables.inbox, key))
    }

    /// Remember that `msg.idempotence_key` was processed.
    pub fn record_inbox(&mut self, msg: InboxMessage) -> Result<()> {
        self.ensure_writable()?;
        debug!(key = %msg.idempotence_key, "Inbox entry recorded");
        self.staged
            .inbox
            .insert(msg.idempotence_key.clone(), msg);
        Ok(())
    }
}
