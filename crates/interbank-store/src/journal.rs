//! On-disk journal: a JSON snapshot of every table, rewritten atomically on
//! each commit (write to a temporary file, fsync, rename over the old one).

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use interbank_types::{
    Account, ExecutingTransaction, InboxMessage, InterbankError, OutboxMessage, Result,
};
use serde::{Deserialize, Serialize};

/// Serialized form of the database. Rows are stored as lists because the
/// table keys are structured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub executing: Vec<ExecutingTransaction>,
    #[serde(default)]
    pub outbox: Vec<OutboxMessage>,
    #[serde(default)]
    pub inbox: Vec<InboxMessage>,
}

/// Snapshot file location.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the last committed snapshot. `None` if nothing was written yet.
    pub fn load(&self) -> Result<Option<Snapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| journal_err(&self.path, &e))?;
        let snapshot = serde_json::from_str(&raw).map_err(|e| journal_err(&self.path, &e))?;
        Ok(Some(snapshot))
    }

    /// Replace the snapshot on disk.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| journal_err(parent, &e))?;
        }
        let json = serde_json::to_vec(snapshot)
            .map_err(|e| InterbankError::Journal(format!("encode snapshot: {e}")))?;

        let tmp = self.path.with_extension("tmp");
        let mut file = File::create(&tmp).map_err(|e| journal_err(&tmp, &e))?;
        file.write_all(&json).map_err(|e| journal_err(&tmp, &e))?;
        file.sync_all().map_err(|e| journal_err(&tmp, &e))?;
        fs::rename(&tmp, &self.path).map_err(|e| journal_err(&self.path, &e))?;
        Ok(())
    }
}

fn journal_err(path: &Path, err: &dyn std::fmt::Display) -> InterbankError {
    InterbankError::Journal(format!("{}: {err}", path.display()))
}
