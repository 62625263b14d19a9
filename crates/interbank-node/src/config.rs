//! Node configuration, loaded from YAML.
//!
//! ```yaml
//! listen: "0.0.0.0:8444"
//! journal_path: "./data/bank-444.json"
//! log:
//!   level: info
//!   use_json: false
//! bank:
//!   routing_number: 444
//!   peers:
//!     - routing_number: 111
//!       api_key: "..."
//!       base_url: "http://bank-111:8111"
//! accounts:
//!   - number: "444000000000001"
//!     currency: RSD
//!     balance: "1000"
//! ```

use std::{fs, path::Path, path::PathBuf, time::Duration};

use interbank_types::{
    Account, AccountNumber, BankConfig, InterbankError, Result, constants,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Address the interbank endpoint listens on.
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Snapshot file for the store. In-memory only when absent.
    #[serde(default)]
    pub journal_path: Option<PathBuf>,
    /// Timeout for one HTTP delivery attempt.
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
    #[serde(default)]
    pub log: LogConfig,
    pub bank: BankConfig,
    /// Accounts opened at startup if they do not exist yet.
    #[serde(default)]
    pub accounts: Vec<AccountSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub use_json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            use_json: false,
        }
    }
}

/// An account to open at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSeed {
    pub number: AccountNumber,
    pub currency: String,
    pub balance: Decimal,
}

impl AccountSeed {
    #[must_use]
    pub fn to_account(&self) -> Account {
        Account::new(self.number.clone(), self.currency.clone(), self.balance)
    }
}

fn default_listen() -> String {
    format!("0.0.0.0:8{:03}", constants::DEFAULT_ROUTING_NUMBER)
}

fn default_delivery_timeout_ms() -> u64 {
    constants::DEFAULT_DELIVERY_TIMEOUT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl NodeConfig {
    /// Read and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            InterbankError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| InterbankError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.bank.routing_table()?;
        for seed in &self.accounts {
            if seed.number.routing_number() != Some(self.bank.routing_number) {
                return Err(InterbankError::Configuration(format!(
                    "seed account {} does not belong to bank {}",
                    seed.number, self.bank.routing_number
                )));
            }
            if seed.balance < Decimal::ZERO {
                return Err(InterbankError::Configuration(format!(
                    "seed account {} has a negative balance",
                    seed.number
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}
