//! Bank and peer configuration.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{InterbankError, Result, RoutingNumber, constants};

/// How to reach one peer bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub routing_number: RoutingNumber,
    /// Key we present to the peer, and the peer presents to us.
    pub api_key: String,
    /// Base URL of the peer's interbank endpoint, without trailing path.
    pub base_url: String,
}

/// Configuration of this bank's protocol executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    /// Our own routing number.
    #[serde(default = "default_routing_number")]
    pub routing_number: RoutingNumber,
    /// Outbox messages not acknowledged within this interval are resent.
    #[serde(default = "default_resend_interval_ms")]
    pub resend_interval_ms: u64,
    /// Initiated transactions still waiting for votes after this long are
    /// rolled back.
    #[serde(default = "default_vote_timeout_ms")]
    pub vote_timeout_ms: u64,
    /// How long finalized records are kept.
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

fn default_routing_number() -> RoutingNumber {
    RoutingNumber(constants::DEFAULT_ROUTING_NUMBER)
}

fn default_resend_interval_ms() -> u64 {
    constants::DEFAULT_RESEND_INTERVAL_MS
}

fn default_vote_timeout_ms() -> u64 {
    constants::DEFAULT_VOTE_TIMEOUT_MS
}

fn default_retention_ms() -> u64 {
    constants::DEFAULT_RETENTION_MS
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            routing_number: default_routing_number(),
            resend_interval_ms: default_resend_interval_ms(),
            vote_timeout_ms: default_vote_timeout_ms(),
            retention_ms: default_retention_ms(),
            peers: Vec::new(),
        }
    }
}

impl BankConfig {
    #[must_use]
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    /// Period of the background resend sweep: half the resend interval.
    #[must_use]
    pub fn sweep_period(&self) -> Duration {
        Duration::from_millis((self.resend_interval_ms / 2).max(1))
    }

    #[must_use]
    pub fn vote_timeout(&self) -> Duration {
        Duration::from_millis(self.vote_timeout_ms)
    }

    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    /// Build the peer directory.
    ///
    /// # Errors
    /// Returns `Configuration` if a peer reuses our routing number, two
    /// peers share a routing number, or two peers share an API key.
    pub fn routing_table(&self) -> Result<RoutingTable> {
        RoutingTable::new(self.routing_number, self.peers.clone())
    }
}

/// Peer directory: routing number → endpoint and credentials.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    ours: RoutingNumber,
    peers: HashMap<RoutingNumber, PeerConfig>,
}

impl RoutingTable {
    /// # Errors
    /// See [`BankConfig::routing_table`].
    pub fn new(ours: RoutingNumber, peers: Vec<PeerConfig>) -> Result<Self> {
        let mut table = HashMap::with_capacity(peers.len());
        for peer in peers {
            if peer.routing_number == ours {
                return Err(InterbankError::Configuration(format!(
                    "peer entry uses our own routing number {ours}"
                )));
            }
            if table.values().any(|p: &PeerConfig| p.api_key == peer.api_key) {
                return Err(InterbankError::Configuration(format!(
                    "peer {} reuses another peer's API key",
                    peer.routing_number
                )));
            }
            let rn = peer.routing_number;
            if table.insert(rn, peer).is_some() {
                return Err(InterbankError::Configuration(format!(
                    "duplicate peer entry for {rn}"
                )));
            }
        }
        Ok(Self { ours, peers: table })
    }

    #[must_use]
    pub fn ours(&self) -> RoutingNumber {
        self.ours
    }

    /// Whether `rn` is us or a configured peer.
    #[must_use]
    pub fn is_known(&self, rn: RoutingNumber) -> bool {
        rn == self.ours || self.peers.contains_key(&rn)
    }

    /// # Errors
    /// Returns `UnknownPeer` if no entry exists.
    pub fn peer(&self, rn: RoutingNumber) -> Result<&PeerConfig> {
        self.peers.get(&rn).ok_or(InterbankError::UnknownPeer(rn))
    }

    /// The peer that presents `api_key` on inbound requests.
    #[must_use]
    pub fn peer_by_api_key(&self, api_key: &str) -> Option<&PeerConfig> {
        self.peers.values().find(|p| p.api_key == api_key)
    }
}
