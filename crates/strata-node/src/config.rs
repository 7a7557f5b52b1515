//! Configuration types for strata-node.
//! Parsed from ~/.strata/config.toml.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use strata_catchup::CatchupConfig;
use strata_peers::ConnectionPolicy;
use strata_protocol::CURRENT_PARAMS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node: NodeSection,
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub catchup: CatchupSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSection {
    /// Label used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_database")]
    pub database: String,
    /// MAIN, TEST, LOCAL or any devnet name.
    #[serde(default = "default_network")]
    pub network: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Special peers; always admitted and always dialled.
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
    #[serde(default)]
    pub connection_policy: ConnectionPolicy,
    #[serde(default)]
    pub refuse_unknown: bool,
    #[serde(default = "default_fanout")]
    pub fanout: usize,
    #[serde(default = "default_max_outgoing")]
    pub max_outgoing: usize,
    #[serde(default = "default_max_incoming")]
    pub max_incoming: usize,
    #[serde(default = "default_peer_request_interval")]
    pub peer_request_interval_secs: u64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_tip_interval")]
    pub tip_interval_secs: u64,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    /// Minimum seconds between accepted connections from one address.
    #[serde(default = "default_source_limit")]
    pub source_limit_secs: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            peers: Vec::new(),
            connection_policy: ConnectionPolicy::Normal,
            refuse_unknown: false,
            fanout: default_fanout(),
            max_outgoing: default_max_outgoing(),
            max_incoming: default_max_incoming(),
            peer_request_interval_secs: default_peer_request_interval(),
            maintenance_interval_secs: default_maintenance_interval(),
            tip_interval_secs: default_tip_interval(),
            dial_timeout_secs: default_dial_timeout(),
            source_limit_secs: default_source_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerEntry {
    /// `host:port`
    pub addr: String,
}

impl PeerEntry {
    /// Split into host and port. Bare hosts get the default port.
    pub fn host_port(&self) -> (String, String) {
        match self.addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                (host.trim_matches(|c| c == '[' || c == ']').to_string(), port.to_string())
            }
            _ => (self.addr.clone(), DEFAULT_PORT.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchupSection {
    #[serde(default = "default_window")]
    pub window: u32,
    #[serde(default = "default_ask_limit")]
    pub ask_limit: u32,
    #[serde(default = "default_catchup_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,
}

impl Default for CatchupSection {
    fn default() -> Self {
        Self {
            window: default_window(),
            ask_limit: default_ask_limit(),
            timeout_secs: default_catchup_timeout(),
            max_outstanding: default_max_outstanding(),
        }
    }
}

impl CatchupSection {
    pub fn to_catchup_config(&self) -> CatchupConfig {
        CatchupConfig {
            window: self.window,
            ask_limit: self.ask_limit,
            timeout: Duration::from_secs(self.timeout_secs),
            margin: CURRENT_PARAMS.catchup_margin,
            max_outstanding: self.max_outstanding,
        }
    }
}

const DEFAULT_PORT: u16 = 8108;

// Default value functions
fn default_name() -> String {
    "strata".into()
}
fn default_database() -> String {
    "~/.strata/strata.db".into()
}
fn default_network() -> String {
    "LOCAL".into()
}
fn default_listen_addr() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}
fn default_fanout() -> usize {
    16
}
fn default_max_outgoing() -> usize {
    32
}
fn default_max_incoming() -> usize {
    150
}
fn default_peer_request_interval() -> u64 {
    CURRENT_PARAMS.peer_request_interval_secs
}
fn default_maintenance_interval() -> u64 {
    5
}
fn default_tip_interval() -> u64 {
    10
}
fn default_dial_timeout() -> u64 {
    10
}
fn default_source_limit() -> u64 {
    CURRENT_PARAMS.source_limit_secs
}
fn default_window() -> u32 {
    CURRENT_PARAMS.catchup_window
}
fn default_ask_limit() -> u32 {
    CURRENT_PARAMS.catchup_ask_limit
}
fn default_catchup_timeout() -> u64 {
    CURRENT_PARAMS.catchup_timeout_secs
}
fn default_max_outstanding() -> usize {
    CURRENT_PARAMS.catchup_ask_limit as usize
}

impl NodeConfig {
    /// Load config from file, or create default if missing.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: NodeConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn network_id(&self) -> strata_protocol::NetworkId {
        strata_protocol::network_id(&self.node.network)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node: NodeSection {
                name: default_name(),
                database: default_database(),
                network: default_network(),
            },
            network: NetworkSection::default(),
            catchup: CatchupSection::default(),
        }
    }
}
