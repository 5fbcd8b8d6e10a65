//! Configuration: candidate pools and transport tuning.
//!
//! The candidate pools are supplied externally through the configuration
//! file; the client never discovers nodes on its own.

mod loader;

use std::time::Duration;

use serde::Deserialize;

pub use loader::{get_default_config, load_settings, write_config_to};

fn default_request_timeout_ms() -> u64 {
    2_000
}

fn default_probe_timeout_ms() -> u64 {
    2_000
}

fn default_attempts() -> u32 {
    3
}

fn default_use_ranking() -> bool {
    true
}

fn default_reconnect_delay_ms() -> u64 {
    100
}

/// Top-level settings, deserialized from `config.toml` plus environment
/// overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeSettings,
    pub electrumx: ElectrumSettings,
}

/// The blockchain node pool and its HTTP call tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    /// Candidate node RPC endpoints.
    pub urls: Vec<String>,
    /// Hard deadline per attempt, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline per rating probe, in milliseconds.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Attempt budget per logical call.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Use the consensus ranking; when off, calls shuffle the raw pool.
    #[serde(default = "default_use_ranking")]
    pub use_ranking: bool,
}

impl NodeSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// The indexer socket pool and its reconnect tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct ElectrumSettings {
    /// Candidate indexer addresses, `host:port`.
    pub addrs: Vec<String>,
    /// Delay before redialing after a failure, in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Send attempts per logical call, with a reconnect between each.
    #[serde(default = "default_attempts")]
    pub reconnect_attempts: u32,
}

impl ElectrumSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
