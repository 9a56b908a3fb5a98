//! WolfElect Configuration
//!
//! This module provides the TOML configuration for a standalone election
//! node and the runtime [`ElectionConfig`] every node is built with.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use crate::id::NodeId;

/// Main WolfElect configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfElectConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Election timing
    #[serde(default)]
    pub election: ElectionSettings,

    /// Initial peer set
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier
    pub id: NodeId,

    /// Address to bind for election traffic
    pub bind_address: String,

    /// Timeout for outbound connections in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Election timing as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSettings {
    /// How long a candidate waits for `alive` replies
    #[serde(default = "default_election_timeout_ms")]
    pub election_timeout_ms: u64,

    /// Heartbeat interval (defaults to 3x the election timeout)
    #[serde(default)]
    pub heartbeat_interval_ms: Option<u64>,

    /// Delay before the first election (defaults to the election timeout)
    #[serde(default)]
    pub startup_delay_ms: Option<u64>,

    /// Extra silence tolerated before the master is declared dead
    #[serde(default = "default_liveness_tolerance_percent")]
    pub liveness_tolerance_percent: u32,
}

/// A statically configured peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Peer node id
    pub id: NodeId,

    /// Peer address (host:port)
    pub address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_election_timeout_ms() -> u64 {
    1000
}

fn default_liveness_tolerance_percent() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            election_timeout_ms: default_election_timeout_ms(),
            heartbeat_interval_ms: None,
            startup_delay_ms: None,
            liveness_tolerance_percent: default_liveness_tolerance_percent(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfElectConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfElectConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.bind_address.is_empty() {
            return Err(crate::Error::Config("node.bind_address cannot be empty".into()));
        }

        let mut seen = HashSet::new();
        for peer in &self.peers {
            if peer.id == self.node.id {
                return Err(crate::Error::Config(format!(
                    "peer list contains this node's own id {}",
                    peer.id
                )));
            }
            if !seen.insert(&peer.id) {
                return Err(crate::Error::Config(format!("duplicated peer id {}", peer.id)));
            }
            if peer.address.is_empty() {
                return Err(crate::Error::Config(format!("peer {} has no address", peer.id)));
            }
        }

        self.election_config().validate()
    }

    /// Build the runtime election timing
    pub fn election_config(&self) -> ElectionConfig {
        let settings = &self.election;
        let mut config = ElectionConfig::new(Duration::from_millis(settings.election_timeout_ms));
        if let Some(ms) = settings.heartbeat_interval_ms {
            config = config.with_heartbeat_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = settings.startup_delay_ms {
            config = config.with_startup_delay(Duration::from_millis(ms));
        }
        config.with_liveness_tolerance_percent(settings.liveness_tolerance_percent)
    }

    /// Get connect timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.node.connect_timeout_ms)
    }
}

/// Runtime election timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionConfig {
    /// Vote-solicitation window, also the follow-up grace period
    pub election_timeout: Duration,
    /// Master ping period, liveness check period and watchdog period
    pub heartbeat_interval: Duration,
    /// Delay before the first election; zero elects immediately
    pub startup_delay: Duration,
    /// Extra silence tolerated on top of one heartbeat interval
    pub liveness_tolerance_percent: u32,
}

impl ElectionConfig {
    /// Heartbeat interval as a multiple of the election timeout
    pub const HEARTBEAT_MULTIPLIER: u32 = 3;

    /// Derive the default timing from an election timeout
    pub fn new(election_timeout: Duration) -> Self {
        Self {
            election_timeout,
            heartbeat_interval: election_timeout * Self::HEARTBEAT_MULTIPLIER,
            startup_delay: election_timeout,
            liveness_tolerance_percent: default_liveness_tolerance_percent(),
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn with_liveness_tolerance_percent(mut self, percent: u32) -> Self {
        self.liveness_tolerance_percent = percent;
        self
    }

    /// Longest silence from the master before it is declared dead
    pub fn liveness_deadline(&self) -> Duration {
        self.heartbeat_interval + self.heartbeat_interval * self.liveness_tolerance_percent / 100
    }

    /// Validate the timing
    pub fn validate(&self) -> crate::Result<()> {
        if self.election_timeout.is_zero() {
            return Err(crate::Error::Config("election timeout must be positive".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(crate::Error::Config("heartbeat interval must be positive".into()));
        }
        Ok(())
    }
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self::new(Duration::from_millis(default_election_timeout_ms()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[node]
id = "05"
bind_address = "0.0.0.0:7700"

[election]
election_timeout_ms = 500

[[peers]]
id = "06"
address = "10.0.0.6:7700"

[[peers]]
id = "07"
address = "10.0.0.7:7700"
"#;

    #[test]
    fn test_parse_config() {
        let config = WolfElectConfig::from_str(SAMPLE).unwrap();
        assert_eq!(config.node.id.as_str(), "05");
        assert_eq!(config.peers.len(), 2);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.connect_timeout(), Duration::from_millis(1000));

        let election = config.election_config();
        assert_eq!(election.election_timeout, Duration::from_millis(500));
        assert_eq!(election.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(election.startup_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_self_in_peers() {
        let toml = r#"
[node]
id = "05"
bind_address = "0.0.0.0:7700"

[[peers]]
id = "05"
address = "10.0.0.5:7700"
"#;
        match WolfElectConfig::from_str(toml) {
            Err(crate::Error::Config(msg)) => assert!(msg.contains("own id")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_and_invalid_peers() {
        let duplicate = format!("{}\n[[peers]]\nid = \"06\"\naddress = \"10.0.0.9:7700\"\n", SAMPLE);
        assert!(WolfElectConfig::from_str(&duplicate).is_err());

        let bad_id = SAMPLE.replace("\"07\"", "\"not valid\"");
        assert!(matches!(
            WolfElectConfig::from_str(&bad_id),
            Err(crate::Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_explicit_timing_overrides() {
        let toml = r#"
[node]
id = "a"
bind_address = "127.0.0.1:7700"

[election]
election_timeout_ms = 200
heartbeat_interval_ms = 1000
startup_delay_ms = 0
liveness_tolerance_percent = 20
"#;
        let election = WolfElectConfig::from_str(toml).unwrap().election_config();
        assert_eq!(election.heartbeat_interval, Duration::from_millis(1000));
        assert!(election.startup_delay.is_zero());
        assert_eq!(election.liveness_deadline(), Duration::from_millis(1200));
    }

    #[test]
    fn test_default_liveness_deadline() {
        let config = ElectionConfig::new(Duration::from_millis(500));
        assert_eq!(config.liveness_deadline(), Duration::from_millis(1650));
        assert!(ElectionConfig::new(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = WolfElectConfig::from_file(file.path()).unwrap();
        assert_eq!(config.peers[1].id.as_str(), "07");
    }
}
