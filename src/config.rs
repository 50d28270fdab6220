use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Timing parameters of the consensus engine. All values are milliseconds.
///
/// The heartbeat timeout is both the follower's staleness window and the
/// period of its monitor timer. The election timeout is drawn uniformly from
/// the configured range on every election attempt, so competing candidates
/// desynchronize. The RPC timeout bounds each vote/membership call and is
/// shared with the replication layer's secondary-operation timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub heartbeat_timeout_ms: u64,
    pub election_timeout_min_ms: u64,
    pub election_timeout_max_ms: u64,
    pub rpc_timeout_ms: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 100,
            election_timeout_min_ms: 150,
            election_timeout_max_ms: 300,
            rpc_timeout_ms: 100,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConsensusConfig {
    /// Assert the timing invariants. A zero or inverted timeout is a logic
    /// bug in the deployment, not a runtime condition, and aborts loudly.
    pub fn validate(&self) {
        assert!(
            self.heartbeat_timeout_ms > 0,
            "heartbeat timeout must be positive"
        );
        assert!(
            self.election_timeout_min_ms > 0
                && self.election_timeout_min_ms < self.election_timeout_max_ms,
            "election timeout range must be positive with min < max"
        );
        assert!(self.rpc_timeout_ms > 0, "rpc timeout must be positive");
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
