//! # config
//!
//! why: keep every timing constant of the protocol in one injectable place
//! relations: read by node.rs (stored per node) and raft-runtime (timer durations, rng seed)
//! what: RaftConfig with defaults, validation and json loading

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::RaftError;

/// Timing configuration for a node. All values are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout
    pub election_timeout_min: u64,
    /// Upper bound (inclusive) of the randomized election timeout
    pub election_timeout_max: u64,
    /// Period between two leader heartbeats
    pub heartbeat_interval: u64,
    /// Seed for the per-node random source; mixed with the node id so
    /// nodes sharing a config still draw different timeouts
    pub seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 1500,
            election_timeout_max: 3000,
            heartbeat_interval: 1500,
            seed: None,
        }
    }
}

impl RaftConfig {
    /// Parse a config from json; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, RaftError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), RaftError> {
        if self.election_timeout_min == 0 {
            return Err(RaftError::InvalidConfig(
                "election_timeout_min must be positive".into(),
            ));
        }
        if self.election_timeout_min > self.election_timeout_max {
            return Err(RaftError::InvalidConfig(format!(
                "election_timeout_min ({}) exceeds election_timeout_max ({})",
                self.election_timeout_min, self.election_timeout_max
            )));
        }
        if self.heartbeat_interval == 0 {
            return Err(RaftError::InvalidConfig(
                "heartbeat_interval must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }

    /// Seed for node `id`, if this config is seeded
    pub fn seed_for(&self, id: u64) -> Option<u64> {
        self.seed.map(|seed| seed.wrapping_add(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_timings() {
        let config = RaftConfig::default();
        assert_eq!(config.election_timeout_min, 1500);
        assert_eq!(config.election_timeout_max, 3000);
        assert_eq!(config.heartbeat_interval, 1500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RaftConfig::from_json(r#"{ "heartbeat_interval": 50, "seed": 7 }"#).unwrap();
        assert_eq!(config.heartbeat_interval, 50);
        assert_eq!(config.election_timeout_min, 1500);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn inverted_timeout_range_is_rejected() {
        let config = RaftConfig {
            election_timeout_min: 300,
            election_timeout_max: 150,
            ..RaftConfig::default()
        };
        assert!(matches!(config.validate(), Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn zero_heartbeat_is_rejected() {
        let result = RaftConfig::from_json(r#"{ "heartbeat_interval": 0 }"#);
        assert!(matches!(result, Err(RaftError::InvalidConfig(_))));
    }

    #[test]
    fn seed_is_mixed_with_node_id() {
        let config = RaftConfig {
            seed: Some(100),
            ..RaftConfig::default()
        };
        assert_eq!(config.seed_for(1), Some(101));
        assert_eq!(config.seed_for(2), Some(102));
        assert_eq!(RaftConfig::default().seed_for(1), None);
    }
}
