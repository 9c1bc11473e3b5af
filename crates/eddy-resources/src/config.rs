//! Resource manager configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Knobs for slots, cache, spill, and checkpointing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Maximum concurrent in-flight fetches.
    pub max_in_flight: usize,
    /// LRU page cache capacity; 0 disables the cache entirely.
    pub cache_capacity: usize,
    /// Directory for spilled cache entries; `None` drops evictions instead.
    pub spill_dir: Option<PathBuf>,
    /// Checkpoint file path; `None` disables checkpointing.
    pub checkpoint_path: Option<PathBuf>,
    /// Flush interval for the checkpoint batcher.
    pub checkpoint_interval: Duration,
    /// Capacity of the checkpoint queue; overflow drops with a counter.
    pub checkpoint_queue: usize,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            cache_capacity: 256,
            spill_dir: None,
            checkpoint_path: None,
            checkpoint_interval: Duration::from_millis(50),
            checkpoint_queue: 1024,
        }
    }
}

impl ResourceConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_in_flight == 0 {
            return Err("resources max_in_flight must be > 0".into());
        }
        if self.checkpoint_interval.is_zero() {
            return Err("resources checkpoint_interval must be > 0".into());
        }
        if self.checkpoint_path.is_some() && self.checkpoint_queue == 0 {
            return Err("resources checkpoint_queue must be > 0 when checkpointing".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(ResourceConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_in_flight_is_rejected() {
        let config = ResourceConfig {
            max_in_flight: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
