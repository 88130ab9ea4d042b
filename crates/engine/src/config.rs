use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::time::millis_to_ticks;
use serde::{Deserialize, Serialize};

/// Tunables for the orchestration layer and simulated media.
///
/// Missing fields fall back to [`EngineConfig::default`], so a config file only
/// needs to name what it changes:
///
/// ```
/// use engine::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{ "boundary_epsilon_ms": 20 }"#)
///     .expect("valid config");
/// assert_eq!(config.boundary_epsilon_ms, 20);
/// assert_eq!(config.load_retry_limit, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Native time within this distance of a clip's out-point counts as its end.
    pub boundary_epsilon_ms: u64,
    /// Extra attempts after a failed source load before the session enters `error`.
    pub load_retry_limit: u32,
    /// Fixed delay before each load retry.
    pub load_retry_backoff_ms: u64,
    /// Capacity of the session event queue.
    pub command_channel_capacity: usize,
    /// Interval between `timeupdate` events emitted by the simulated player.
    pub simulated_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            boundary_epsilon_ms: 50,
            load_retry_limit: 1,
            load_retry_backoff_ms: 250,
            command_channel_capacity: 32,
            simulated_tick_ms: 50,
        }
    }
}

impl EngineConfig {
    /// Reads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| EngineError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| EngineError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn boundary_epsilon_tl(&self) -> i64 {
        millis_to_ticks(self.boundary_epsilon_ms)
    }

    pub fn load_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.load_retry_backoff_ms)
    }

    pub fn simulated_tick(&self) -> Duration {
        Duration::from_millis(self.simulated_tick_ms.max(1))
    }
}
