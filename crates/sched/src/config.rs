use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use updatecast_common::Priority;
use updatecast_queue::ThrottleConfig;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

/// Ranking and re-rank policy for one viewpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Viewpoint movement (world units) that forces a full re-rank.
    pub resort_distance: f32,
    /// Cap on an entity's distance score, in squared world units.
    pub max_priority: Priority,
    /// Multiplier on the squared bounding-box diagonal subtracted from the score.
    pub size_bonus_factor: f32,
    /// Delay after a repeated change before a re-rank is forced.
    pub grace_window_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resort_distance: 15.0,
            max_priority: 90 * 90,
            size_bonus_factor: 12.0,
            grace_window_ms: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.resort_distance.is_finite() || self.resort_distance < 0.0 {
            return Err(ConfigError::Invalid {
                field: "resort_distance",
                reason: "must be a finite, non-negative distance",
            });
        }
        if !self.size_bonus_factor.is_finite() || self.size_bonus_factor < 0.0 {
            return Err(ConfigError::Invalid {
                field: "size_bonus_factor",
                reason: "must be finite and non-negative",
            });
        }
        Ok(())
    }
}

/// Everything a viewpoint session needs: scheduling policy plus its outbound link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatecastConfig {
    pub scheduler: SchedulerConfig,
    pub throttle: ThrottleConfig,
}

impl UpdatecastConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scheduler.validate()?;
        if self.throttle.refresh_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "throttle.refresh_interval_ms",
                reason: "must be positive",
            });
        }
        if self.throttle.min_bytes_per_sec > self.throttle.max_bytes_per_sec {
            return Err(ConfigError::Invalid {
                field: "throttle.min_bytes_per_sec",
                reason: "must not exceed max_bytes_per_sec",
            });
        }
        Ok(())
    }
}
