use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Tuning of the tree driver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Simulated duration of one tick, in seconds.
    pub tick_seconds: f64,
    /// Upper bound of node executions per branch and tick. Guards against
    /// subtrees that conclude instantly forever.
    pub max_steps_per_tick: usize,
    /// Start over from the root on the tick after the tree concluded.
    pub restart_on_completion: bool,
    pub start_paused: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 1. / 60.,
            max_steps_per_tick: 1024,
            restart_on_completion: true,
            start_paused: false,
        }
    }
}

impl DriverConfig {
    pub fn from_yaml(src: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_seconds > 0.) {
            return Err(ConfigError::NotPositive {
                field: "tick_seconds",
            });
        }
        if self.max_steps_per_tick == 0 {
            return Err(ConfigError::NotPositive {
                field: "max_steps_per_tick",
            });
        }
        Ok(())
    }
}
