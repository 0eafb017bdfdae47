use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{FlowGuardError, Result};
use crate::processor::flow::{FlowTimeouts, FLOW_TIMEOUT_US, IDLE_THRESHOLD_US};

/// Every tunable of the detector. Missing JSON fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Flows silent for longer than this are evicted (µs)
    pub flow_timeout_us: u64,
    /// Gap that splits active and idle periods (µs)
    pub idle_threshold_us: u64,
    /// Minimum spacing between idle sweeps of the flow table (µs)
    pub sweep_interval_us: u64,
    pub attack_window_secs: u64,
    /// A victim queue must hold more than this many attacks to trigger blocking
    pub attack_threshold: usize,
    pub block_lifetime_secs: u64,
    pub rule_priority: u32,
    pub rule_request_timeout_ms: u64,
    pub tick_interval_ms: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            flow_timeout_us: FLOW_TIMEOUT_US,
            idle_threshold_us: IDLE_THRESHOLD_US,
            sweep_interval_us: 1_000_000,
            attack_window_secs: 90,
            attack_threshold: 1,
            block_lifetime_secs: 300,
            rule_priority: 40_000,
            rule_request_timeout_ms: 2_000,
            tick_interval_ms: 1_000,
        }
    }
}

impl DetectorConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| FlowGuardError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("flow_timeout_us", self.flow_timeout_us),
            ("idle_threshold_us", self.idle_threshold_us),
            ("attack_window_secs", self.attack_window_secs),
            ("block_lifetime_secs", self.block_lifetime_secs),
            ("rule_request_timeout_ms", self.rule_request_timeout_ms),
            ("tick_interval_ms", self.tick_interval_ms),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(FlowGuardError::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.idle_threshold_us >= self.flow_timeout_us {
            return Err(FlowGuardError::Config(format!(
                "idle_threshold_us ({}) must be below flow_timeout_us ({})",
                self.idle_threshold_us, self.flow_timeout_us
            )));
        }
        Ok(())
    }

    pub fn flow_timeouts(&self) -> FlowTimeouts {
        FlowTimeouts {
            flow_timeout_us: self.flow_timeout_us,
            idle_threshold_us: self.idle_threshold_us,
        }
    }

    pub fn attack_window_us(&self) -> u64 {
        self.attack_window_secs.saturating_mul(1_000_000)
    }

    pub fn block_lifetime_us(&self) -> u64 {
        self.block_lifetime_secs.saturating_mul(1_000_000)
    }

    pub fn rule_request_timeout(&self) -> Duration {
        Duration::from_millis(self.rule_request_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
