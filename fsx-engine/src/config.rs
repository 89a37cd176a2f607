//! Engine tuning: poll cadence, absence tolerance and timeout overrides.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kind::ResourceKind;
use crate::profile::Timeouts;
use crate::wait::{DEFAULT_NOT_FOUND_CHECKS, DEFAULT_POLL_INTERVAL};

/// Largest accepted `timeout_scale`.
pub const MAX_TIMEOUT_SCALE: f64 = 1000.0;

/// Largest accepted timeout override: one year.
pub const MAX_TIMEOUT_MINUTES: u64 = 365 * 24 * 60;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid engine config: {0}")]
pub struct ConfigError(pub String);

/// Per-kind timeout override, in minutes. Unset fields keep the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeoutOverride {
    #[serde(default)]
    pub create_minutes: Option<u64>,
    #[serde(default)]
    pub update_minutes: Option<u64>,
    #[serde(default)]
    pub delete_minutes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Delay between two polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Consecutive absent polls tolerated while waiting for a resource to appear.
    pub not_found_checks: u32,
    /// Multiplier applied to every timeout after overrides.
    pub timeout_scale: f64,
    pub timeouts: BTreeMap<ResourceKind, TimeoutOverride>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            not_found_checks: DEFAULT_NOT_FOUND_CHECKS,
            timeout_scale: 1.0,
            timeouts: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_timeout_scale(mut self, scale: f64) -> Self {
        self.timeout_scale = scale;
        self
    }

    /// Reject values that cannot describe a usable wait.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.timeout_scale.is_finite()
            && self.timeout_scale > 0.0
            && self.timeout_scale <= MAX_TIMEOUT_SCALE)
        {
            return Err(ConfigError(format!(
                "timeout_scale must be in (0, {}], got {}",
                MAX_TIMEOUT_SCALE, self.timeout_scale
            )));
        }
        for (kind, o) in &self.timeouts {
            for (field, value) in [
                ("create_minutes", o.create_minutes),
                ("update_minutes", o.update_minutes),
                ("delete_minutes", o.delete_minutes),
            ] {
                match value {
                    Some(0) => {
                        return Err(ConfigError(format!("{}.{} must not be zero", kind, field)));
                    }
                    Some(m) if m > MAX_TIMEOUT_MINUTES => {
                        return Err(ConfigError(format!(
                            "{}.{} exceeds {} minutes",
                            kind, field, MAX_TIMEOUT_MINUTES
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Effective timeouts for a kind: defaults, then overrides, then scale.
    pub fn timeouts_for(&self, kind: ResourceKind) -> Timeouts {
        let mut timeouts = Timeouts::defaults_for(kind);
        if let Some(o) = self.timeouts.get(&kind) {
            if let Some(m) = o.create_minutes {
                timeouts.create = minutes(m);
            }
            if let Some(m) = o.update_minutes {
                timeouts.update = minutes(m);
            }
            if let Some(m) = o.delete_minutes {
                timeouts.delete = minutes(m);
            }
        }
        if self.timeout_scale > 0.0 && self.timeout_scale != 1.0 {
            timeouts = timeouts.scaled(self.timeout_scale);
        }
        timeouts
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}
