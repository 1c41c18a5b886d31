//! Tunables shared by the storage layer, claim/return engines, and periodic runner.
//!
//! Loading these from a file or the environment is explicitly out of scope (§1 non-goals); this
//! module only defines the shape and its defaults. `fractal_server` is responsible for actually
//! populating one, however it chooses to.

use serde::{Deserialize, Serialize};

/// Batch-size ceilings enforced by the storage layer before a request even reaches the
/// database (`LimitExceededError`, §7).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiLimits {
    /// Max molecules/keyword sets/records accepted in one `add` call.
    pub add_records: usize,
    /// Max rows returned from one `query` call.
    pub query_records: usize,
    /// Max tasks a single `claim` call may return.
    pub claim_tasks: usize,
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            add_records: 1000,
            query_records: 1000,
            claim_tasks: 200,
        }
    }
}

/// Periodic-runner cadences and the staleness multiplier used for manager liveness (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicsConfig {
    /// How often `server_stats` runs, seconds.
    pub server_stats_frequency_seconds: u64,
    /// How often `manager_heartbeat_check` runs, seconds. Also the unit `N` in the staleness
    /// test `modified_on < now - N * heartbeat_frequency`.
    pub heartbeat_frequency_seconds: u64,
    /// Multiplier applied to `heartbeat_frequency_seconds` to decide staleness (default 5, §4.J).
    pub heartbeat_stale_multiplier: u64,
    /// How often `service_tick` runs, seconds.
    pub service_frequency_seconds: u64,
    /// Maximum number of service records iterated concurrently; the rest wait their turn
    /// (§4.D, §4.J).
    pub max_active_services: usize,
}

impl Default for PeriodicsConfig {
    fn default() -> Self {
        Self {
            server_stats_frequency_seconds: 60,
            heartbeat_frequency_seconds: 60,
            heartbeat_stale_multiplier: 5,
            service_frequency_seconds: 15,
            max_active_services: 20,
        }
    }
}

impl PeriodicsConfig {
    /// The staleness threshold, in seconds, past which a manager is considered dead.
    pub fn heartbeat_stale_after_seconds(&self) -> u64 {
        self.heartbeat_frequency_seconds * self.heartbeat_stale_multiplier
    }
}

/// Top-level runtime configuration, composed from the pieces above.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FractalConfig {
    pub api_limits: ApiLimits,
    pub periodics: PeriodicsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_after_applies_multiplier() {
        let cfg = PeriodicsConfig {
            heartbeat_frequency_seconds: 30,
            heartbeat_stale_multiplier: 5,
            ..Default::default()
        };
        assert_eq!(cfg.heartbeat_stale_after_seconds(), 150);
    }
}
