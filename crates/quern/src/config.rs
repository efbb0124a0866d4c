//! Engine tuning knobs.
//!
//! One `EngineConfig` is shared by a driver instance and its connection pool.
//! All fields have defaults so a config file only needs the overrides.

use crate::models::Server;
use serde::Deserialize;
use std::time::Duration;

/// Hard ceiling for a per-call execution timeout, in seconds.
const MAX_EXECUTE_TIMEOUT_SECS: u64 = 600;

/// Bounds for the connect timeout when no explicit override is set.
const MIN_CONNECT_TIMEOUT_SECS: u64 = 1;
const MAX_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Configuration for a driver instance and its pool.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a pool entry may go unaccessed before it is evicted, seconds.
    pub alive_length_secs: u64,
    /// Fixed delay between background pool sweeps, seconds.
    pub sweep_interval_secs: u64,
    /// Maximum number of backend calls running concurrently per driver.
    /// Submissions beyond this queue without bound.
    pub max_workers: usize,
    /// Connections per relational endpoint pool.
    pub relational_pool_size: usize,
    /// Default per-call execution timeout, seconds. A server-specific
    /// override wins; both are clamped to [0, 600].
    pub default_execute_timeout_secs: u64,
    /// Default connect timeout when the server does not set one, seconds.
    pub default_connect_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            alive_length_secs: 300,
            sweep_interval_secs: 30,
            max_workers: 8,
            relational_pool_size: 4,
            default_execute_timeout_secs: 30,
            default_connect_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    /// Pool access-expiry duration.
    pub fn alive_length(&self) -> Duration {
        Duration::from_secs(self.alive_length_secs)
    }

    /// Background sweep delay.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Resolve the execution timeout for one call: server override if set,
    /// else the driver default, clamped to the hard maximum.
    pub fn resolve_execute_timeout(&self, server: &Server) -> Duration {
        let secs = server
            .execute_timeout_secs
            .unwrap_or(self.default_execute_timeout_secs)
            .min(MAX_EXECUTE_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Resolve the connect timeout for handle creation. An explicit server
    /// override is taken as-is; the default is clamped to [1, 60].
    pub fn resolve_connect_timeout(&self, server: &Server) -> Duration {
        match server.connect_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None => Duration::from_secs(
                self.default_connect_timeout_secs
                    .clamp(MIN_CONNECT_TIMEOUT_SECS, MAX_CONNECT_TIMEOUT_SECS),
            ),
        }
    }
}
