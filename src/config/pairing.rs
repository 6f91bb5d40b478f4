//! Pairing configuration

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the pairing engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingConfig {
    /// Maximum time a waiter stays pending before timing out, in seconds
    pub wait_timeout_seconds: u64,
    /// Lost-race claim retries before the caller becomes a waiter
    pub max_claim_retries: u32,
    /// Interval between stale-entry sweeps, in seconds
    pub sweep_interval_seconds: u64,
    /// Extra age beyond the wait timeout before a Waiting entry is swept
    pub sweep_grace_seconds: u64,
    /// Advisory credential lifetime stamped on call descriptors, in seconds
    pub channel_ttl_seconds: u64,
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            wait_timeout_seconds: 30,
            max_claim_retries: 3,
            sweep_interval_seconds: 60,
            sweep_grace_seconds: 30,
            channel_ttl_seconds: 3600, // 1 hour
        }
    }
}

impl PairingConfig {
    /// Get the wait timeout as Duration
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }

    /// Get the sweep interval as Duration
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    /// Age at which a Waiting entry cannot belong to a live session
    pub fn stale_age_seconds(&self) -> u64 {
        self.wait_timeout_seconds + self.sweep_grace_seconds
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.wait_timeout_seconds == 0 {
            return Err(anyhow!("Wait timeout must be greater than 0"));
        }
        if self.sweep_interval_seconds == 0 {
            return Err(anyhow!("Sweep interval must be greater than 0"));
        }
        if self.channel_ttl_seconds == 0 {
            return Err(anyhow!("Channel TTL must be greater than 0"));
        }

        Ok(())
    }
}
