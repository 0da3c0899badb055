use std::time::Duration;

use serde::Deserialize;
use serde::Deserializer;
use tr_quotapool::MAX_BURST;

use crate::cost::Dimension;
use crate::error::Result;
use crate::error::TenantRateError;

/// Token bucket parameters for one dimension
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct DimensionConfig {
    /// Refill rate in cost units per second
    pub rate: f64,

    /// Maximum cost units a tenant may accumulate
    pub burst: u64,

    /// Raw amount (operations or bytes) per cost unit
    pub divisor: u64,
}

impl DimensionConfig {
    pub const fn new(rate: f64, burst: u64, divisor: u64) -> Self {
        Self { rate, burst, divisor }
    }
}

/// Immutable admission control snapshot
///
/// A new snapshot replaces the old one wholesale; limiters never observe a
/// half-updated value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub requests: DimensionConfig,
    pub read_bytes: DimensionConfig,
    pub write_bytes: DimensionConfig,

    /// Tenants unused for longer than this are evicted
    #[serde(rename = "idle_eviction_ms", deserialize_with = "millis")]
    pub idle_eviction: Duration,

    /// Interval between eviction sweeps
    #[serde(rename = "sweep_interval_ms", deserialize_with = "millis")]
    pub sweep_interval: Duration,
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            requests: DimensionConfig::new(128.0, 512, 1),
            // Byte dimensions are accounted in KiB
            read_bytes: DimensionConfig::new(1024.0, 16 * 1024, 1024),
            write_bytes: DimensionConfig::new(1024.0, 4 * 1024, 1024),
            idle_eviction: Duration::from_secs(600),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn dimension(&self, dimension: Dimension) -> &DimensionConfig {
        match dimension {
            Dimension::Requests => &self.requests,
            Dimension::ReadBytes => &self.read_bytes,
            Dimension::WriteBytes => &self.write_bytes,
        }
    }

    /// Uniform rate and burst on every dimension, one unit per operation or byte
    pub fn uniform(rate: f64, burst: u64) -> Self {
        let dimension = DimensionConfig::new(rate, burst, 1);
        Self { requests: dimension, read_bytes: dimension, write_bytes: dimension, ..Self::default() }
    }

    /// Reject snapshots a quota pool could not be configured with
    pub fn validate(&self) -> Result<()> {
        for dimension in Dimension::ALL {
            let cfg = self.dimension(dimension);
            let name = dimension.as_str();

            if !cfg.rate.is_finite() || cfg.rate <= 0.0 {
                return Err(TenantRateError::ConfigurationInvalid(format!("{name}: rate must be positive, got {}", cfg.rate)));
            }
            if cfg.burst == 0 {
                return Err(TenantRateError::ConfigurationInvalid(format!("{name}: burst must be greater than 0")));
            }
            if cfg.burst > MAX_BURST {
                return Err(TenantRateError::ConfigurationInvalid(format!("{name}: burst {} exceeds {MAX_BURST}", cfg.burst)));
            }
            if cfg.divisor == 0 {
                return Err(TenantRateError::ConfigurationInvalid(format!("{name}: divisor must be greater than 0")));
            }
        }

        if self.idle_eviction.is_zero() {
            return Err(TenantRateError::ConfigurationInvalid("idle eviction window must be greater than 0".to_string()));
        }
        if self.sweep_interval.is_zero() {
            return Err(TenantRateError::ConfigurationInvalid("sweep interval must be greater than 0".to_string()));
        }

        Ok(())
    }
}
