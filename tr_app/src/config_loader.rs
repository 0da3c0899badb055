use std::path::Path;
use std::time::Duration;

use config::Config as Settings;
use config::ConfigError;
use config::Environment;
use config::File;
use serde::Deserialize;
use tr_tenantrate::Config;

/// Prefix of environment overrides, e.g. `TENANTRATE__LIMITS__REQUESTS__RATE=50`
pub const ENV_PREFIX: &str = "TENANTRATE";

/// Simulator settings plus the admission limits it drives
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimConfigFile {
    /// Number of ordinary tenants generating load
    #[serde(default = "default_tenants")]
    pub tenants: u64,

    /// Requests each tenant tries to issue per second
    #[serde(default = "default_offered_rate")]
    pub offered_rate: f64,

    /// Bytes written per request
    #[serde(default)]
    pub write_bytes: u64,

    /// Bytes read per request
    #[serde(default)]
    pub read_bytes: u64,

    /// Deadline given to each admission
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How often the file is re-read for limit changes
    #[serde(default = "default_reload_interval_ms")]
    pub reload_interval_ms: u64,

    /// Run time; zero runs until Ctrl+C
    #[serde(default)]
    pub duration_secs: u64,

    #[serde(default)]
    pub limits: Config,
}

fn default_tenants() -> u64 {
    4
}

fn default_offered_rate() -> f64 {
    200.0
}

fn default_request_timeout_ms() -> u64 {
    1_000
}

fn default_reload_interval_ms() -> u64 {
    5_000
}

impl SimConfigFile {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_millis(self.reload_interval_ms.max(1))
    }
}

impl Default for SimConfigFile {
    fn default() -> Self {
        Self {
            tenants: default_tenants(),
            offered_rate: default_offered_rate(),
            write_bytes: 0,
            read_bytes: 0,
            request_timeout_ms: default_request_timeout_ms(),
            reload_interval_ms: default_reload_interval_ms(),
            duration_secs: 0,
            limits: Config::default(),
        }
    }
}

/// Environment overlay read on top of the file
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX).separator("__")
}

/// Load and validate a simulator file, with environment overrides applied
pub fn load_sim_config<P: AsRef<Path>>(path: P) -> Result<SimConfigFile, ConfigError> {
    load_sim_config_with(path, environment())
}

/// Load and validate a simulator file with an explicit environment overlay
pub fn load_sim_config_with<P: AsRef<Path>>(path: P, env: Environment) -> Result<SimConfigFile, ConfigError> {
    let settings = Settings::builder().add_source(File::from(path.as_ref())).add_source(env).build()?;

    let file: SimConfigFile = settings.try_deserialize()?;
    file.limits.validate().map_err(|err| ConfigError::Message(err.to_string()))?;
    Ok(file)
}

/// Load the admission limits alone, validated
pub fn load_limits<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    load_sim_config(path).map(|file| file.limits)
}

/// Load simulator config with fallback to default
pub fn load_sim_config_or_default(path: &str) -> SimConfigFile {
    match load_sim_config(path) {
        Ok(config) => {
            tracing::info!("Loaded simulator config from {path}");
            config
        }
        Err(err) => {
            tracing::warn!("Failed to load simulator config from {}: {}. Using defaults.", path, err);
            SimConfigFile::default()
        }
    }
}
