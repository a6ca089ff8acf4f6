use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub recon: ReconConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Reconciliation timing rules. Defaults keep the original behavior: holds
/// and the staleness threshold at 15 minutes, a cycle every 5 minutes, and a
/// few seconds per gateway call.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconConfig {
    #[serde(default = "default_hold_ttl")]
    pub hold_ttl_seconds: u64,
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    #[serde(default = "default_cycle")]
    pub cycle_seconds: u64,
    #[serde(default = "default_gateway_timeout")]
    pub gateway_timeout_seconds: u64,
}

fn default_hold_ttl() -> u64 {
    900
}
fn default_stale_after() -> u64 {
    900
}
fn default_cycle() -> u64 {
    300
}
fn default_gateway_timeout() -> u64 {
    5
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: default_hold_ttl(),
            stale_after_seconds: default_stale_after(),
            cycle_seconds: default_cycle(),
            gateway_timeout_seconds: default_gateway_timeout(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file (optional)
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file (not checked in)
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment, e.g. BUSLINE__SERVER__PORT=9000
            .add_source(config::Environment::with_prefix("BUSLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
