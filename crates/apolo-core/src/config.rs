//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rater: RaterConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub diameter: DiameterConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2080
}

fn default_workers() -> usize {
    num_cpus::get()
}

/// Rating engine (JSON-RPC) configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RaterConfig {
    /// JSON-RPC endpoint of the rating engine
    pub url: String,

    /// Tenant sent along with rating requests
    #[serde(default = "default_tenant")]
    pub tenant: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_rater_timeout")]
    pub timeout_ms: u64,
}

fn default_tenant() -> String {
    "cgrates.org".to_string()
}

fn default_rater_timeout() -> u64 {
    2000
}

/// Session engine configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SessionsConfig {
    /// Periodic debit interval in seconds, 0 disables the debit loop
    #[serde(default)]
    pub debit_interval_secs: u64,

    /// Upper bound for a call when the event carries no usage
    #[serde(default = "default_max_call_duration")]
    pub max_call_duration_secs: u64,

    /// Guardian lock timeout for session start and update
    #[serde(default = "default_start_lock_timeout")]
    pub start_lock_timeout_ms: u64,

    /// Guardian lock timeout for session end
    #[serde(default = "default_end_lock_timeout")]
    pub end_lock_timeout_ms: u64,

    /// Timezone used to interpret event timestamps
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_max_call_duration() -> u64 {
    10800 // 3 hours
}

fn default_start_lock_timeout() -> u64 {
    3000
}

fn default_end_lock_timeout() -> u64 {
    2000
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl SessionsConfig {
    pub fn debit_interval(&self) -> Duration {
        Duration::from_secs(self.debit_interval_secs)
    }

    pub fn max_call_duration(&self) -> Duration {
        Duration::from_secs(self.max_call_duration_secs)
    }

    pub fn start_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.start_lock_timeout_ms)
    }

    pub fn end_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.end_lock_timeout_ms)
    }

    /// Parse the configured timezone
    pub fn tz(&self) -> Result<chrono_tz::Tz, ConfigError> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| ConfigError::Message(format!("invalid timezone {}: {}", self.timezone, e)))
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            debit_interval_secs: 0,
            max_call_duration_secs: default_max_call_duration(),
            start_lock_timeout_ms: default_start_lock_timeout(),
            end_lock_timeout_ms: default_end_lock_timeout(),
            timezone: default_timezone(),
        }
    }
}

/// Diameter Credit-Control agent configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DiameterConfig {
    /// Origin-Host we announce in answers
    #[serde(default = "default_origin_host")]
    pub origin_host: String,

    /// Origin-Realm we announce in answers
    #[serde(default = "default_origin_realm")]
    pub origin_realm: String,

    #[serde(default)]
    pub vendor_id: u32,

    #[serde(default = "default_product_name")]
    pub product_name: String,

    /// Credit-Control application id (RFC 4006)
    #[serde(default = "default_auth_application_id")]
    pub auth_application_id: u32,

    #[serde(default = "default_service_context_id")]
    pub service_context_id: String,

    /// Values filled into events built out of CCRs
    #[serde(default = "default_tenant")]
    pub tenant: String,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default = "default_request_type")]
    pub request_type: String,

    #[serde(default = "default_direction")]
    pub direction: String,

    /// Debit interval network elements use between CCR updates
    #[serde(default = "default_diameter_debit_interval")]
    pub debit_interval_secs: u64,

    /// Largest message the framing codec accepts
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_origin_host() -> String {
    "APOLO-DA".to_string()
}

fn default_origin_realm() -> String {
    "apolobilling.local".to_string()
}

fn default_product_name() -> String {
    "ApoloCharging".to_string()
}

fn default_auth_application_id() -> u32 {
    4
}

fn default_service_context_id() -> String {
    "32260@3gpp.org".to_string()
}

fn default_category() -> String {
    "call".to_string()
}

fn default_request_type() -> String {
    "*prepaid".to_string()
}

fn default_direction() -> String {
    "*out".to_string()
}

fn default_diameter_debit_interval() -> u64 {
    300
}

fn default_max_message_size() -> usize {
    65535
}

impl DiameterConfig {
    pub fn debit_interval(&self) -> Duration {
        Duration::from_secs(self.debit_interval_secs)
    }
}

impl Default for DiameterConfig {
    fn default() -> Self {
        Self {
            origin_host: default_origin_host(),
            origin_realm: default_origin_realm(),
            vendor_id: 0,
            product_name: default_product_name(),
            auth_application_id: default_auth_application_id(),
            service_context_id: default_service_context_id(),
            tenant: default_tenant(),
            category: default_category(),
            request_type: default_request_type(),
            direction: default_direction(),
            debit_interval_secs: default_diameter_debit_interval(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 2080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("rater.url", "http://127.0.0.1:2012/jsonrpc")?
            .set_default("rater.tenant", "cgrates.org")?
            .set_default("rater.timeout_ms", 2000)?
            .set_default("sessions.debit_interval_secs", 0)?
            .set_default("sessions.max_call_duration_secs", 10800)?
            .set_default("sessions.start_lock_timeout_ms", 3000)?
            .set_default("sessions.end_lock_timeout_ms", 2000)?
            .set_default("sessions.timezone", "UTC")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with APOLO_ prefix
            .add_source(
                Environment::with_prefix("APOLO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.sessions.tz()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APOLO").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
