use serde::Deserialize;
use std::net::SocketAddr;

use domain::models::ProtectionThresholds;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub protection: ProtectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Startup values for the registration protection thresholds; tunable
/// at runtime through the admin endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtectionConfig {
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,

    #[serde(default = "default_block_duration_minutes")]
    pub block_duration_minutes: u32,

    #[serde(default = "default_captcha_threshold")]
    pub captcha_threshold: u32,

    #[serde(default = "default_suspicion_threshold")]
    pub suspicion_threshold: f64,

    #[serde(default = "default_registration_enabled")]
    pub registration_enabled: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    20
}
fn default_min_connections() -> u32 {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    600
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_rate_limit() -> u32 {
    5
}
fn default_window_minutes() -> u32 {
    15
}
fn default_block_duration_minutes() -> u32 {
    60
}
fn default_captcha_threshold() -> u32 {
    3
}
fn default_suspicion_threshold() -> f64 {
    0.8
}
fn default_registration_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
        }
    }
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            rate_limit: default_rate_limit(),
            window_minutes: default_window_minutes(),
            block_duration_minutes: default_block_duration_minutes(),
            captcha_threshold: default_captcha_threshold(),
            suspicion_threshold: default_suspicion_threshold(),
            registration_enabled: default_registration_enabled(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: String::new(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            logging: LoggingConfig::default(),
            security: SecurityConfig::default(),
            protection: ProtectionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Loading order (later sources override earlier):
    /// 1. config/default.toml - base configuration with defaults
    /// 2. config/local.toml - local overrides (optional, not in git)
    /// 3. Environment variables with FLAGSHIP__ prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("FLAGSHIP").separator("__"))
            .build()?;

        let cfg: Self = config.try_deserialize()?;
        cfg.protection
            .thresholds()
            .validate()
            .map_err(|e| config::ConfigError::Message(e.to_string()))?;
        Ok(cfg)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], self.server.port)))
    }
}

impl ProtectionConfig {
    pub fn thresholds(&self) -> ProtectionThresholds {
        ProtectionThresholds {
            rate_limit: self.rate_limit,
            window_minutes: self.window_minutes,
            block_duration_minutes: self.block_duration_minutes,
            captcha_threshold: self.captcha_threshold,
            suspicion_threshold: self.suspicion_threshold,
            registration_enabled: self.registration_enabled,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> persistence::db::DatabaseConfig {
        persistence::db::DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout_secs: self.connect_timeout_secs,
            idle_timeout_secs: self.idle_timeout_secs,
        }
    }
}
