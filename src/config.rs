use config::{Config as ConfigLoader, ConfigError as LoaderError, Environment, File};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Jenkins is not configured: missing {0}")]
    MissingJenkins(&'static str),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jenkins: JenkinsConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8000 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct JenkinsConfig {
    pub url: Option<String>,
    pub username: Option<String>,
    pub api_token: Option<String>,
    /// Externally reachable base address; internal links are rewritten to it.
    pub public_url: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub cache_ttl_seconds: Option<u64>,
    pub cache_capacity: Option<u64>,
    pub job_filter_regex: Option<String>,
}

/// Validated connection settings for the CI server.
#[derive(Debug, Clone)]
pub struct JenkinsCredentials {
    pub url: String,
    pub username: String,
    pub api_token: String,
}

impl JenkinsConfig {
    pub fn credentials(&self) -> Result<JenkinsCredentials, ConfigError> {
        fn present(v: &Option<String>) -> Option<String> {
            v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
        }

        Ok(JenkinsCredentials {
            url: present(&self.url).ok_or(ConfigError::MissingJenkins("jenkins.url"))?,
            username: present(&self.username).ok_or(ConfigError::MissingJenkins("jenkins.username"))?,
            api_token: present(&self.api_token).ok_or(ConfigError::MissingJenkins("jenkins.api_token"))?,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub error_backoff_seconds: u64,
    pub detail_concurrency: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 30,
            error_backoff_seconds: 60,
            detail_concurrency: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub server: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    pub to: String,
    #[serde(default = "default_true")]
    pub use_tls: bool,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub failure_rate_threshold: f64,
    pub build_time_threshold_minutes: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { failure_rate_threshold: 0.2, build_time_threshold_minutes: 30 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite:builds.db?mode=ro".to_string() }
    }
}

impl Config {
    pub fn new() -> Result<Self, LoaderError> {
        let s = ConfigLoader::builder()
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("MONITOR").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
