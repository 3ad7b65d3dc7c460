//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (RESTYLER_*)
//! 2. TOML config file (if RESTYLER_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::profile::{SiteProfile, default_profiles};

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (RESTYLER_*)
/// 2. TOML config file (if RESTYLER_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite style cache database.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-attempt fetch timeout in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// Maximum redirects followed per fetch attempt.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// How long a cached stylesheet stays fresh.
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// Extra full-matrix passes after the first one is exhausted.
    #[serde(default = "default_retry_passes")]
    pub retry_passes: u32,

    /// Linear backoff between matrix passes, multiplied by the pass number.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// URL-rewriting relay used as the last-resort transport. The candidate
    /// URL is appended percent-encoded. None disables the proxy transport.
    #[serde(default = "default_proxy_prefix")]
    pub proxy_prefix: Option<String>,

    /// Whether this host grants native cross-origin requests.
    #[serde(default = "default_true")]
    pub privileged_transport: bool,

    /// How long an injection technique may take to verifiably apply.
    #[serde(default = "default_verify_window_ms")]
    pub verify_window_ms: u64,

    /// Supervisor poll interval (aggressive profiles) and mutation-wait
    /// timeout (everything else).
    #[serde(default = "default_supervisor_poll_ms")]
    pub supervisor_poll_ms: u64,

    /// Upper bound on supervision polls before the supervisor stops itself.
    #[serde(default = "default_supervisor_max_checks")]
    pub supervisor_max_checks: u32,

    /// Minimum spacing between consecutive reapplication attempts.
    #[serde(default = "default_supervisor_throttle_ms")]
    pub supervisor_throttle_ms: u64,

    /// Site profiles. Defaults to the built-in chat application profiles.
    #[serde(default = "default_profiles")]
    pub profiles: Vec<SiteProfile>,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./restyler-cache.sqlite")
}

fn default_user_agent() -> String {
    "restyler/0.1".into()
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_max_redirects() -> usize {
    5
}

fn default_cache_ttl_ms() -> u64 {
    86_400_000 // 24h
}

fn default_retry_passes() -> u32 {
    1
}

fn default_retry_backoff_ms() -> u64 {
    1_500
}

fn default_proxy_prefix() -> Option<String> {
    Some("https://api.allorigins.win/raw?url=".into())
}

fn default_true() -> bool {
    true
}

fn default_verify_window_ms() -> u64 {
    750
}

fn default_supervisor_poll_ms() -> u64 {
    2_000
}

fn default_supervisor_max_checks() -> u32 {
    1_800
}

fn default_supervisor_throttle_ms() -> u64 {
    500
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            user_agent: default_user_agent(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            max_redirects: default_max_redirects(),
            cache_ttl_ms: default_cache_ttl_ms(),
            retry_passes: default_retry_passes(),
            retry_backoff_ms: default_retry_backoff_ms(),
            proxy_prefix: default_proxy_prefix(),
            privileged_transport: true,
            verify_window_ms: default_verify_window_ms(),
            supervisor_poll_ms: default_supervisor_poll_ms(),
            supervisor_max_checks: default_supervisor_max_checks(),
            supervisor_throttle_ms: default_supervisor_throttle_ms(),
            profiles: default_profiles(),
        }
    }
}

impl AppConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn verify_window(&self) -> Duration {
        Duration::from_millis(self.verify_window_ms)
    }

    pub fn supervisor_poll(&self) -> Duration {
        Duration::from_millis(self.supervisor_poll_ms)
    }

    pub fn supervisor_throttle(&self) -> Duration {
        Duration::from_millis(self.supervisor_throttle_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `RESTYLER_`
    /// 2. TOML file from `RESTYLER_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, a variable cannot
    /// be parsed, or validation fails after loading.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("RESTYLER_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("RESTYLER_")
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}
