//! Configuration validation rules.
//!
//! Validation logic for `AppConfig` values after they have been loaded from
//! environment, file, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `fetch_timeout_ms` is outside 1s..60s
    /// - `cache_ttl_ms` is zero or exceeds 7 days
    /// - `verify_window_ms` is outside 100ms..5s
    /// - `user_agent` is empty
    /// - a profile has no sources, an empty name, or an empty artifact id
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_ms < 1_000 || self.fetch_timeout_ms > 60_000 {
            return Err(invalid("fetch_timeout_ms", "must be between 1s and 60s"));
        }

        if self.cache_ttl_ms == 0 {
            return Err(invalid("cache_ttl_ms", "must be greater than 0"));
        }
        if self.cache_ttl_ms > 7 * 86_400_000 {
            return Err(invalid("cache_ttl_ms", "must not exceed 7 days"));
        }

        if self.verify_window_ms < 100 || self.verify_window_ms > 5_000 {
            return Err(invalid("verify_window_ms", "must be between 100ms and 5s"));
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.supervisor_poll_ms == 0 {
            return Err(invalid("supervisor_poll_ms", "must be greater than 0"));
        }

        for profile in &self.profiles {
            if profile.name.is_empty() {
                return Err(invalid("profiles", "profile name must not be empty"));
            }
            if profile.artifact_id.is_empty() {
                return Err(invalid("profiles", format!("profile '{}' has an empty artifact_id", profile.name)));
            }
            if profile.sources.is_empty() && profile.fallback_css.is_none() {
                return Err(invalid(
                    "profiles",
                    format!("profile '{}' has no sources and no fallback", profile.name),
                ));
            }
        }

        if self.supervisor_throttle_ms > self.supervisor_poll_ms {
            tracing::warn!(
                throttle_ms = self.supervisor_throttle_ms,
                poll_ms = self.supervisor_poll_ms,
                "reapply throttle exceeds the poll interval; the throttle will never trip"
            );
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { fetch_timeout_ms: 500, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "fetch_timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_too_large() {
        let config = AppConfig { fetch_timeout_ms: 61_000, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_ttl_zero() {
        let config = AppConfig { cache_ttl_ms: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_ttl_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_profile_without_sources() {
        let mut config = AppConfig::default();
        config.profiles[0].sources.clear();
        config.profiles[0].fallback_css = None;
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "profiles"));
    }

    #[test]
    fn test_validate_sourceless_profile_with_fallback_ok() {
        let mut config = AppConfig::default();
        config.profiles[0].sources.clear();
        config.profiles[0].fallback_css = Some("body{}".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_edge_values() {
        let config = AppConfig { fetch_timeout_ms: 1_000, verify_window_ms: 100, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
