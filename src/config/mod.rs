pub mod database;

use serde::Deserialize;

/// How an access check that names no data category is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscopedPolicy {
    /// The active grant must have at least one flag set.
    #[default]
    RequireAnyFlag,
    /// Any active grant is enough.
    AnyGrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Longest configurable grant duration: one year.
pub const MAX_GRANT_HOURS: u32 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// No URL means in-memory stores.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub database_acquire_timeout_secs: u64,
    pub default_full_consent_hours: u32,
    pub emergency_access_hours: u32,
    /// Zero disables the background sweeper.
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: usize,
    pub unscoped_policy: UnscopedPolicy,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            database_max_connections: 10,
            database_acquire_timeout_secs: 5,
            default_full_consent_hours: 24,
            emergency_access_hours: 4,
            sweep_interval_secs: 300,
            sweep_batch_size: 500,
            unscoped_policy: UnscopedPolicy::RequireAnyFlag,
            log_format: LogFormat::Json,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Defaults, overridden by `.env` and `CONSENT_*` environment variables.
    pub fn load() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();
        let config: Config = config::Config::builder()
            .set_default("database_max_connections", defaults.database_max_connections)?
            .set_default(
                "database_acquire_timeout_secs",
                defaults.database_acquire_timeout_secs,
            )?
            .set_default("default_full_consent_hours", defaults.default_full_consent_hours)?
            .set_default("emergency_access_hours", defaults.emergency_access_hours)?
            .set_default("sweep_interval_secs", defaults.sweep_interval_secs)?
            .set_default("sweep_batch_size", defaults.sweep_batch_size as u64)?
            .set_default("unscoped_policy", "require_any_flag")?
            .set_default("log_format", "json")?
            .set_default("log_level", defaults.log_level)?
            .add_source(config::Environment::with_prefix("CONSENT").try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_full_consent_hours == 0 {
            anyhow::bail!("default_full_consent_hours must be greater than zero");
        }
        if self.emergency_access_hours == 0 {
            anyhow::bail!("emergency_access_hours must be greater than zero");
        }
        if self.default_full_consent_hours > MAX_GRANT_HOURS {
            anyhow::bail!(
                "default_full_consent_hours must not exceed {} hours",
                MAX_GRANT_HOURS
            );
        }
        if self.emergency_access_hours > self.default_full_consent_hours {
            anyhow::bail!(
                "emergency_access_hours ({}) must not exceed default_full_consent_hours ({})",
                self.emergency_access_hours,
                self.default_full_consent_hours
            );
        }
        if self.sweep_batch_size == 0 {
            anyhow::bail!("sweep_batch_size must be greater than zero");
        }
        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with("CONSENT_") {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults_without_env() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, None);
        assert_eq!(config.default_full_consent_hours, 24);
        assert_eq!(config.emergency_access_hours, 4);
        assert_eq!(config.unscoped_policy, UnscopedPolicy::RequireAnyFlag);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("CONSENT_EMERGENCY_ACCESS_HOURS", "2");
        std::env::set_var("CONSENT_UNSCOPED_POLICY", "any_grant");
        std::env::set_var("CONSENT_DATABASE_URL", "postgres://localhost/consent");
        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.emergency_access_hours, 2);
        assert_eq!(config.unscoped_policy, UnscopedPolicy::AnyGrant);
        assert_eq!(
            config.database_url.as_deref(),
            Some("postgres://localhost/consent")
        );
    }

    #[test]
    #[serial]
    fn test_invalid_number_is_an_error_not_a_panic() {
        clear_env();
        std::env::set_var("CONSENT_SWEEP_INTERVAL_SECS", "soon");
        let result = Config::from_env();
        clear_env();
        assert!(result.is_err());
    }

    #[test]
    fn test_emergency_longer_than_full_rejected() {
        let config = Config {
            emergency_access_hours: 48,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_oversized_durations_rejected() {
        clear_env();
        std::env::set_var("CONSENT_DEFAULT_FULL_CONSENT_HOURS", "4294967295");
        std::env::set_var("CONSENT_EMERGENCY_ACCESS_HOURS", "4294967295");
        let result = Config::from_env();
        clear_env();
        assert!(result.is_err());

        let config = Config {
            default_full_consent_hours: MAX_GRANT_HOURS + 1,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
