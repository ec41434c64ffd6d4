use crate::cache::CacheConfig;
use crate::database::config::DatabaseConfig;
use crate::exchange::ExchangeRateConfig;
use crate::jobs::JobsConfig;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metering: MeteringConfig,
    #[serde(default)]
    pub exchange_rate: ExchangeRateConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `usage_metering=debug,sea_orm=warn`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeteringConfig {
    /// Offset of the billing day from UTC, in minutes
    #[serde(default)]
    pub business_day_offset_minutes: i32,
    /// Share of a combined token count attributed to input when the event
    /// does not report input and output separately
    #[serde(default = "default_input_share_percent")]
    pub input_share_percent: u8,
    /// User label for events that carry no user
    #[serde(default = "default_unattributed_user")]
    pub unattributed_user: String,
    /// Provider label for model names without a `provider/` prefix
    #[serde(default = "default_provider")]
    pub default_provider: String,
}

fn default_input_share_percent() -> u8 {
    70
}

fn default_unattributed_user() -> String {
    "unattributed".to_string()
}

fn default_provider() -> String {
    "openrouter".to_string()
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            business_day_offset_minutes: 0,
            input_share_percent: default_input_share_percent(),
            unattributed_user: default_unattributed_user(),
            default_provider: default_provider(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Defaults, then `config.yaml` in the working directory, then `METERING_*`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("config.yaml")
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut builder =
            ConfigBuilder::builder().add_source(ConfigBuilder::try_from(&Config::default())?);

        if path.as_ref().exists() {
            builder = builder.add_source(File::from(path.as_ref()));
        }

        builder = builder.add_source(
            Environment::with_prefix("METERING")
                .prefix_separator("_")
                .separator("__"),
        );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.metering.input_share_percent, 70);
        assert_eq!(config.metering.business_day_offset_minutes, 0);
        assert_eq!(config.cache.backend, "memory");
        assert!(config.database.migration_on_startup);
        assert_eq!(config.exchange_rate.lookback_days, 7);
        assert!(!config.metrics.enabled);
    }

    #[test]
    #[serial]
    fn test_config_load_from_yaml_file() {
        let yaml_content = r#"
database:
  url: "sqlite://./data/test.db?mode=rwc"
logging:
  level: "debug"
  format: "json"
metering:
  input_share_percent: 60
  business_day_offset_minutes: 60
exchange_rate:
  request_timeout_secs: 3
  fallback_rates:
    usd_pln: "3.95"
jobs:
  generation_cleanup:
    retention_days: 30
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = Config::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.database.url, "sqlite://./data/test.db?mode=rwc");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.metering.input_share_percent, 60);
        assert_eq!(config.metering.business_day_offset_minutes, 60);
        assert_eq!(config.exchange_rate.request_timeout_secs, 3);
        assert_eq!(
            config.exchange_rate.fallback_rates.get("usd_pln").map(String::as_str),
            Some("3.95")
        );
        assert_eq!(config.jobs.generation_cleanup.retention_days, 30);
        // untouched sections keep their defaults
        assert_eq!(config.jobs.generation_cleanup.retry_window_hours, 72);
        assert_eq!(config.cache.backend, "memory");
    }

    #[test]
    #[serial]
    fn test_config_env_override() {
        // SAFETY: serialized with the other env-reading tests
        unsafe {
            std::env::set_var("METERING_LOGGING__LEVEL", "warn");
        }
        let config = Config::load_from_file("nonexistent.yaml").unwrap();
        unsafe {
            std::env::remove_var("METERING_LOGGING__LEVEL");
        }

        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_config_load_nonexistent_file() {
        let config = Config::load_from_file("nonexistent.yaml").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.exchange_rate.base_url, "https://api.nbp.pl/api");
    }
}
