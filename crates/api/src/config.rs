//! Application configuration loaded from environment variables.

use std::time::Duration;

use saga::EngineConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL connection string; unset keeps sagas in memory
/// - `SAGA_WORKERS`: dispatcher shards (default: `4`)
/// - `SAGA_MAX_CONFLICT_RETRIES`: retries after a version conflict (default: `3`)
/// - `OUTBOX_SWEEP_INTERVAL_SECS`: period of the undelivered-outbox sweep (default: `30`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub saga_workers: usize,
    pub max_conflict_retries: u32,
    pub outbox_sweep_interval_secs: u64,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => defaults.log_format,
            },
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            saga_workers: lookup("SAGA_WORKERS")
                .and_then(|w| w.parse().ok())
                .filter(|w| *w > 0)
                .unwrap_or(defaults.saga_workers),
            max_conflict_retries: lookup("SAGA_MAX_CONFLICT_RETRIES")
                .and_then(|r| r.parse().ok())
                .unwrap_or(defaults.max_conflict_retries),
            outbox_sweep_interval_secs: lookup("OUTBOX_SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(defaults.outbox_sweep_interval_secs),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn outbox_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.outbox_sweep_interval_secs)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_conflict_retries: self.max_conflict_retries,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            saga_workers: 4,
            max_conflict_retries: EngineConfig::default().max_conflict_retries,
            outbox_sweep_interval_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert!(config.database_url.is_none());
        assert_eq!(config.saga_workers, 4);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.outbox_sweep_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_reads_overrides() {
        let config = from_vars(&[
            ("PORT", "8081"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/sagas"),
            ("SAGA_WORKERS", "16"),
            ("SAGA_MAX_CONFLICT_RETRIES", "5"),
            ("OUTBOX_SWEEP_INTERVAL_SECS", "5"),
        ]);
        assert_eq!(config.port, 8081);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/sagas"));
        assert_eq!(config.saga_workers, 16);
        assert_eq!(config.engine_config().max_conflict_retries, 5);
        assert_eq!(config.outbox_sweep_interval_secs, 5);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = from_vars(&[
            ("PORT", "not-a-port"),
            ("SAGA_WORKERS", "0"),
            ("DATABASE_URL", "  "),
            ("OUTBOX_SWEEP_INTERVAL_SECS", "0"),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.saga_workers, 4);
        assert!(config.database_url.is_none());
        assert_eq!(config.outbox_sweep_interval_secs, 30);
    }
}
