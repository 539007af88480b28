use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "COFFER_";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Runtime settings for the ledger and its connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// SQLite connection URL, e.g. `sqlite:coffer.db?mode=rwc`
    pub database_url: String,
    pub max_connections: u32,
    /// How long a caller waits for a pooled connection
    pub acquire_timeout_ms: u64,
    /// How long SQLite waits on a locked database before reporting busy
    pub busy_timeout_ms: u64,
    /// Compare-and-set retries before an operation fails with contention
    pub max_conflict_retries: u32,
    /// Retries of transient storage failures before they surface
    pub max_storage_retries: u32,
    /// Base delay between transient retries, doubled on every attempt
    pub retry_backoff_ms: u64,
    /// Append a zero-amount adjustment record when an account is registered
    pub record_account_opening: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:coffer.db?mode=rwc".to_string(),
            max_connections: 5,
            acquire_timeout_ms: 5_000,
            busy_timeout_ms: 5_000,
            max_conflict_retries: 16,
            max_storage_retries: 3,
            retry_backoff_ms: 10,
            record_account_opening: true,
        }
    }
}

impl LedgerConfig {
    /// Default settings for a database file at the given path.
    pub fn for_path(database_path: &str) -> Self {
        Self {
            database_url: format!("sqlite:{}?mode=rwc", database_path),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `COFFER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by full variable name.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        } else if let Some(path) = var("DATABASE") {
            config.database_url = Self::for_path(&path).database_url;
        }

        parse_into(&var, "MAX_CONNECTIONS", &mut config.max_connections)?;
        parse_into(&var, "ACQUIRE_TIMEOUT_MS", &mut config.acquire_timeout_ms)?;
        parse_into(&var, "BUSY_TIMEOUT_MS", &mut config.busy_timeout_ms)?;
        parse_into(&var, "MAX_CONFLICT_RETRIES", &mut config.max_conflict_retries)?;
        parse_into(&var, "MAX_STORAGE_RETRIES", &mut config.max_storage_retries)?;
        parse_into(&var, "RETRY_BACKOFF_MS", &mut config.retry_backoff_ms)?;
        parse_into(&var, "RECORD_ACCOUNT_OPENING", &mut config.record_account_opening)?;

        if config.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}MAX_CONNECTIONS"),
                value: "0".to_string(),
            });
        }

        Ok(config)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Delay before the given transient retry (1-based), capped at one second.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
            .min(Duration::from_secs(1))
    }
}

fn parse_into<T, V>(var: &V, name: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    if let Some(raw) = var(name) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{name}"),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LedgerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = LedgerConfig::from_lookup(lookup_from(&[
            ("COFFER_DATABASE", "/tmp/ledger.db"),
            ("COFFER_MAX_CONNECTIONS", "8"),
            ("COFFER_RECORD_ACCOUNT_OPENING", "false"),
        ]))
        .unwrap();

        assert_eq!(config.database_url, "sqlite:/tmp/ledger.db?mode=rwc");
        assert_eq!(config.max_connections, 8);
        assert!(!config.record_account_opening);
    }

    #[test]
    fn test_database_url_wins_over_path() {
        let config = LedgerConfig::from_lookup(lookup_from(&[
            ("COFFER_DATABASE", "/tmp/ignored.db"),
            ("COFFER_DATABASE_URL", "sqlite::memory:"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = LedgerConfig::from_lookup(lookup_from(&[("COFFER_BUSY_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "COFFER_BUSY_TIMEOUT_MS".into(),
                value: "soon".into(),
            }
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = LedgerConfig::default();
        assert_eq!(config.backoff(1), Duration::from_millis(10));
        assert_eq!(config.backoff(2), Duration::from_millis(20));
        assert_eq!(config.backoff(3), Duration::from_millis(40));
        assert_eq!(config.backoff(30), Duration::from_secs(1));
    }

    #[test]
    fn test_deserialize_fills_missing_fields() {
        let config: LedgerConfig =
            serde_json::from_str(r#"{"max_conflict_retries": 100}"#).unwrap();
        assert_eq!(config.max_conflict_retries, 100);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }
}
