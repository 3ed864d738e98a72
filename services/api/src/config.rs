//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use novel_pipeline_core::chunker::DEFAULT_MAX_CHUNK_SIZE;
use novel_pipeline_core::{LockPolicy, ReaderSettings};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub db_max_connections: u32,
    pub cors_allowed_origin: String,
    pub max_chunk_size: usize,
    pub initial_window: i32,
    pub max_window: i32,
    pub words_per_minute: i32,
    pub store_timeout: Duration,
    pub max_concurrent_rechunks: usize,
    pub rechunk_lock_policy: LockPolicy,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // --- Server and Database Settings ---
        let bind_address_str = lookup("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url =
            lookup("DATABASE_URL").ok_or_else(|| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let db_max_connections = positive(&lookup, "DB_MAX_CONNECTIONS", 5)?;
        let cors_allowed_origin = lookup("CORS_ALLOWED_ORIGIN")
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        // --- Pipeline Settings ---
        let max_chunk_size = positive(&lookup, "MAX_CHUNK_SIZE", DEFAULT_MAX_CHUNK_SIZE)?;
        let initial_window = positive(&lookup, "INITIAL_WINDOW", 10)?;
        let max_window = positive(&lookup, "MAX_WINDOW", 10)?;
        let words_per_minute = positive(&lookup, "WORDS_PER_MINUTE", 250)?;
        let store_timeout_ms: u64 = positive(&lookup, "STORE_TIMEOUT_MS", 30_000)?;
        let max_concurrent_rechunks = positive(&lookup, "MAX_CONCURRENT_RECHUNKS", 4)?;

        let rechunk_lock_policy = match lookup("RECHUNK_LOCK_POLICY")
            .unwrap_or_else(|| "wait".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "wait" => LockPolicy::Wait,
            "fail" => LockPolicy::Fail,
            other => {
                return Err(ConfigError::InvalidValue(
                    "RECHUNK_LOCK_POLICY".to_string(),
                    format!("'{}' is neither 'wait' nor 'fail'", other),
                ))
            }
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            db_max_connections,
            cors_allowed_origin,
            max_chunk_size,
            initial_window,
            max_window,
            words_per_minute,
            store_timeout: Duration::from_millis(store_timeout_ms),
            max_concurrent_rechunks,
            rechunk_lock_policy,
        })
    }

    pub fn reader_settings(&self) -> ReaderSettings {
        ReaderSettings {
            initial_window: self.initial_window,
            max_window: self.max_window,
            words_per_minute: self.words_per_minute,
        }
    }
}

/// Reads a strictly positive number, falling back to `default` when unset.
fn positive<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value > T::default() => Ok(value),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("'{}' is not a positive number", raw),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_the_database_is_set() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/novels")]).unwrap();
        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.max_chunk_size, 65_000);
        assert_eq!(config.initial_window, 10);
        assert_eq!(config.max_window, 10);
        assert_eq!(config.words_per_minute, 250);
        assert_eq!(config.store_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_rechunks, 4);
        assert_eq!(config.rechunk_lock_policy, LockPolicy::Wait);
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingVar(v)) if v == "DATABASE_URL"));
    }

    #[test]
    fn rejects_zero_and_garbage_numbers() {
        for (name, value) in [("MAX_WINDOW", "0"), ("MAX_CHUNK_SIZE", "-5"), ("STORE_TIMEOUT_MS", "soon")] {
            let err = load(&[("DATABASE_URL", "postgres://x"), (name, value)]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue(ref v, _) if v == name), "{name}");
        }
    }

    #[test]
    fn parses_the_lock_policy() {
        let config = load(&[("DATABASE_URL", "postgres://x"), ("RECHUNK_LOCK_POLICY", "FAIL")]).unwrap();
        assert_eq!(config.rechunk_lock_policy, LockPolicy::Fail);
        assert!(load(&[("DATABASE_URL", "postgres://x"), ("RECHUNK_LOCK_POLICY", "maybe")]).is_err());
    }
}
