//! Environment-driven configuration.

use std::str::FromStr;
use std::time::Duration;

use geocore_database::db::DEFAULT_DATABASE_URL;
use geocore_queue::DEFAULT_QUEUE_NAME;
use geocore_webhook::RetryPolicy;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::ServerError;

/// Default address of the webhook endpoint (the mock receiver's default).
pub const DEFAULT_WEBHOOK_URL: &str = "http://localhost:9090";

/// Default trailing window for incident stats.
pub const DEFAULT_STATS_WINDOW_MINUTES: u32 = 30;

/// Where a component keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Backend {
    /// The database at `DATABASE_URL`.
    Postgres,
    /// Process-local, lost on exit.
    Memory,
}

/// Runtime settings for the server and worker.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `DATABASE_URL`.
    pub database_url: String,
    /// `BIND_ADDR`, default `127.0.0.1`.
    pub bind_addr: String,
    /// `PORT`, default 8080.
    pub port: u16,
    /// `WEBHOOK_URL`, the endpoint the worker posts to.
    pub webhook_url: String,
    /// Queue shared by the audit recorder and the delivery worker.
    pub queue_name: String,
    /// Required `X-API-Key` for incident management. `None` disables the
    /// check.
    pub api_key: Option<String>,
    /// `CACHE_TTL_SECS`, lifetime of the zone snapshot.
    pub cache_ttl: Duration,
    /// `STATS_WINDOW_MINUTES`, used when a stats request omits `minutes`.
    pub stats_window_minutes: u32,
    /// `WEBHOOK_MAX_ATTEMPTS`, `WEBHOOK_BACKOFF_UNIT_MS` and
    /// `WEBHOOK_TIMEOUT_SECS`.
    pub retry: RetryPolicy,
    /// `WEBHOOK_DEAD_LETTER_QUEUE`. `None` drops exhausted payloads.
    pub dead_letter_queue: Option<String>,
    /// `QUEUE_BACKEND`.
    pub queue_backend: Backend,
    /// `STORE_BACKEND`, for incidents and audit records.
    pub store_backend: Backend,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            bind_addr: "127.0.0.1".to_string(),
            port: 8080,
            webhook_url: DEFAULT_WEBHOOK_URL.to_string(),
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            api_key: None,
            cache_ttl: geocore_cache::DEFAULT_TTL,
            stats_window_minutes: DEFAULT_STATS_WINDOW_MINUTES,
            retry: RetryPolicy::default(),
            dead_letter_queue: None,
            queue_backend: Backend::Postgres,
            store_backend: Backend::Postgres,
        }
    }
}

impl ServerConfig {
    /// Reads every setting from the environment, using the defaults for
    /// anything unset or empty.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if a variable is set to a value that
    /// does not parse.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`] but reads variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if a value does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServerError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let retry = RetryPolicy {
            max_attempts: parse_or(&get, "WEBHOOK_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            backoff_unit: get("WEBHOOK_BACKOFF_UNIT_MS")
                .map(|v| parse::<u64>("WEBHOOK_BACKOFF_UNIT_MS", &v))
                .transpose()?
                .map_or(defaults.retry.backoff_unit, Duration::from_millis),
            attempt_timeout: get("WEBHOOK_TIMEOUT_SECS")
                .map(|v| parse::<u64>("WEBHOOK_TIMEOUT_SECS", &v))
                .transpose()?
                .map_or(defaults.retry.attempt_timeout, Duration::from_secs),
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            port: parse_or(&get, "PORT", defaults.port)?,
            webhook_url: get("WEBHOOK_URL").unwrap_or(defaults.webhook_url),
            queue_name: get("QUEUE_NAME").unwrap_or(defaults.queue_name),
            api_key: get("API_KEY"),
            cache_ttl: get("CACHE_TTL_SECS")
                .map(|v| parse::<u64>("CACHE_TTL_SECS", &v))
                .transpose()?
                .map_or(defaults.cache_ttl, Duration::from_secs),
            stats_window_minutes: parse_or(
                &get,
                "STATS_WINDOW_MINUTES",
                defaults.stats_window_minutes,
            )?,
            retry,
            dead_letter_queue: get("WEBHOOK_DEAD_LETTER_QUEUE"),
            queue_backend: parse_or(&get, "QUEUE_BACKEND", defaults.queue_backend)?,
            store_backend: parse_or(&get, "STORE_BACKEND", defaults.store_backend)?,
        })
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ServerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| ServerError::Config {
        message: format!("{key}={value:?}: {e}"),
    })
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ServerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get(key).map_or(Ok(default), |v| parse(key, &v))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<ServerConfig, ServerError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from_pairs(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.queue_name, "webhook_tasks");
        assert_eq!(config.webhook_url, "http://localhost:9090");
        assert_eq!(config.api_key, None);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.stats_window_minutes, 30);
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.dead_letter_queue, None);
        assert_eq!(config.queue_backend, Backend::Postgres);
    }

    #[test]
    fn overrides_from_environment() {
        let config = from_pairs(&[
            ("PORT", "9000"),
            ("QUEUE_NAME", "hooks"),
            ("API_KEY", "secret"),
            ("CACHE_TTL_SECS", "5"),
            ("WEBHOOK_MAX_ATTEMPTS", "5"),
            ("WEBHOOK_BACKOFF_UNIT_MS", "250"),
            ("WEBHOOK_TIMEOUT_SECS", "2"),
            ("WEBHOOK_DEAD_LETTER_QUEUE", "hooks_dead"),
            ("QUEUE_BACKEND", "Memory"),
            ("STORE_BACKEND", "memory"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.queue_name, "hooks");
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_unit, Duration::from_millis(250));
        assert_eq!(config.retry.attempt_timeout, Duration::from_secs(2));
        assert_eq!(config.dead_letter_queue.as_deref(), Some("hooks_dead"));
        assert_eq!(config.queue_backend, Backend::Memory);
        assert_eq!(config.store_backend, Backend::Memory);
    }

    #[test]
    fn empty_values_fall_back_to_defaults() {
        let config = from_pairs(&[("API_KEY", ""), ("PORT", " ")]).unwrap();
        assert_eq!(config.api_key, None);
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            from_pairs(&[("PORT", "eighty")]),
            Err(ServerError::Config { .. })
        ));
        assert!(matches!(
            from_pairs(&[("QUEUE_BACKEND", "redis")]),
            Err(ServerError::Config { .. })
        ));
    }
}
