//! Service settings for the attribute aggregator

use std::time::Duration;

/// Settings of the attribute query service.
#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    /// Public base URL the query endpoint is mounted under.
    pub base_url: String,

    /// Timeout of one attribute query exchange, in seconds.
    /// Default: 10.
    pub query_timeout_secs: u64,

    /// Lifetime of a correlation record, in seconds.
    /// Default: 3600.
    pub correlation_ttl_secs: i64,

    /// Allowed clock skew when checking assertion conditions, in seconds.
    /// Default: 180.
    pub clock_skew_secs: i64,

    /// Database for the PostgreSQL correlation store. The in-memory store is
    /// used when unset.
    pub database_url: Option<String>,
}

impl AggregatorSettings {
    /// Load settings from environment variables.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load settings from a custom variable reader.
    pub fn from_reader<F>(reader: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let base_url = reader("ATTRIBUTE_AGGREGATOR_BASE_URL")
            .map_err(|_| SettingsError::MissingVar("ATTRIBUTE_AGGREGATOR_BASE_URL".into()))?;
        url::Url::parse(&base_url).map_err(|e| {
            SettingsError::InvalidValue("ATTRIBUTE_AGGREGATOR_BASE_URL".into(), e.to_string())
        })?;
        let base_url = base_url.trim_end_matches('/').to_string();

        let query_timeout_secs = reader("ATTRIBUTE_AGGREGATOR_QUERY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "10".to_string())
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                SettingsError::InvalidValue(
                    "ATTRIBUTE_AGGREGATOR_QUERY_TIMEOUT_SECS".into(),
                    "expected a positive number of seconds".into(),
                )
            })?;

        let correlation_ttl_secs = reader("ATTRIBUTE_AGGREGATOR_CORRELATION_TTL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<i64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| {
                SettingsError::InvalidValue(
                    "ATTRIBUTE_AGGREGATOR_CORRELATION_TTL_SECS".into(),
                    "expected a positive number of seconds".into(),
                )
            })?;

        let clock_skew_secs = reader("ATTRIBUTE_AGGREGATOR_CLOCK_SKEW_SECS")
            .unwrap_or_else(|_| "180".to_string())
            .parse::<i64>()
            .ok()
            .filter(|secs| *secs >= 0)
            .ok_or_else(|| {
                SettingsError::InvalidValue(
                    "ATTRIBUTE_AGGREGATOR_CLOCK_SKEW_SECS".into(),
                    "expected a non-negative number of seconds".into(),
                )
            })?;

        let database_url = reader("DATABASE_URL").ok().filter(|url| !url.is_empty());
        if let Some(database_url) = &database_url {
            url::Url::parse(database_url)
                .map_err(|e| SettingsError::InvalidValue("DATABASE_URL".into(), e.to_string()))?;
        }

        Ok(Self {
            base_url,
            query_timeout_secs,
            correlation_ttl_secs,
            clock_skew_secs,
            database_url,
        })
    }

    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Pool for the PostgreSQL correlation store, when `DATABASE_URL` is set.
    ///
    /// Connections are opened on first use.
    pub fn database_pool(&self) -> Result<Option<sqlx::PgPool>, SettingsError> {
        self.database_url
            .as_deref()
            .map(sqlx::PgPool::connect_lazy)
            .transpose()
            .map_err(|e| SettingsError::InvalidValue("DATABASE_URL".into(), e.to_string()))
    }

    /// Absolute URL of the query engine entry point
    #[must_use]
    pub fn attribute_query_url(&self) -> String {
        format!("{}{}", self.base_url, crate::router::ATTRIBUTE_QUERY_PATH)
    }
}

/// Settings errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
