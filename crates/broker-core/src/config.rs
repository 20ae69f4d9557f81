// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Storage configuration.
#[derive(Clone)]
pub struct StorageConfig {
    /// PostgreSQL or SQLite connection URL
    pub database_url: String,
    /// Secret the parameter encryption key is derived from
    pub encryption_secret: String,
    /// Maximum pooled database connections
    pub max_connections: u32,
    /// Retry policy for backend calls
    pub retry_policy: RetryPolicy,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("database_url", &self.database_url)
            .field("encryption_secret", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("retry_policy", &self.retry_policy)
            .finish()
    }
}

impl StorageConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `BROKER_DATABASE_URL`: PostgreSQL or SQLite connection string
    /// - `BROKER_ENCRYPTION_SECRET`: non-empty encryption secret
    ///
    /// Optional (with defaults):
    /// - `BROKER_DB_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `BROKER_DB_RETRY_INTERVAL_MS`: fixed retry interval (default: 500)
    /// - `BROKER_DB_RETRY_TIMEOUT_SECS`: total retry budget per call (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("BROKER_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("BROKER_DATABASE_URL"))?;

        let encryption_secret = std::env::var("BROKER_ENCRYPTION_SECRET")
            .map_err(|_| ConfigError::Missing("BROKER_ENCRYPTION_SECRET"))?;
        if encryption_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "BROKER_ENCRYPTION_SECRET",
                "must not be empty",
            ));
        }

        let max_connections: u32 = parse_var("BROKER_DB_MAX_CONNECTIONS", "10")?;
        let interval_ms: u64 = parse_var("BROKER_DB_RETRY_INTERVAL_MS", "500")?;
        let timeout_secs: u64 = parse_var("BROKER_DB_RETRY_TIMEOUT_SECS", "10")?;

        Ok(Self {
            database_url,
            encryption_secret,
            max_connections,
            retry_policy: RetryPolicy::fixed(
                Duration::from_millis(interval_ms),
                Duration::from_secs(timeout_secs),
            ),
        })
    }
}

/// Read an optional variable, falling back to `default`.
pub fn parse_var<T: std::str::FromStr>(
    name: &'static str,
    default: &str,
) -> Result<T, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Invalid(name, "must be a non-negative integer"))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
