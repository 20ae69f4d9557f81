// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

use broker_core::config::{StorageConfig, parse_var};

pub use broker_core::config::ConfigError;

/// Broker worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database and encryption settings
    pub storage: StorageConfig,
    /// Number of concurrent operation workers
    pub workers: usize,
    /// Time after creation at which a retrying operation is failed
    pub operation_timeout: Duration,
    /// Resource label synchronization
    pub label_sync: LabelSyncConfig,
}

/// Label synchronization settings.
#[derive(Clone)]
pub struct LabelSyncConfig {
    pub enabled: bool,
    /// Sleep between polls of an empty queue
    pub poll_interval: Duration,
    /// Base URL of the resource collection, e.g. `https://kcp/apis/operator.kyma-project.io/v1beta2`
    pub api_url: Option<String>,
    pub api_token: Option<String>,
    /// Bound on each resource API call
    pub request_timeout: Duration,
}

impl std::fmt::Debug for LabelSyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelSyncConfig")
            .field("enabled", &self.enabled)
            .field("poll_interval", &self.poll_interval)
            .field("api_url", &self.api_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for LabelSyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: Duration::from_secs(5),
            api_url: None,
            api_token: None,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Storage variables are described on [`StorageConfig::from_env`].
    ///
    /// Optional (with defaults):
    /// - `BROKER_WORKERS`: concurrent operation workers (default: 5)
    /// - `BROKER_OPERATION_TIMEOUT_SECS`: retry budget per operation (default: 86400)
    /// - `BROKER_LABEL_SYNC_ENABLED`: "true" or "1" to enable (default: false)
    /// - `BROKER_LABEL_SYNC_INTERVAL_MS`: empty-queue sleep (default: 5000)
    /// - `BROKER_RESOURCE_API_URL`: resource API base URL (required when label sync is enabled)
    /// - `BROKER_RESOURCE_API_TOKEN`: bearer token for the resource API
    /// - `BROKER_RESOURCE_REQUEST_TIMEOUT_SECS`: per-call timeout (default: 5)
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage = StorageConfig::from_env()?;

        let workers: usize = parse_var("BROKER_WORKERS", "5")?;
        if workers == 0 {
            return Err(ConfigError::Invalid("BROKER_WORKERS", "must be at least 1"));
        }
        let timeout_secs: u64 = parse_var("BROKER_OPERATION_TIMEOUT_SECS", "86400")?;

        let enabled = std::env::var("BROKER_LABEL_SYNC_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let interval_ms: u64 = parse_var("BROKER_LABEL_SYNC_INTERVAL_MS", "5000")?;
        let request_timeout_secs: u64 = parse_var("BROKER_RESOURCE_REQUEST_TIMEOUT_SECS", "5")?;
        let api_url = std::env::var("BROKER_RESOURCE_API_URL")
            .ok()
            .filter(|v| !v.is_empty());
        let api_token = std::env::var("BROKER_RESOURCE_API_TOKEN")
            .ok()
            .filter(|v| !v.is_empty());

        if enabled && api_url.is_none() {
            return Err(ConfigError::Missing("BROKER_RESOURCE_API_URL"));
        }

        Ok(Self {
            storage,
            workers,
            operation_timeout: Duration::from_secs(timeout_secs),
            label_sync: LabelSyncConfig {
                enabled,
                poll_interval: Duration::from_millis(interval_ms),
                api_url,
                api_token,
                request_timeout: Duration::from_secs(request_timeout_secs),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Serializes tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn base_env() -> EnvGuard {
        let mut guard = EnvGuard::new();
        guard.set("BROKER_DATABASE_URL", "postgres://localhost/broker");
        guard.set("BROKER_ENCRYPTION_SECRET", "s3cret");
        for key in [
            "BROKER_DB_MAX_CONNECTIONS",
            "BROKER_DB_RETRY_INTERVAL_MS",
            "BROKER_DB_RETRY_TIMEOUT_SECS",
            "BROKER_WORKERS",
            "BROKER_OPERATION_TIMEOUT_SECS",
            "BROKER_LABEL_SYNC_ENABLED",
            "BROKER_LABEL_SYNC_INTERVAL_MS",
            "BROKER_RESOURCE_API_URL",
            "BROKER_RESOURCE_API_TOKEN",
            "BROKER_RESOURCE_REQUEST_TIMEOUT_SECS",
        ] {
            guard.remove(key);
        }
        guard
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let _guard = base_env();

        let config = Config::from_env().unwrap();

        assert_eq!(config.workers, 5);
        assert_eq!(config.operation_timeout, Duration::from_secs(86400));
        assert!(!config.label_sync.enabled);
        assert_eq!(config.label_sync.poll_interval, Duration::from_secs(5));
        assert_eq!(config.label_sync.request_timeout, Duration::from_secs(5));
        assert!(config.label_sync.api_url.is_none());
    }

    #[test]
    fn test_label_sync_requires_api_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = base_env();
        guard.set("BROKER_LABEL_SYNC_ENABLED", "true");

        let result = Config::from_env();

        assert!(matches!(
            result,
            Err(ConfigError::Missing("BROKER_RESOURCE_API_URL"))
        ));
    }

    #[test]
    fn test_label_sync_enabled() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = base_env();
        guard.set("BROKER_LABEL_SYNC_ENABLED", "1");
        guard.set("BROKER_RESOURCE_API_URL", "https://kcp.example.com/apis/v1");
        guard.set("BROKER_RESOURCE_API_TOKEN", "token");
        guard.set("BROKER_LABEL_SYNC_INTERVAL_MS", "250");

        let config = Config::from_env().unwrap();

        assert!(config.label_sync.enabled);
        assert_eq!(config.label_sync.poll_interval, Duration::from_millis(250));
        assert_eq!(config.label_sync.api_token.as_deref(), Some("token"));
        assert!(!format!("{:?}", config.label_sync).contains("token\""));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = base_env();
        guard.set("BROKER_WORKERS", "0");

        let result = Config::from_env();

        assert!(matches!(result, Err(ConfigError::Invalid("BROKER_WORKERS", _))));
    }

    #[test]
    fn test_missing_storage_config_propagates() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = base_env();
        guard.remove("BROKER_ENCRYPTION_SECRET");

        let result = Config::from_env();

        assert!(matches!(
            result,
            Err(ConfigError::Missing("BROKER_ENCRYPTION_SECRET"))
        ));
    }
}
