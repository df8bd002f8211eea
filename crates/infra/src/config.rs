//! Configuration loading and representation.
//!
//! Everything is read from environment variables once, at the entry point, and
//! passed down as typed values. `from_lookup` takes any key lookup so tests do
//! not have to touch the process environment.

use core::str::FromStr;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use docintel_documents::{BackoffPolicy, DEFAULT_QUOTA_LIMIT};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_ANALYZER_ID: &str = "prebuilt-receipt";
pub const DEFAULT_ANALYZER_API_VERSION: &str = "2024-11-30";
pub const DEFAULT_ANALYZER_KEY_SECRET: &str = "ANALYZER-KEY";
pub const DEFAULT_OBJECT_STORE_BASE_URL: &str = "memory://documents";
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 600;
pub const DEFAULT_QUOTA_WAIT_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_BATCH_WAVE_SIZE: usize = 5;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;
pub const DEFAULT_SIMULATED_POLLS: u32 = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("{name} must be set when {when}")]
    Missing {
        name: &'static str,
        when: &'static str,
    },
}

/// Where job records, quota documents and batches live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStoreConfig {
    /// Filesystem root; `None` keeps blobs in memory
    pub root: Option<PathBuf>,
    /// Prefix used to build addressable object URLs
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzerConfig {
    /// Analysis service endpoint; `None` selects the simulated backend
    pub endpoint: Option<String>,
    pub analyzer_id: String,
    pub api_version: String,
    /// Secret-store name of the subscription key
    pub key_secret_name: String,
    /// `running` responses the simulated backend returns before succeeding
    pub simulated_polls: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub storage: StorageConfig,
    pub object_store: ObjectStoreConfig,
    pub analyzer: AnalyzerConfig,
    pub quota_default_limit: u32,
    /// `None` disables deduplication
    pub dedup_window: Option<Duration>,
    pub backoff: BackoffPolicy,
    pub quota_wait_interval: Duration,
    pub batch_wave_size: usize,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let use_persistent: bool = parse_or(&get, "USE_PERSISTENT_STORES", false)?;
        let storage = if use_persistent {
            let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing {
                name: "DATABASE_URL",
                when: "USE_PERSISTENT_STORES=true",
            })?;
            StorageConfig::Postgres { database_url }
        } else {
            StorageConfig::InMemory
        };

        let backoff = BackoffPolicy {
            initial_interval: Duration::from_millis(parse_or(&get, "POLL_INITIAL_BACKOFF_MS", 1_000u64)?),
            multiplier: parse_or(&get, "POLL_BACKOFF_MULTIPLIER", 1.5f64)?,
            max_interval: Duration::from_millis(parse_or(&get, "POLL_MAX_BACKOFF_MS", 5_000u64)?),
            max_attempts: parse_or(&get, "POLL_MAX_ATTEMPTS", 180u32)?,
        };
        backoff.validate().map_err(|e| ConfigError::Invalid {
            name: "POLL_*",
            reason: e.to_string(),
        })?;

        let dedup_secs: u64 = parse_or(&get, "DEDUP_WINDOW_SECS", DEFAULT_DEDUP_WINDOW_SECS)?;
        let batch_wave_size: usize = parse_or(&get, "BATCH_WAVE_SIZE", DEFAULT_BATCH_WAVE_SIZE)?;
        if batch_wave_size == 0 {
            return Err(ConfigError::Invalid {
                name: "BATCH_WAVE_SIZE",
                reason: "must be at least 1".to_string(),
            });
        }
        let quota_wait_ms: u64 = parse_or(&get, "QUOTA_WAIT_INTERVAL_MS", DEFAULT_QUOTA_WAIT_INTERVAL_MS)?;
        if quota_wait_ms == 0 {
            return Err(ConfigError::Invalid {
                name: "QUOTA_WAIT_INTERVAL_MS",
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)))?,
            storage,
            object_store: ObjectStoreConfig {
                root: get("OBJECT_STORE_ROOT").map(PathBuf::from),
                base_url: get("OBJECT_STORE_BASE_URL"),
            },
            analyzer: AnalyzerConfig {
                endpoint: get("ANALYZER_ENDPOINT").map(|e| e.trim_end_matches('/').to_string()),
                analyzer_id: get("ANALYZER_ID").unwrap_or_else(|| DEFAULT_ANALYZER_ID.to_string()),
                api_version: get("ANALYZER_API_VERSION")
                    .unwrap_or_else(|| DEFAULT_ANALYZER_API_VERSION.to_string()),
                key_secret_name: get("ANALYZER_KEY_SECRET")
                    .unwrap_or_else(|| DEFAULT_ANALYZER_KEY_SECRET.to_string()),
                simulated_polls: parse_or(&get, "ANALYZER_SIMULATED_POLLS", DEFAULT_SIMULATED_POLLS)?,
            },
            quota_default_limit: parse_or(&get, "QUOTA_DEFAULT_LIMIT", DEFAULT_QUOTA_LIMIT)?,
            dedup_window: (dedup_secs > 0).then(|| Duration::from_secs(dedup_secs)),
            backoff,
            quota_wait_interval: Duration::from_millis(quota_wait_ms),
            batch_wave_size,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("'{raw}': {e}"),
        }),
        None => Ok(default),
    }
}
