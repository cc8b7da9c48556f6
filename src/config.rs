//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub atproto: AtprotoConfig,
    pub ingest: IngestConfig,
    pub graph: GraphSyncConfig,
    pub profiles: ProfileConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 8080)
    pub port: u16,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Upstream AT Protocol endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct AtprotoConfig {
    /// Public AppView XRPC base (profile lookups, getFollows)
    /// e.g., "https://public.api.bsky.app"
    pub public_api_base: String,
    /// Jetstream WebSocket base, e.g. "wss://jetstream2.us-east.bsky.network"
    pub jetstream_base: String,
}

/// Ingestion poller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Enable the background ingestion task
    pub enabled: bool,
    /// Record collection NSID to ingest
    pub collection: String,
    /// Seconds between ingestion cycles
    pub interval_seconds: u64,
    /// Hard cap on a single streaming phase, in seconds
    pub hard_timeout_seconds: u64,
    /// Close the stream after this many seconds without an event
    pub inactivity_timeout_seconds: u64,
    /// Cursor default when none is persisted: now minus this many seconds
    pub cursor_backfill_seconds: u64,
    /// Repo DIDs polled via listRecords when the stream yields nothing
    #[serde(default)]
    pub fallback_repos: Vec<String>,
}

/// Follow-graph sync configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSyncConfig {
    /// Enable the background follow sync task
    pub enabled: bool,
    /// Sync strategy to apply per user
    #[serde(default)]
    pub strategy: FollowSyncMode,
    /// Seconds between sync batches
    pub interval_seconds: u64,
    /// Delay between users within a batch, in milliseconds
    pub user_delay_ms: u64,
    /// Delay between getFollows pages, in milliseconds
    pub page_delay_ms: u64,
    /// A user is "active" with a check-in newer than this many days
    pub active_window_days: i64,
}

/// Follow sync strategy selector
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FollowSyncMode {
    /// Delete-all-then-insert from the public getFollows endpoint
    #[default]
    Replace,
    /// Compute add/remove sets from the user's own follow records
    Diff,
}

/// Profile cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    /// Entries older than this many seconds are stale (default: 86400)
    pub ttl_seconds: i64,
    /// Seconds between staleness sweeps
    pub sweep_interval_seconds: u64,
    /// Stale entries refreshed per sweep
    pub sweep_batch_size: u32,
    /// Concurrent profile fetches per batch
    pub fetch_concurrency: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (ANCHOR_*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.path", "data/anchor.db")?
            .set_default("atproto.public_api_base", "https://public.api.bsky.app")?
            .set_default(
                "atproto.jetstream_base",
                "wss://jetstream2.us-east.bsky.network",
            )?
            .set_default("ingest.enabled", true)?
            .set_default("ingest.collection", "app.dropanchor.checkin")?
            .set_default("ingest.interval_seconds", 300)?
            .set_default("ingest.hard_timeout_seconds", 25)?
            .set_default("ingest.inactivity_timeout_seconds", 5)?
            .set_default("ingest.cursor_backfill_seconds", 3600)?
            .set_default("graph.enabled", true)?
            .set_default("graph.strategy", "replace")?
            .set_default("graph.interval_seconds", 3600)?
            .set_default("graph.user_delay_ms", 1000)?
            .set_default("graph.page_delay_ms", 250)?
            .set_default("graph.active_window_days", 30)?
            .set_default("profiles.ttl_seconds", 86400)?
            .set_default("profiles.sweep_interval_seconds", 3600)?
            .set_default("profiles.sweep_batch_size", 25)?
            .set_default("profiles.fetch_concurrency", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (ANCHOR_*)
            .add_source(
                Environment::with_prefix("ANCHOR")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.ingest.hard_timeout_seconds == 0 {
            return Err(crate::error::AppError::Config(
                "ingest.hard_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.ingest.inactivity_timeout_seconds > self.ingest.hard_timeout_seconds {
            return Err(crate::error::AppError::Config(
                "ingest.inactivity_timeout_seconds must not exceed ingest.hard_timeout_seconds"
                    .to_string(),
            ));
        }

        if self.ingest.collection.is_empty() {
            return Err(crate::error::AppError::Config(
                "ingest.collection must not be empty".to_string(),
            ));
        }

        if self.profiles.ttl_seconds <= 0 {
            return Err(crate::error::AppError::Config(
                "profiles.ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.profiles.fetch_concurrency == 0 {
            return Err(crate::error::AppError::Config(
                "profiles.fetch_concurrency must be greater than 0".to_string(),
            ));
        }

        if self.graph.active_window_days <= 0 {
            return Err(crate::error::AppError::Config(
                "graph.active_window_days must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
impl AppConfig {
    /// Baseline configuration for unit tests, pointed at the given
    /// public API base
    pub fn test_default(public_api_base: String) -> Self {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                path: PathBuf::from("/tmp/anchor-test.db"),
            },
            atproto: AtprotoConfig {
                public_api_base,
                jetstream_base: "wss://jetstream2.us-east.bsky.network".to_string(),
            },
            ingest: IngestConfig {
                enabled: true,
                collection: "app.dropanchor.checkin".to_string(),
                interval_seconds: 300,
                hard_timeout_seconds: 25,
                inactivity_timeout_seconds: 5,
                cursor_backfill_seconds: 3600,
                fallback_repos: vec![],
            },
            graph: GraphSyncConfig {
                enabled: true,
                strategy: FollowSyncMode::Replace,
                interval_seconds: 3600,
                user_delay_ms: 0,
                page_delay_ms: 0,
                active_window_days: 30,
            },
            profiles: ProfileConfig {
                ttl_seconds: 86_400,
                sweep_interval_seconds: 3600,
                sweep_batch_size: 25,
                fetch_concurrency: 10,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig::test_default("https://public.api.bsky.app".to_string())
    }

    #[test]
    fn validate_accepts_defaults() {
        let config = valid_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_hard_timeout() {
        let mut config = valid_config();
        config.ingest.hard_timeout_seconds = 0;

        let error = config
            .validate()
            .expect_err("zero hard timeout must fail validation");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("ingest.hard_timeout_seconds")
        ));
    }

    #[test]
    fn validate_rejects_inactivity_exceeding_hard_timeout() {
        let mut config = valid_config();
        config.ingest.inactivity_timeout_seconds = 60;
        config.ingest.hard_timeout_seconds = 25;

        let error = config
            .validate()
            .expect_err("inactivity window longer than hard deadline must fail");
        assert!(matches!(
            error,
            crate::error::AppError::Config(message)
                if message.contains("inactivity_timeout_seconds")
        ));
    }
}
