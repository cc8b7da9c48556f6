//! Common test utilities for E2E tests

use anchor_appview::{AppState, config};
use chrono::Utc;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    ///
    /// Upstream bases point at a port nothing listens on, so any
    /// accidental network call fails fast instead of hanging.
    pub async fn new() -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            database: config::DatabaseConfig {
                path: db_path.clone(),
            },
            atproto: config::AtprotoConfig {
                public_api_base: "http://127.0.0.1:1".to_string(),
                jetstream_base: "ws://127.0.0.1:1".to_string(),
            },
            ingest: config::IngestConfig {
                enabled: false,
                collection: "app.dropanchor.checkin".to_string(),
                interval_seconds: 300,
                hard_timeout_seconds: 5,
                inactivity_timeout_seconds: 2,
                cursor_backfill_seconds: 3600,
                fallback_repos: vec![],
            },
            graph: config::GraphSyncConfig {
                enabled: false,
                strategy: config::FollowSyncMode::Replace,
                interval_seconds: 3600,
                user_delay_ms: 0,
                page_delay_ms: 0,
                active_window_days: 30,
            },
            profiles: config::ProfileConfig {
                ttl_seconds: 86_400,
                sweep_interval_seconds: 3600,
                sweep_batch_size: 25,
                fetch_concurrency: 4,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = anchor_appview::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Insert a check-in directly into the store
    pub async fn insert_checkin(&self, checkin: &anchor_appview::data::Checkin) {
        assert!(self.state.db.insert_checkin_if_new(checkin).await.unwrap());
    }

    /// Insert one follow edge directly into the store
    pub async fn insert_follow(&self, follower_did: &str, following_did: &str) {
        let now = Utc::now();
        self.state
            .db
            .insert_follow_edge(&anchor_appview::data::FollowEdge {
                follower_did: follower_did.to_string(),
                following_did: following_did.to_string(),
                created_at: now,
                synced_at: now,
            })
            .await
            .unwrap();
    }

    /// Cache a profile so feeds do not fall back to bare DIDs
    pub async fn cache_profile(&self, did: &str, handle: &str) {
        self.state
            .db
            .upsert_profile(&anchor_appview::data::ProfileCacheEntry {
                did: did.to_string(),
                handle: handle.to_string(),
                display_name: None,
                avatar_url: None,
                fetched_at: Utc::now(),
            })
            .await
            .unwrap();
    }
}

/// Build a check-in row for insertion
pub fn sample_checkin(
    rkey: &str,
    author_did: &str,
    created_at: &str,
    coords: Option<(f64, f64)>,
) -> anchor_appview::data::Checkin {
    anchor_appview::data::Checkin {
        id: rkey.to_string(),
        uri: format!("at://{author_did}/app.dropanchor.checkin/{rkey}"),
        author_did: author_did.to_string(),
        text: format!("checkin {rkey}"),
        created_at: created_at.to_string(),
        latitude: coords.map(|(lat, _)| lat),
        longitude: coords.map(|(_, lng)| lng),
        address_ref_uri: None,
        address_ref_cid: None,
        cached_address_name: None,
        cached_address_street: None,
        cached_address_locality: None,
        cached_address_region: None,
        cached_address_country: None,
        cached_address_postal_code: None,
        indexed_at: Utc::now(),
    }
}
