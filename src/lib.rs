//! Anchor AppView - a feed backend for location check-in records
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      API Layer (Axum)                        │
//! │  - Feed endpoints (global, nearby, user, following)         │
//! │  - Stats and health endpoints                               │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Service Layer                             │
//! │  - Ingestion poller (Jetstream + fallback polling)          │
//! │  - Feed queries and profile resolution                      │
//! │  - Follow graph sync                                        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Layer                              │
//! │  - SQLite (sqlx)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: HTTP handlers for the feed API
//! - `ingest`: Jetstream subscription, fallback polling, address resolution
//! - `feed`: Feed queries, geo math, profile cache
//! - `graph`: Follow graph synchronization
//! - `data`: Database layer
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod feed;
pub mod graph;
pub mod ingest;
pub mod metrics;

use std::sync::Arc;

/// Application state shared across all handlers
///
/// Cloned per request; all fields are cheap `Arc` handles.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Database connection pool
    pub db: Arc<data::Database>,

    /// HTTP client for upstream XRPC calls
    pub http_client: Arc<reqwest::Client>,
}

impl AppState {
    /// Initialize application state
    ///
    /// Connects to the SQLite database (running migrations) and
    /// builds the shared HTTP client.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrated.
    pub async fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        let db = data::Database::connect(&config.database.path).await?;
        tracing::info!(path = %config.database.path.display(), "Database connected");

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("anchor-appview/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(error::AppError::HttpClient)?;

        Ok(Self {
            config: Arc::new(config),
            db: Arc::new(db),
            http_client: Arc::new(http_client),
        })
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> axum::Router {
    use axum::Router;
    use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api::feeds_router())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
        .merge(api::metrics_router())
}

async fn health_check() -> &'static str {
    "OK"
}
