//! Anchor AppView binary entry point

use anchor_appview::{AppState, config, feed, graph, ingest};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Initialize metrics
/// 3. Load configuration from file and environment
/// 4. Initialize AppState
/// 5. Build Axum router and start HTTP server
/// 6. Start background tasks (ingestion, follow sync, profile sweep)
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("ANCHOR__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "anchor_appview=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "anchor_appview=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting Anchor AppView...");

    // 2. Initialize metrics
    anchor_appview::metrics::init_metrics();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        collection = %config.ingest.collection,
        jetstream = %config.atproto.jetstream_base,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = anchor_appview::build_router(state.clone());

    // 6. Start background tasks
    if config.ingest.enabled {
        spawn_ingestion_task(state.clone());
    }
    if config.graph.enabled {
        spawn_follow_sync_task(state.clone());
    }
    spawn_profile_sweep_task(state.clone());

    // 7. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Spawn the periodic ingestion task
///
/// Each tick runs one bounded ingestion cycle: stream from Jetstream,
/// fall back to repo polling when the stream yields nothing.
fn spawn_ingestion_task(state: AppState) {
    tokio::spawn(async move {
        let poller = ingest::IngestionPoller::new(
            state.db.clone(),
            state.http_client.clone(),
            state.config.clone(),
        );

        let interval_secs = state.config.ingest.interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            match poller.run_cycle().await {
                Ok(summary) => {
                    tracing::debug!(
                        events = summary.events_processed(),
                        errors = summary.errors,
                        "Ingestion cycle finished"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Ingestion cycle failed");
                }
            }
        }
    });

    tracing::info!("Ingestion task spawned");
}

/// Spawn the periodic follow graph sync task
fn spawn_follow_sync_task(state: AppState) {
    tokio::spawn(async move {
        let job = graph::FollowSyncJob::new(
            state.db.clone(),
            state.http_client.clone(),
            state.config.clone(),
        );

        let interval_secs = state.config.graph.interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        // Delay the first batch by one interval so startup is not
        // dominated by paging the social graph
        interval.tick().await;

        loop {
            interval.tick().await;

            if let Err(e) = job.run_batch(&state.db, &state.config).await {
                tracing::error!(error = %e, "Follow sync batch failed");
            }
        }
    });

    tracing::info!("Follow sync task spawned");
}

/// Spawn the periodic profile cache sweep task
fn spawn_profile_sweep_task(state: AppState) {
    tokio::spawn(async move {
        let resolver = feed::ProfileResolver::new(
            state.db.clone(),
            state.http_client.clone(),
            state.config.clone(),
        );

        let interval_secs = state.config.profiles.sweep_interval_seconds.max(1);
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));

        interval.tick().await;

        loop {
            interval.tick().await;

            if let Err(e) = resolver.sweep_stale().await {
                tracing::error!(error = %e, "Profile sweep failed");
            }
        }
    });

    tracing::info!("Profile sweep task spawned");
}
