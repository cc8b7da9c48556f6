//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "anchor_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Ingestion Metrics
    pub static ref INGEST_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_ingest_events_total", "Total firehose/fallback events handled"),
        &["source", "outcome"]
    ).expect("metric can be created");
    pub static ref INGEST_RUNS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_ingest_runs_total", "Total ingestion cycles executed"),
        &["status"]
    ).expect("metric can be created");
    pub static ref INGEST_RUN_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "anchor_ingest_run_duration_seconds",
            "Ingestion cycle duration in seconds"
        ).buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
        &["source"]
    ).expect("metric can be created");

    // Feed Metrics
    pub static ref FEED_QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_feed_queries_total", "Total feed queries served"),
        &["feed"]
    ).expect("metric can be created");

    // Profile Resolver Metrics
    pub static ref PROFILE_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_profile_fetches_total", "Total upstream profile fetches"),
        &["status"]
    ).expect("metric can be created");
    pub static ref PROFILE_CACHE_LOOKUPS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_profile_cache_lookups_total", "Profile cache lookups by result"),
        &["result"]
    ).expect("metric can be created");

    // Follow Sync Metrics
    pub static ref FOLLOW_SYNC_USERS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_follow_sync_users_total", "Users processed by follow sync"),
        &["strategy", "status"]
    ).expect("metric can be created");

    // Application Metrics
    pub static ref CHECKINS_TOTAL: IntGauge = IntGauge::new(
        "anchor_checkins_total",
        "Total number of stored check-ins"
    ).expect("metric can be created");
    pub static ref FOLLOW_EDGES_TOTAL: IntGauge = IntGauge::new(
        "anchor_follow_edges_total",
        "Total number of stored follow edges"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("anchor_errors_total", "Total number of errors"),
        &["error_type", "endpoint"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("HTTP_REQUESTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("HTTP_REQUEST_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(INGEST_EVENTS_TOTAL.clone()))
        .expect("INGEST_EVENTS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(INGEST_RUNS_TOTAL.clone()))
        .expect("INGEST_RUNS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(INGEST_RUN_DURATION_SECONDS.clone()))
        .expect("INGEST_RUN_DURATION_SECONDS can be registered");
    REGISTRY
        .register(Box::new(FEED_QUERIES_TOTAL.clone()))
        .expect("FEED_QUERIES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROFILE_FETCHES_TOTAL.clone()))
        .expect("PROFILE_FETCHES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(PROFILE_CACHE_LOOKUPS_TOTAL.clone()))
        .expect("PROFILE_CACHE_LOOKUPS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FOLLOW_SYNC_USERS_TOTAL.clone()))
        .expect("FOLLOW_SYNC_USERS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CHECKINS_TOTAL.clone()))
        .expect("CHECKINS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FOLLOW_EDGES_TOTAL.clone()))
        .expect("FOLLOW_EDGES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(ERRORS_TOTAL.clone()))
        .expect("ERRORS_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}
