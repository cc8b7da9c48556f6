//! API layer
//!
//! HTTP handlers for:
//! - Feed API (global, nearby, user, following, stats)
//! - Metrics (Prometheus)

mod dto;
mod feeds;
pub mod metrics;

pub use dto::*;

pub use feeds::feeds_router;
pub use metrics::metrics_router;
