//! Feed endpoints

use axum::{
    Router,
    extract::{Query, State},
    response::Json,
    routing::get,
};
use serde::Deserialize;

use super::dto::{
    CheckinView, CoordinatesView, FollowingFeedResponse, GlobalFeedResponse, NearbyResponse,
    StatsResponse, UserFeedResponse, UserRef,
};
use crate::AppState;
use crate::error::AppError;
use crate::feed::{DEFAULT_LIMIT, DEFAULT_RADIUS_KM, FeedService};
use crate::metrics::{HTTP_REQUEST_DURATION_SECONDS, HTTP_REQUESTS_TOTAL};

#[derive(Debug, Deserialize)]
pub struct GlobalParams {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NearbyParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius: Option<f64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UserParams {
    pub did: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FollowingParams {
    pub user: Option<String>,
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

fn feed_service(state: &AppState) -> FeedService {
    FeedService::new(
        state.db.clone(),
        state.http_client.clone(),
        state.config.clone(),
    )
}

/// GET /global
pub async fn global_feed(
    State(state): State<AppState>,
    Query(params): Query<GlobalParams>,
) -> Result<Json<GlobalFeedResponse>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/global"])
        .start_timer();

    let page = feed_service(&state)
        .global_feed(params.limit.unwrap_or(DEFAULT_LIMIT), params.cursor.as_deref())
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/global", "200"])
        .inc();
    Ok(Json(GlobalFeedResponse {
        checkins: page.items.into_iter().map(CheckinView::from_feed_item).collect(),
        cursor: page.cursor,
    }))
}

/// GET /nearby
pub async fn nearby_checkins(
    State(state): State<AppState>,
    Query(params): Query<NearbyParams>,
) -> Result<Json<NearbyResponse>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/nearby"])
        .start_timer();

    // Zero is a valid coordinate; only absence is an error
    let lat = params
        .lat
        .ok_or_else(|| AppError::Validation("lat parameter is required".to_string()))?;
    let lng = params
        .lng
        .ok_or_else(|| AppError::Validation("lng parameter is required".to_string()))?;
    let radius = params
        .radius
        .filter(|r| *r > 0.0)
        .unwrap_or(DEFAULT_RADIUS_KM)
        .min(crate::feed::MAX_RADIUS_KM);

    let items = feed_service(&state)
        .nearby_checkins(lat, lng, radius, params.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/nearby", "200"])
        .inc();
    Ok(Json(NearbyResponse {
        checkins: items.into_iter().map(CheckinView::from_feed_item).collect(),
        center: CoordinatesView {
            latitude: lat,
            longitude: lng,
        },
        radius,
    }))
}

/// GET /user
pub async fn user_checkins(
    State(state): State<AppState>,
    Query(params): Query<UserParams>,
) -> Result<Json<UserFeedResponse>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/user"])
        .start_timer();

    let did = params
        .did
        .filter(|d| !d.is_empty())
        .ok_or_else(|| AppError::Validation("did parameter is required".to_string()))?;

    let items = feed_service(&state)
        .user_checkins(&did, params.limit.unwrap_or(DEFAULT_LIMIT))
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/user", "200"])
        .inc();
    Ok(Json(UserFeedResponse {
        checkins: items.into_iter().map(CheckinView::from_feed_item).collect(),
        user: UserRef { did },
    }))
}

/// GET /following
pub async fn following_feed(
    State(state): State<AppState>,
    Query(params): Query<FollowingParams>,
) -> Result<Json<FollowingFeedResponse>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/following"])
        .start_timer();

    let user = params
        .user
        .filter(|u| !u.is_empty())
        .ok_or_else(|| AppError::Validation("user parameter is required".to_string()))?;

    let page = feed_service(&state)
        .following_feed(
            &user,
            params.limit.unwrap_or(DEFAULT_LIMIT),
            params.cursor.as_deref(),
        )
        .await?;

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/following", "200"])
        .inc();

    if page.following_count == 0 {
        return Ok(Json(FollowingFeedResponse {
            checkins: Vec::new(),
            cursor: None,
            following_count: None,
            message: Some("No follows found for user".to_string()),
        }));
    }

    Ok(Json(FollowingFeedResponse {
        checkins: page.items.into_iter().map(CheckinView::from_feed_item).collect(),
        cursor: page.cursor,
        following_count: Some(page.following_count),
        message: None,
    }))
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let _timer = HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&["GET", "/stats"])
        .start_timer();

    let total_checkins = state.db.count_checkins().await?;
    let unique_authors = state.db.count_authors().await?;
    let total_follows = state.db.count_follow_edges().await?;
    let cached_profiles = state.db.count_profiles().await?;
    let last_ingest = state.db.latest_processing_log().await?.map(Into::into);

    HTTP_REQUESTS_TOTAL
        .with_label_values(&["GET", "/stats", "200"])
        .inc();
    Ok(Json(StatsResponse {
        total_checkins,
        unique_authors,
        total_follows,
        cached_profiles,
        last_ingest,
    }))
}

/// Create feed router
pub fn feeds_router() -> Router<AppState> {
    Router::new()
        .route("/global", get(global_feed))
        .route("/nearby", get(nearby_checkins))
        .route("/user", get(user_checkins))
        .route("/following", get(following_feed))
        .route("/stats", get(stats))
}
