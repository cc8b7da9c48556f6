//! Feed query engine
//!
//! Assembles the four check-in feeds (global, nearby, per-user,
//! following) from the store and enriches each page with cached
//! author profiles. Pagination is cursor based: the cursor is the
//! `created_at` of the last row on the previous page, and pages
//! select strictly-older rows, so a row never repeats across pages.

mod geo;
mod profiles;

pub use geo::{haversine_km, round_km};
pub use profiles::ProfileResolver;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::data::{Checkin, Database, ProfileCacheEntry};
use crate::error::{AppError, Result};
use crate::metrics::FEED_QUERIES_TOTAL;

/// Hard cap on page size across all feeds
pub const MAX_LIMIT: i64 = 100;
/// Default page size when the request does not specify one
pub const DEFAULT_LIMIT: i64 = 50;
/// Largest accepted nearby radius in kilometres
pub const MAX_RADIUS_KM: f64 = 50.0;
/// Default nearby radius in kilometres
pub const DEFAULT_RADIUS_KM: f64 = 5.0;

/// Candidate rows fetched per requested nearby row before the
/// distance filter is applied
const NEARBY_OVERSAMPLE: i64 = 3;

/// One feed row: a check-in plus its resolved author and, for the
/// nearby feed, the distance from the query point
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub checkin: Checkin,
    pub author: ProfileCacheEntry,
    pub distance_km: Option<f64>,
}

/// A page of feed rows plus the cursor for the next page
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    pub cursor: Option<String>,
}

/// Following feed result
///
/// `items` is empty and `following_count` zero when the user has no
/// stored follow edges; the API layer turns that into a message
/// instead of an empty page.
#[derive(Debug, Clone)]
pub struct FollowingPage {
    pub items: Vec<FeedItem>,
    pub cursor: Option<String>,
    pub following_count: i64,
}

/// Read-side service behind the HTTP API
pub struct FeedService {
    db: Arc<Database>,
    profiles: ProfileResolver,
}

impl FeedService {
    pub fn new(
        db: Arc<Database>,
        http_client: Arc<reqwest::Client>,
        config: Arc<AppConfig>,
    ) -> Self {
        let profiles = ProfileResolver::new(db.clone(), http_client, config);
        Self { db, profiles }
    }

    /// Most recent check-ins across all authors
    pub async fn global_feed(&self, limit: i64, cursor: Option<&str>) -> Result<FeedPage> {
        FEED_QUERIES_TOTAL.with_label_values(&["global"]).inc();
        let limit = clamp_limit(limit);
        let checkins = self.db.get_global_feed(limit, cursor).await?;
        self.page_from(checkins).await
    }

    /// Check-ins within `radius_km` of a point, nearest first
    ///
    /// Coordinates are stored unindexed, so this oversamples recent
    /// located rows and filters by great-circle distance in memory.
    /// A sparse area can therefore return fewer rows than exist
    /// within the radius; recency wins over completeness.
    pub async fn nearby_checkins(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        limit: i64,
    ) -> Result<Vec<FeedItem>> {
        FEED_QUERIES_TOTAL.with_label_values(&["nearby"]).inc();

        if !(-90.0..=90.0).contains(&lat) {
            return Err(AppError::Validation(
                "lat must be between -90 and 90".to_string(),
            ));
        }
        if !(-180.0..=180.0).contains(&lng) {
            return Err(AppError::Validation(
                "lng must be between -180 and 180".to_string(),
            ));
        }

        let limit = clamp_limit(limit);
        let radius_km = if radius_km <= 0.0 {
            DEFAULT_RADIUS_KM
        } else {
            radius_km.min(MAX_RADIUS_KM)
        };

        let candidates = self
            .db
            .get_recent_located_checkins(limit * NEARBY_OVERSAMPLE)
            .await?;

        let mut within: Vec<(Checkin, f64)> = candidates
            .into_iter()
            .filter_map(|c| match (c.latitude, c.longitude) {
                (Some(c_lat), Some(c_lng)) => {
                    let d = haversine_km(lat, lng, c_lat, c_lng);
                    (d <= radius_km).then_some((c, d))
                }
                _ => None,
            })
            .collect();

        within.sort_by(|a, b| a.1.total_cmp(&b.1));
        within.truncate(limit as usize);

        let authors = self
            .profiles
            .resolve_many(within.iter().map(|(c, _)| c.author_did.clone()))
            .await?;

        Ok(within
            .into_iter()
            .map(|(checkin, distance)| {
                let author = author_for(&authors, &checkin.author_did);
                FeedItem {
                    checkin,
                    author,
                    distance_km: Some(round_km(distance)),
                }
            })
            .collect())
    }

    /// A single author's check-ins, newest first
    pub async fn user_checkins(&self, did: &str, limit: i64) -> Result<Vec<FeedItem>> {
        FEED_QUERIES_TOTAL.with_label_values(&["user"]).inc();
        let limit = clamp_limit(limit);
        let checkins = self.db.get_user_checkins(did, limit).await?;
        let page = self.page_from(checkins).await?;
        Ok(page.items)
    }

    /// Check-ins from authors the user follows
    pub async fn following_feed(
        &self,
        follower_did: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<FollowingPage> {
        FEED_QUERIES_TOTAL.with_label_values(&["following"]).inc();
        let limit = clamp_limit(limit);

        let following_count = self.db.count_follows(follower_did).await?;
        if following_count == 0 {
            return Ok(FollowingPage {
                items: Vec::new(),
                cursor: None,
                following_count: 0,
            });
        }

        let checkins = self.db.get_following_feed(follower_did, limit, cursor).await?;
        let page = self.page_from(checkins).await?;
        Ok(FollowingPage {
            items: page.items,
            cursor: page.cursor,
            following_count,
        })
    }

    /// Enrich a page of rows with author profiles and derive the
    /// next-page cursor from the last row
    async fn page_from(&self, checkins: Vec<Checkin>) -> Result<FeedPage> {
        let cursor = checkins.last().map(|c| c.created_at.clone());
        let authors = self
            .profiles
            .resolve_many(checkins.iter().map(|c| c.author_did.clone()))
            .await?;

        let items = checkins
            .into_iter()
            .map(|checkin| {
                let author = author_for(&authors, &checkin.author_did);
                FeedItem {
                    checkin,
                    author,
                    distance_km: None,
                }
            })
            .collect();

        Ok(FeedPage { items, cursor })
    }
}

fn clamp_limit(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_LIMIT
    } else {
        limit.min(MAX_LIMIT)
    }
}

fn author_for(
    authors: &std::collections::HashMap<String, ProfileCacheEntry>,
    did: &str,
) -> ProfileCacheEntry {
    authors.get(did).cloned().unwrap_or_else(|| ProfileCacheEntry {
        did: did.to_string(),
        handle: did.to_string(),
        display_name: None,
        avatar_url: None,
        fetched_at: chrono::Utc::now(),
    })
}
