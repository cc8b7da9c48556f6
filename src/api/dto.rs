//! API response shapes
//!
//! Wire DTOs are separate from the storage models so the JSON contract
//! (camelCase, nested author/coordinates/address objects) can evolve
//! independently of the schema.

use serde::Serialize;

use crate::data::{Checkin, ProcessingLogEntry, ProfileCacheEntry};
use crate::feed::FeedItem;

/// Author object embedded in every check-in view
#[derive(Debug, Clone, Serialize)]
pub struct AuthorView {
    pub did: String,
    pub handle: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoordinatesView {
    pub latitude: f64,
    pub longitude: f64,
}

/// Cached venue/address fields, present when resolved
#[derive(Debug, Clone, Serialize)]
pub struct AddressView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "postalCode", skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

/// One check-in as served by every feed endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CheckinView {
    pub id: String,
    pub uri: String,
    pub author: AuthorView,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<CoordinatesView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressView>,
    /// Distance from the query point in km, nearby feed only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

impl CheckinView {
    pub fn from_feed_item(item: FeedItem) -> Self {
        let FeedItem {
            checkin,
            author,
            distance_km,
        } = item;
        Self::build(checkin, author, distance_km)
    }

    fn build(checkin: Checkin, author: ProfileCacheEntry, distance: Option<f64>) -> Self {
        let coordinates = match (checkin.latitude, checkin.longitude) {
            (Some(latitude), Some(longitude)) => Some(CoordinatesView {
                latitude,
                longitude,
            }),
            _ => None,
        };

        let has_address = checkin.cached_address_name.is_some()
            || checkin.cached_address_street.is_some()
            || checkin.cached_address_locality.is_some()
            || checkin.cached_address_region.is_some()
            || checkin.cached_address_country.is_some()
            || checkin.cached_address_postal_code.is_some();
        let address = has_address.then(|| AddressView {
            name: checkin.cached_address_name,
            street: checkin.cached_address_street,
            locality: checkin.cached_address_locality,
            region: checkin.cached_address_region,
            country: checkin.cached_address_country,
            postal_code: checkin.cached_address_postal_code,
        });

        Self {
            id: checkin.id,
            uri: checkin.uri,
            author: AuthorView {
                did: author.did,
                handle: author.handle,
                display_name: author.display_name,
                avatar: author.avatar_url,
            },
            text: checkin.text,
            created_at: checkin.created_at,
            coordinates,
            address,
            distance,
        }
    }
}

/// `GET /global` response
#[derive(Debug, Serialize)]
pub struct GlobalFeedResponse {
    pub checkins: Vec<CheckinView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// `GET /nearby` response
#[derive(Debug, Serialize)]
pub struct NearbyResponse {
    pub checkins: Vec<CheckinView>,
    pub center: CoordinatesView,
    /// Effective search radius in km
    pub radius: f64,
}

#[derive(Debug, Serialize)]
pub struct UserRef {
    pub did: String,
}

/// `GET /user` response
#[derive(Debug, Serialize)]
pub struct UserFeedResponse {
    pub checkins: Vec<CheckinView>,
    pub user: UserRef,
}

/// `GET /following` response
///
/// `message` is set (and the rest empty) when the user has no stored
/// follow edges.
#[derive(Debug, Serialize)]
pub struct FollowingFeedResponse {
    pub checkins: Vec<CheckinView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(rename = "followingCount", skip_serializing_if = "Option::is_none")]
    pub following_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Most recent ingestion run, embedded in `GET /stats`
#[derive(Debug, Serialize)]
pub struct LastIngestView {
    #[serde(rename = "runAt")]
    pub run_at: String,
    pub source: String,
    #[serde(rename = "eventsProcessed")]
    pub events_processed: i64,
    pub errors: i64,
    #[serde(rename = "durationMs")]
    pub duration_ms: i64,
}

impl From<ProcessingLogEntry> for LastIngestView {
    fn from(entry: ProcessingLogEntry) -> Self {
        Self {
            run_at: entry.run_at.to_rfc3339(),
            source: entry.source,
            events_processed: entry.events_processed,
            errors: entry.errors,
            duration_ms: entry.duration_ms,
        }
    }
}

/// `GET /stats` response
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(rename = "totalCheckins")]
    pub total_checkins: i64,
    #[serde(rename = "uniqueAuthors")]
    pub unique_authors: i64,
    #[serde(rename = "totalFollows")]
    pub total_follows: i64,
    #[serde(rename = "cachedProfiles")]
    pub cached_profiles: i64,
    #[serde(rename = "lastIngest", skip_serializing_if = "Option::is_none")]
    pub last_ingest: Option<LastIngestView>,
}
