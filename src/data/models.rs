//! Data models
//!
//! Rust structs representing database entities.
//! All models use chrono for timestamps; processing-log rows use ULID ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// ID Types
// =============================================================================

/// Entity ID wrapper (ULID format, 26 characters)
///
/// Example: "01ARZ3NDEKTSV4RRFFQ69G5FAV"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    /// Generate a new ULID
    pub fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    /// Create from existing string
    pub fn from_string(s: String) -> Self {
        Self(s)
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Check-in
// =============================================================================

/// A location-tagged check-in record
///
/// One row per protocol record. `id` is the record key (unique per
/// author), `uri` is the globally unique at:// address.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Checkin {
    /// Record key (rkey), unique per author
    pub id: String,
    /// at://did/collection/rkey, globally unique
    pub uri: String,
    /// Author DID
    pub author_did: String,
    /// Check-in message text
    pub text: String,
    /// Author-supplied creation time (RFC3339)
    pub created_at: String,
    /// WGS84 latitude, null when missing or invalid
    pub latitude: Option<f64>,
    /// WGS84 longitude, null when missing or invalid
    pub longitude: Option<f64>,
    /// StrongRef URI of the linked address record
    pub address_ref_uri: Option<String>,
    /// StrongRef content hash of the linked address record
    pub address_ref_cid: Option<String>,
    pub cached_address_name: Option<String>,
    pub cached_address_street: Option<String>,
    pub cached_address_locality: Option<String>,
    pub cached_address_region: Option<String>,
    pub cached_address_country: Option<String>,
    pub cached_address_postal_code: Option<String>,
    /// When this row was ingested
    pub indexed_at: DateTime<Utc>,
}

// =============================================================================
// Address cache
// =============================================================================

/// Denormalized venue/address fields cached by address record URI
///
/// Entries expire after [`ADDRESS_CACHE_TTL_DAYS`] and must then be
/// re-resolved. A failed resolution records `failed_at` and is retried
/// on the next ingestion touching the same reference.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AddressCacheEntry {
    pub uri: String,
    pub cid: Option<String>,
    pub name: Option<String>,
    pub street: Option<String>,
    pub locality: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Fixed address cache expiry
pub const ADDRESS_CACHE_TTL_DAYS: i64 = 30;

impl AddressCacheEntry {
    /// Whether this entry is current enough to serve without re-resolving
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.resolved_at {
            Some(resolved_at) => now - resolved_at < chrono::Duration::days(ADDRESS_CACHE_TTL_DAYS),
            None => false,
        }
    }
}

// =============================================================================
// Follow edges
// =============================================================================

/// One edge of the follow graph
///
/// `(follower_did, following_did)` is the composite primary key.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct FollowEdge {
    pub follower_did: String,
    pub following_did: String,
    /// Creation time as reported by the social graph
    pub created_at: DateTime<Utc>,
    /// When this edge was last synced locally
    pub synced_at: DateTime<Utc>,
}

// =============================================================================
// Profile cache
// =============================================================================

/// Cached author display metadata, keyed by DID
///
/// Refreshed lazily on read-miss and periodically by the staleness sweep.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProfileCacheEntry {
    pub did: String,
    pub handle: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

impl ProfileCacheEntry {
    /// Whether this entry is younger than the given TTL
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl_seconds: i64) -> bool {
        now - self.fetched_at < chrono::Duration::seconds(ttl_seconds)
    }
}

// =============================================================================
// Processing log
// =============================================================================

/// Append-only audit row, one per ingestion run
///
/// Only read back for the stats endpoint's "last run" display.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProcessingLogEntry {
    pub id: String,
    pub run_at: DateTime<Utc>,
    /// "jetstream", "fallback", or "mixed"
    pub source: String,
    pub events_processed: i64,
    pub errors: i64,
    pub duration_ms: i64,
}
