//! SQLite database operations
//!
//! All database access goes through this module.
//! Migrations run automatically on connect, once per process.

use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite, SqlitePool};
use std::collections::HashSet;
use std::path::Path;

use super::models::*;
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

/// Setting key holding the last processed Jetstream time_us cursor
const INGEST_CURSOR_KEY: &str = "jetstream_cursor";

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        // Create connection string
        let connection_string = format!("sqlite:{}?mode=rwc", path.display());

        // Create connection pool
        let pool = SqlitePool::connect(&connection_string).await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Check-ins
    // =========================================================================

    /// Insert a check-in unless a row with the same author and rkey exists.
    ///
    /// The unique constraints convert at-least-once delivery from the
    /// stream into at-most-once storage; a duplicate is a silent skip.
    ///
    /// # Returns
    /// `true` if inserted, `false` if the row already existed.
    pub async fn insert_checkin_if_new(&self, checkin: &Checkin) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO checkins (
                id, uri, author_did, text, created_at, latitude, longitude,
                address_ref_uri, address_ref_cid,
                cached_address_name, cached_address_street, cached_address_locality,
                cached_address_region, cached_address_country, cached_address_postal_code,
                indexed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&checkin.id)
        .bind(&checkin.uri)
        .bind(&checkin.author_did)
        .bind(&checkin.text)
        .bind(&checkin.created_at)
        .bind(checkin.latitude)
        .bind(checkin.longitude)
        .bind(&checkin.address_ref_uri)
        .bind(&checkin.address_ref_cid)
        .bind(&checkin.cached_address_name)
        .bind(&checkin.cached_address_street)
        .bind(&checkin.cached_address_locality)
        .bind(&checkin.cached_address_region)
        .bind(&checkin.cached_address_country)
        .bind(&checkin.cached_address_postal_code)
        .bind(checkin.indexed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Whether a check-in with this author and rkey is already stored
    pub async fn checkin_exists(&self, author_did: &str, rkey: &str) -> Result<bool, AppError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM checkins WHERE author_did = ? AND id = ?",
        )
        .bind(author_did)
        .bind(rkey)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Get the global feed page
    ///
    /// Rows ordered by `created_at` descending, optionally starting
    /// strictly before `before` (exclusive pagination cursor).
    pub async fn get_global_feed(
        &self,
        limit: i64,
        before: Option<&str>,
    ) -> Result<Vec<Checkin>, AppError> {
        let checkins = match before {
            Some(cursor) => {
                sqlx::query_as::<_, Checkin>(
                    r#"
                    SELECT * FROM checkins
                    WHERE created_at < ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Checkin>(
                    "SELECT * FROM checkins ORDER BY created_at DESC LIMIT ?",
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(checkins)
    }

    /// Get recent check-ins that carry coordinates
    ///
    /// Oversampled superset for the nearby feed's post-filtering.
    pub async fn get_recent_located_checkins(&self, limit: i64) -> Result<Vec<Checkin>, AppError> {
        let checkins = sqlx::query_as::<_, Checkin>(
            r#"
            SELECT * FROM checkins
            WHERE latitude IS NOT NULL AND longitude IS NOT NULL
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(checkins)
    }

    /// Get one author's check-ins, newest first
    pub async fn get_user_checkins(
        &self,
        author_did: &str,
        limit: i64,
    ) -> Result<Vec<Checkin>, AppError> {
        let checkins = sqlx::query_as::<_, Checkin>(
            "SELECT * FROM checkins WHERE author_did = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(author_did)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(checkins)
    }

    /// Get the following feed page for one follower
    ///
    /// Same cursor/order semantics as the global feed, restricted to
    /// authors the follower has edges to.
    pub async fn get_following_feed(
        &self,
        follower_did: &str,
        limit: i64,
        before: Option<&str>,
    ) -> Result<Vec<Checkin>, AppError> {
        let checkins = match before {
            Some(cursor) => {
                sqlx::query_as::<_, Checkin>(
                    r#"
                    SELECT * FROM checkins
                    WHERE author_did IN (
                        SELECT following_did FROM follows WHERE follower_did = ?
                    )
                    AND created_at < ?
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(follower_did)
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Checkin>(
                    r#"
                    SELECT * FROM checkins
                    WHERE author_did IN (
                        SELECT following_did FROM follows WHERE follower_did = ?
                    )
                    ORDER BY created_at DESC
                    LIMIT ?
                    "#,
                )
                .bind(follower_did)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(checkins)
    }

    /// Copy resolved address fields onto a stored check-in
    pub async fn update_checkin_cached_address(
        &self,
        uri: &str,
        address: &AddressCacheEntry,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE checkins SET
                cached_address_name = ?,
                cached_address_street = ?,
                cached_address_locality = ?,
                cached_address_region = ?,
                cached_address_country = ?,
                cached_address_postal_code = ?
            WHERE uri = ?
            "#,
        )
        .bind(&address.name)
        .bind(&address.street)
        .bind(&address.locality)
        .bind(&address.region)
        .bind(&address.country)
        .bind(&address.postal_code)
        .bind(uri)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Count all stored check-ins
    pub async fn count_checkins(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM checkins")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Count distinct check-in authors
    pub async fn count_authors(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(DISTINCT author_did) FROM checkins")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Authors with a check-in indexed within the active window
    pub async fn get_active_authors(&self, window_days: i64) -> Result<Vec<String>, AppError> {
        let since = Utc::now() - Duration::days(window_days);
        let authors = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT author_did FROM checkins WHERE indexed_at >= ?",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(authors)
    }

    // =========================================================================
    // Follow edges
    // =========================================================================

    /// Replace all follow edges for one follower in a single transaction
    ///
    /// Delete-all-then-insert: after commit, the stored edges for this
    /// follower exactly equal the given set.
    pub async fn replace_follows(
        &self,
        follower_did: &str,
        edges: &[FollowEdge],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM follows WHERE follower_did = ?")
            .bind(follower_did)
            .execute(&mut *tx)
            .await?;

        for edge in edges {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO follows (follower_did, following_did, created_at, synced_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&edge.follower_did)
            .bind(&edge.following_did)
            .bind(edge.created_at)
            .bind(edge.synced_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Insert one follow edge (diff sync add-set)
    pub async fn insert_follow_edge(&self, edge: &FollowEdge) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO follows (follower_did, following_did, created_at, synced_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&edge.follower_did)
        .bind(&edge.following_did)
        .bind(edge.created_at)
        .bind(edge.synced_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete one follow edge (diff sync remove-set)
    pub async fn delete_follow_edge(
        &self,
        follower_did: &str,
        following_did: &str,
    ) -> Result<(), AppError> {
        sqlx::query("DELETE FROM follows WHERE follower_did = ? AND following_did = ?")
            .bind(follower_did)
            .bind(following_did)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// DIDs one follower currently follows
    pub async fn get_follow_targets(
        &self,
        follower_did: &str,
    ) -> Result<HashSet<String>, AppError> {
        let targets = sqlx::query_scalar::<_, String>(
            "SELECT following_did FROM follows WHERE follower_did = ?",
        )
        .bind(follower_did)
        .fetch_all(&self.pool)
        .await?;

        Ok(targets.into_iter().collect())
    }

    /// Count follow edges for one follower
    pub async fn count_follows(&self, follower_did: &str) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM follows WHERE follower_did = ?")
                .bind(follower_did)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Count all stored follow edges
    pub async fn count_follow_edges(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM follows")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Profile cache
    // =========================================================================

    /// Get one cached profile by DID
    pub async fn get_profile(&self, did: &str) -> Result<Option<ProfileCacheEntry>, AppError> {
        let profile =
            sqlx::query_as::<_, ProfileCacheEntry>("SELECT * FROM profile_cache WHERE did = ?")
                .bind(did)
                .fetch_optional(&self.pool)
                .await?;

        Ok(profile)
    }

    /// Insert or refresh a cached profile
    pub async fn upsert_profile(&self, profile: &ProfileCacheEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO profile_cache (did, handle, display_name, avatar_url, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&profile.did)
        .bind(&profile.handle)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(profile.fetched_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Cached profiles older than the given threshold, oldest first
    pub async fn get_stale_profiles(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProfileCacheEntry>, AppError> {
        let profiles = sqlx::query_as::<_, ProfileCacheEntry>(
            "SELECT * FROM profile_cache WHERE fetched_at < ? ORDER BY fetched_at ASC LIMIT ?",
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(profiles)
    }

    /// Count cached profiles
    pub async fn count_profiles(&self) -> Result<i64, AppError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM profile_cache")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    // =========================================================================
    // Address cache
    // =========================================================================

    /// Get one cached address record by URI
    pub async fn get_address(&self, uri: &str) -> Result<Option<AddressCacheEntry>, AppError> {
        let address =
            sqlx::query_as::<_, AddressCacheEntry>("SELECT * FROM address_cache WHERE uri = ?")
                .bind(uri)
                .fetch_optional(&self.pool)
                .await?;

        Ok(address)
    }

    /// Insert or refresh a resolved address record
    pub async fn upsert_address(&self, address: &AddressCacheEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO address_cache (
                uri, cid, name, street, locality, region, country, postal_code,
                resolved_at, failed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&address.uri)
        .bind(&address.cid)
        .bind(&address.name)
        .bind(&address.street)
        .bind(&address.locality)
        .bind(&address.region)
        .bind(&address.country)
        .bind(&address.postal_code)
        .bind(address.resolved_at)
        .bind(address.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a failed resolution attempt without discarding prior data
    pub async fn mark_address_failed(
        &self,
        uri: &str,
        failed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO address_cache (uri, failed_at) VALUES (?, ?)
            ON CONFLICT(uri) DO UPDATE SET failed_at = excluded.failed_at
            "#,
        )
        .bind(uri)
        .bind(failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Processing log
    // =========================================================================

    /// Append one ingestion run summary
    pub async fn append_processing_log(&self, entry: &ProcessingLogEntry) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO processing_log (id, run_at, source, events_processed, errors, duration_ms)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(entry.run_at)
        .bind(&entry.source)
        .bind(entry.events_processed)
        .bind(entry.errors)
        .bind(entry.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent ingestion run, if any
    pub async fn latest_processing_log(&self) -> Result<Option<ProcessingLogEntry>, AppError> {
        let entry = sqlx::query_as::<_, ProcessingLogEntry>(
            "SELECT * FROM processing_log ORDER BY run_at DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    // =========================================================================
    // Ingest cursor (settings)
    // =========================================================================

    /// Get the persisted Jetstream cursor (microsecond timestamp)
    pub async fn get_ingest_cursor(&self) -> Result<Option<u64>, AppError> {
        let value = self.get_setting(INGEST_CURSOR_KEY).await?;

        Ok(value.and_then(|v| v.parse::<u64>().ok()))
    }

    /// Persist the Jetstream cursor after a successful run
    pub async fn set_ingest_cursor(&self, cursor: u64) -> Result<(), AppError> {
        self.set_setting(INGEST_CURSOR_KEY, &cursor.to_string())
            .await
    }

    /// Get a setting value
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, AppError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value)
    }

    /// Set a setting value
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
