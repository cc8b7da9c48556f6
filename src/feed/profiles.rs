//! Author profile resolution
//!
//! Feed responses carry handle, display name and avatar for each
//! author. Profiles are cached in the database and refreshed lazily
//! on a cache miss, plus a periodic sweep for entries past their TTL.
//! A failed fetch never fails a feed: the author falls back to a
//! bare DID with no display name.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use crate::config::AppConfig;
use crate::data::{Database, ProfileCacheEntry};
use crate::error::AppError;
use crate::metrics::{PROFILE_CACHE_LOOKUPS_TOTAL, PROFILE_FETCHES_TOTAL};

/// Resolves author DIDs to cached profile entries
pub struct ProfileResolver {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    config: Arc<AppConfig>,
}

#[derive(Debug, Deserialize)]
struct ProfileResponse {
    handle: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
    avatar: Option<String>,
}

impl ProfileResolver {
    pub fn new(
        db: Arc<Database>,
        http_client: Arc<reqwest::Client>,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            http_client,
            config,
        }
    }

    /// Resolve a batch of DIDs to profiles
    ///
    /// Serves fresh cache entries directly and fetches the rest
    /// concurrently, bounded by the configured fetch concurrency.
    /// Every requested DID gets an entry in the returned map; DIDs
    /// whose fetch failed map to a placeholder whose handle is the
    /// DID itself. Placeholders are not cached, so the next request
    /// retries the fetch.
    pub async fn resolve_many(
        &self,
        dids: impl IntoIterator<Item = String>,
    ) -> Result<HashMap<String, ProfileCacheEntry>, AppError> {
        let unique: HashSet<String> = dids.into_iter().collect();
        let now = Utc::now();
        let ttl = self.config.profiles.ttl_seconds;

        let mut resolved = HashMap::with_capacity(unique.len());
        let mut missing = Vec::new();

        for did in unique {
            match self.db.get_profile(&did).await? {
                Some(profile) if profile.is_fresh(now, ttl) => {
                    PROFILE_CACHE_LOOKUPS_TOTAL.with_label_values(&["hit"]).inc();
                    resolved.insert(did, profile);
                }
                _ => {
                    PROFILE_CACHE_LOOKUPS_TOTAL
                        .with_label_values(&["miss"])
                        .inc();
                    missing.push(did);
                }
            }
        }

        let fetched: Vec<(String, Option<ProfileCacheEntry>)> = stream::iter(missing)
            .map(|did| async move {
                let profile = self.fetch_profile(&did).await;
                (did, profile)
            })
            .buffer_unordered(self.config.profiles.fetch_concurrency)
            .collect()
            .await;

        for (did, profile) in fetched {
            match profile {
                Some(profile) => {
                    self.db.upsert_profile(&profile).await?;
                    resolved.insert(did, profile);
                }
                None => {
                    resolved.insert(did.clone(), placeholder_profile(did));
                }
            }
        }

        Ok(resolved)
    }

    /// Refresh a batch of cache entries past their TTL
    ///
    /// Runs periodically from a background task so that feed requests
    /// rarely pay for a fetch. Returns the number of entries refreshed.
    pub async fn sweep_stale(&self) -> Result<usize, AppError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.profiles.ttl_seconds);
        let stale = self
            .db
            .get_stale_profiles(cutoff, i64::from(self.config.profiles.sweep_batch_size))
            .await?;

        let mut refreshed = 0;
        for entry in stale {
            // Keep the stale entry when the fetch fails; it is still
            // better than a bare DID
            if let Some(profile) = self.fetch_profile(&entry.did).await {
                self.db.upsert_profile(&profile).await?;
                refreshed += 1;
            }
        }

        if refreshed > 0 {
            tracing::info!(refreshed, "Profile cache sweep complete");
        }
        Ok(refreshed)
    }

    async fn fetch_profile(&self, did: &str) -> Option<ProfileCacheEntry> {
        let url = format!(
            "{}/xrpc/app.bsky.actor.getProfile",
            self.config.atproto.public_api_base
        );

        let response = self
            .http_client
            .get(&url)
            .query(&[("actor", did)])
            .send()
            .await;

        let body = match response {
            Ok(resp) if resp.status().is_success() => resp.json::<ProfileResponse>().await,
            Ok(resp) => {
                tracing::warn!(did, status = %resp.status(), "Profile fetch rejected");
                PROFILE_FETCHES_TOTAL.with_label_values(&["error"]).inc();
                return None;
            }
            Err(e) => {
                tracing::warn!(did, error = %e, "Profile fetch failed");
                PROFILE_FETCHES_TOTAL.with_label_values(&["error"]).inc();
                return None;
            }
        };

        match body {
            Ok(profile) => {
                PROFILE_FETCHES_TOTAL.with_label_values(&["ok"]).inc();
                Some(ProfileCacheEntry {
                    did: did.to_string(),
                    handle: profile.handle,
                    display_name: profile.display_name,
                    avatar_url: profile.avatar,
                    fetched_at: Utc::now(),
                })
            }
            Err(e) => {
                tracing::warn!(did, error = %e, "Profile response undecodable");
                PROFILE_FETCHES_TOTAL.with_label_values(&["error"]).inc();
                None
            }
        }
    }
}

/// Fallback entry for a DID whose profile could not be fetched
fn placeholder_profile(did: String) -> ProfileCacheEntry {
    ProfileCacheEntry {
        handle: did.clone(),
        did,
        display_name: None,
        avatar_url: None,
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_uses_did_as_handle() {
        let p = placeholder_profile("did:plc:ghost".to_string());
        assert_eq!(p.handle, "did:plc:ghost");
        assert!(p.display_name.is_none());
        assert!(p.avatar_url.is_none());
    }
}
