//! Address record resolution
//!
//! Check-ins reference venue addresses by StrongRef. Resolution
//! dereferences the at:// URI through the upstream getRecord endpoint
//! and caches the denormalized fields locally for 30 days. Failures
//! are recorded and never fail the enclosing check-in insert.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;

use crate::data::{AddressCacheEntry, Database};
use crate::error::AppError;

/// Resolver for address StrongRefs
pub struct AddressResolver {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    public_api_base: String,
}

#[derive(Debug, Deserialize)]
struct GetRecordResponse {
    cid: Option<String>,
    value: serde_json::Value,
}

/// Components of an at:// record URI
fn split_at_uri(uri: &str) -> Option<(&str, &str, &str)> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next()?;
    let collection = parts.next()?;
    let rkey = parts.next()?;
    if repo.is_empty() || collection.is_empty() || rkey.is_empty() {
        return None;
    }
    Some((repo, collection, rkey))
}

fn field(value: &serde_json::Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

impl AddressResolver {
    pub fn new(
        db: Arc<Database>,
        http_client: Arc<reqwest::Client>,
        public_api_base: String,
    ) -> Self {
        Self {
            db,
            http_client,
            public_api_base,
        }
    }

    /// Resolve one address reference and enrich the referencing check-in
    ///
    /// Best-effort: a failure is logged and recorded in the cache's
    /// `failed_at`, and the error is returned only so callers can count
    /// it. Serves from cache while the entry is within its 30-day TTL.
    pub async fn resolve_for_checkin(
        &self,
        checkin_uri: &str,
        address_uri: &str,
        address_cid: Option<&str>,
    ) -> Result<(), AppError> {
        let cached = self.db.get_address(address_uri).await?;
        if let Some(entry) = cached.filter(|e| e.is_fresh(Utc::now())) {
            self.db
                .update_checkin_cached_address(checkin_uri, &entry)
                .await?;
            return Ok(());
        }

        match self.fetch_address(address_uri, address_cid).await {
            Ok(entry) => {
                self.db.upsert_address(&entry).await?;
                self.db
                    .update_checkin_cached_address(checkin_uri, &entry)
                    .await?;
                tracing::debug!(address_uri = %address_uri, "Address record resolved");
                Ok(())
            }
            Err(error) => {
                tracing::warn!(%error, address_uri = %address_uri, "Address resolution failed");
                self.db.mark_address_failed(address_uri, Utc::now()).await?;
                Err(error)
            }
        }
    }

    /// Fetch and parse an address record from upstream
    async fn fetch_address(
        &self,
        address_uri: &str,
        address_cid: Option<&str>,
    ) -> Result<AddressCacheEntry, AppError> {
        let (repo, collection, rkey) = split_at_uri(address_uri).ok_or_else(|| {
            AppError::Upstream(format!("malformed address record URI: {}", address_uri))
        })?;

        let url = format!(
            "{}/xrpc/com.atproto.repo.getRecord",
            self.public_api_base.trim_end_matches('/')
        );
        let response = self
            .http_client
            .get(&url)
            .query(&[("repo", repo), ("collection", collection), ("rkey", rkey)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "getRecord for {} returned HTTP {}",
                address_uri,
                response.status()
            )));
        }

        let record: GetRecordResponse = response.json().await?;
        let value = &record.value;

        Ok(AddressCacheEntry {
            uri: address_uri.to_string(),
            cid: record.cid.or_else(|| address_cid.map(str::to_string)),
            name: field(value, "name"),
            street: field(value, "street"),
            locality: field(value, "locality"),
            region: field(value, "region"),
            country: field(value, "country"),
            postal_code: field(value, "postalCode"),
            resolved_at: Some(Utc::now()),
            failed_at: None,
        })
    }
}
