//! Social graph synchronization
//!
//! Mirrors each active author's follow set into the local `follows`
//! table so the following feed can be answered without touching the
//! network. Two sync strategies share one trait: `ReplaceSync` pages
//! the public `getFollows` view and rewrites the user's edges in one
//! transaction, `DiffSync` lists follow records from the user's repo
//! and applies only the delta. Either way, a successful sync leaves
//! the stored edges equal to the observed set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::{AppConfig, FollowSyncMode};
use crate::data::{Database, FollowEdge};
use crate::error::{AppError, Result};
use crate::metrics::{FOLLOW_EDGES_TOTAL, FOLLOW_SYNC_USERS_TOTAL};

const FOLLOWS_PAGE_SIZE: u32 = 100;
const FOLLOW_COLLECTION: &str = "app.bsky.graph.follow";

/// One user's observed follow set, as fetched from upstream
#[derive(Debug, Clone)]
pub struct ObservedFollow {
    pub following_did: String,
    pub created_at: DateTime<Utc>,
}

/// How a user's stored edges get reconciled with upstream
pub trait FollowSyncStrategy {
    /// Strategy label for logs and metrics
    fn name(&self) -> &'static str;

    /// Fetch the user's current follow set and store it
    ///
    /// Returns the number of edges the user now has. Failures leave
    /// the user's stored edges untouched.
    async fn sync_user(&self, did: &str) -> Result<usize>;
}

// ============================================================
// Replace strategy
// ============================================================

/// Fetches the full follow set via `app.bsky.graph.getFollows` and
/// replaces the user's stored edges wholesale
pub struct ReplaceSync {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    config: Arc<AppConfig>,
}

#[derive(Debug, Deserialize)]
struct GetFollowsResponse {
    follows: Vec<FollowSubject>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowSubject {
    did: String,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
}

impl ReplaceSync {
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

    async fn fetch_all_follows(&self, did: &str) -> Result<Vec<ObservedFollow>> {
        let url = format!(
            "{}/xrpc/app.bsky.graph.getFollows",
            self.config.atproto.public_api_base
        );

        let mut follows = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self.http_client.get(&url).query(&[
                ("actor", did),
                ("limit", &FOLLOWS_PAGE_SIZE.to_string()),
            ]);
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(AppError::Upstream(format!(
                    "getFollows for {did} returned {}",
                    response.status()
                )));
            }

            let page: GetFollowsResponse = response.json().await?;
            follows.extend(page.follows.into_iter().map(|f| ObservedFollow {
                following_did: f.did,
                created_at: f.created_at.unwrap_or_else(Utc::now),
            }));

            match page.cursor {
                Some(c) if !c.is_empty() => {
                    cursor = Some(c);
                    tokio::time::sleep(Duration::from_millis(self.config.graph.page_delay_ms))
                        .await;
                }
                _ => break,
            }
        }

        Ok(follows)
    }
}

impl FollowSyncStrategy for ReplaceSync {
    fn name(&self) -> &'static str {
        "replace"
    }

    async fn sync_user(&self, did: &str) -> Result<usize> {
        let observed = self.fetch_all_follows(did).await?;
        let now = Utc::now();

        let edges: Vec<FollowEdge> = observed
            .into_iter()
            .map(|f| FollowEdge {
                follower_did: did.to_string(),
                following_did: f.following_did,
                created_at: f.created_at,
                synced_at: now,
            })
            .collect();

        let count = edges.len();
        self.db.replace_follows(did, &edges).await?;
        Ok(count)
    }
}

// ============================================================
// Diff strategy
// ============================================================

/// Lists `app.bsky.graph.follow` records from the user's repo and
/// applies only the add/remove delta against stored edges
pub struct DiffSync {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    config: Arc<AppConfig>,
}

#[derive(Debug, Deserialize)]
struct ListFollowRecordsResponse {
    records: Vec<FollowRecord>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FollowRecord {
    value: FollowRecordValue,
}

#[derive(Debug, Deserialize)]
struct FollowRecordValue {
    subject: String,
    #[serde(rename = "createdAt")]
    created_at: Option<DateTime<Utc>>,
}

impl DiffSync {
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

    async fn fetch_follow_records(&self, did: &str) -> Result<Vec<ObservedFollow>> {
        let url = format!(
            "{}/xrpc/com.atproto.repo.listRecords",
            self.config.atproto.public_api_base
        );

        let mut follows = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut request = self.http_client.get(&url).query(&[
                ("repo", did),
                ("collection", FOLLOW_COLLECTION),
                ("limit", &FOLLOWS_PAGE_SIZE.to_string()),
            ]);
            if let Some(c) = &cursor {
                request = request.query(&[("cursor", c.as_str())]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(AppError::Upstream(format!(
                    "listRecords({FOLLOW_COLLECTION}) for {did} returned {}",
                    response.status()
                )));
            }

            let page: ListFollowRecordsResponse = response.json().await?;
            follows.extend(page.records.into_iter().map(|r| ObservedFollow {
                following_did: r.value.subject,
                created_at: r.value.created_at.unwrap_or_else(Utc::now),
            }));

            match page.cursor {
                Some(c) if !c.is_empty() => {
                    cursor = Some(c);
                    tokio::time::sleep(Duration::from_millis(self.config.graph.page_delay_ms))
                        .await;
                }
                _ => break,
            }
        }

        Ok(follows)
    }
}

impl FollowSyncStrategy for DiffSync {
    fn name(&self) -> &'static str {
        "diff"
    }

    async fn sync_user(&self, did: &str) -> Result<usize> {
        let observed = self.fetch_follow_records(did).await?;
        let stored = self.db.get_follow_targets(did).await?;

        let (to_add, to_remove) = compute_delta(&observed, &stored);
        let now = Utc::now();

        for follow in to_add {
            self.db
                .insert_follow_edge(&FollowEdge {
                    follower_did: did.to_string(),
                    following_did: follow.following_did.clone(),
                    created_at: follow.created_at,
                    synced_at: now,
                })
                .await?;
        }
        for gone in to_remove {
            self.db.delete_follow_edge(did, &gone).await?;
        }

        Ok(observed.len())
    }
}

/// Add/remove sets between the upstream follow set and stored edges
fn compute_delta<'a>(
    observed: &'a [ObservedFollow],
    stored: &HashSet<String>,
) -> (Vec<&'a ObservedFollow>, Vec<String>) {
    let observed_dids: HashSet<&str> =
        observed.iter().map(|f| f.following_did.as_str()).collect();

    let to_add = observed
        .iter()
        .filter(|f| !stored.contains(&f.following_did))
        .collect();
    let to_remove = stored
        .iter()
        .filter(|did| !observed_dids.contains(did.as_str()))
        .cloned()
        .collect();

    (to_add, to_remove)
}

// ============================================================
// Batch job
// ============================================================

/// Periodic batch that syncs the follow graph for every author with
/// recent check-in activity
pub enum FollowSyncJob {
    Replace(ReplaceSync),
    Diff(DiffSync),
}

impl FollowSyncJob {
    pub fn new(
        db: Arc<Database>,
        http_client: Arc<reqwest::Client>,
        config: Arc<AppConfig>,
    ) -> Self {
        match config.graph.strategy {
            FollowSyncMode::Replace => {
                Self::Replace(ReplaceSync::new(db, http_client, config))
            }
            FollowSyncMode::Diff => Self::Diff(DiffSync::new(db, http_client, config)),
        }
    }

    fn strategy_name(&self) -> &'static str {
        match self {
            Self::Replace(s) => s.name(),
            Self::Diff(s) => s.name(),
        }
    }

    async fn sync_user(&self, did: &str) -> Result<usize> {
        match self {
            Self::Replace(s) => s.sync_user(did).await,
            Self::Diff(s) => s.sync_user(did).await,
        }
    }

    /// Sync every active author once
    ///
    /// A user failing (deleted account, upstream 404, timeout) leaves
    /// their stored edges untouched and never aborts the batch.
    /// Returns (synced, failed) counts.
    pub async fn run_batch(&self, db: &Database, config: &AppConfig) -> Result<(usize, usize)> {
        let users = db.get_active_authors(config.graph.active_window_days).await?;
        let strategy = self.strategy_name();
        tracing::info!(users = users.len(), strategy, "Starting follow sync batch");

        let mut synced = 0;
        let mut failed = 0;

        for (i, did) in users.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(Duration::from_millis(config.graph.user_delay_ms)).await;
            }

            match self.sync_user(did).await {
                Ok(edges) => {
                    FOLLOW_SYNC_USERS_TOTAL
                        .with_label_values(&[strategy, "ok"])
                        .inc();
                    tracing::debug!(did, edges, "Follow sync complete");
                    synced += 1;
                }
                Err(AppError::Database(e)) => return Err(AppError::Database(e)),
                Err(e) => {
                    FOLLOW_SYNC_USERS_TOTAL
                        .with_label_values(&[strategy, "error"])
                        .inc();
                    tracing::warn!(did, error = %e, "Follow sync failed for user");
                    failed += 1;
                }
            }
        }

        FOLLOW_EDGES_TOTAL.set(db.count_follow_edges().await?);

        tracing::info!(synced, failed, strategy, "Follow sync batch complete");
        Ok((synced, failed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed(dids: &[&str]) -> Vec<ObservedFollow> {
        dids.iter()
            .map(|d| ObservedFollow {
                following_did: d.to_string(),
                created_at: Utc::now(),
            })
            .collect()
    }

    #[test]
    fn delta_detects_additions_and_removals() {
        let upstream = observed(&["did:plc:a", "did:plc:b", "did:plc:c"]);
        let stored: HashSet<String> =
            ["did:plc:b", "did:plc:d"].iter().map(|s| s.to_string()).collect();

        let (to_add, to_remove) = compute_delta(&upstream, &stored);

        let added: Vec<&str> = to_add.iter().map(|f| f.following_did.as_str()).collect();
        assert!(added.contains(&"did:plc:a"));
        assert!(added.contains(&"did:plc:c"));
        assert_eq!(added.len(), 2);
        assert_eq!(to_remove, vec!["did:plc:d".to_string()]);
    }

    #[test]
    fn delta_is_empty_when_sets_match() {
        let upstream = observed(&["did:plc:a"]);
        let stored: HashSet<String> = ["did:plc:a"].iter().map(|s| s.to_string()).collect();

        let (to_add, to_remove) = compute_delta(&upstream, &stored);
        assert!(to_add.is_empty());
        assert!(to_remove.is_empty());
    }

    fn active_checkin(rkey: &str, author_did: &str) -> crate::data::Checkin {
        crate::data::Checkin {
            id: rkey.to_string(),
            uri: format!("at://{author_did}/app.dropanchor.checkin/{rkey}"),
            author_did: author_did.to_string(),
            text: "anchor dropped".to_string(),
            created_at: "2025-01-18T10:00:00Z".to_string(),
            latitude: None,
            longitude: None,
            address_ref_uri: None,
            address_ref_cid: None,
            cached_address_name: None,
            cached_address_street: None,
            cached_address_locality: None,
            cached_address_region: None,
            cached_address_country: None,
            cached_address_postal_code: None,
            indexed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn batch_continues_past_upstream_404() {
        use axum::extract::Query;
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::{Json, Router, routing::get};
        use serde_json::json;
        use std::collections::HashMap;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Graph stand-in: one actor exists, the other is gone
        let app = Router::new().route(
            "/xrpc/app.bsky.graph.getFollows",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                if params.get("actor").map(String::as_str) == Some("did:plc:alice") {
                    Json(json!({
                        "follows": [
                            {"did": "did:plc:carol", "createdAt": "2025-01-10T00:00:00Z"}
                        ]
                    }))
                    .into_response()
                } else {
                    StatusCode::NOT_FOUND.into_response()
                }
            }),
        );
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );

        // Both authors have recent check-ins, so both are in the batch
        assert!(db.insert_checkin_if_new(&active_checkin("3ka", "did:plc:alice")).await.unwrap());
        assert!(db.insert_checkin_if_new(&active_checkin("3kb", "did:plc:gone")).await.unwrap());

        let now = Utc::now();
        db.insert_follow_edge(&FollowEdge {
            follower_did: "did:plc:gone".to_string(),
            following_did: "did:plc:bob".to_string(),
            created_at: now,
            synced_at: now,
        })
        .await
        .unwrap();

        let config = Arc::new(crate::config::AppConfig::test_default(format!(
            "http://{}",
            addr
        )));
        let job = FollowSyncJob::new(db.clone(), Arc::new(reqwest::Client::new()), config.clone());

        let (synced, failed) = job.run_batch(&db, &config).await.unwrap();
        assert_eq!(synced, 1);
        assert_eq!(failed, 1);

        // The 404'd user keeps their stored edges; the other user's
        // edges now match the observed set
        assert_eq!(db.count_follows("did:plc:gone").await.unwrap(), 1);
        let targets = db.get_follow_targets("did:plc:alice").await.unwrap();
        assert_eq!(targets.len(), 1);
        assert!(targets.contains("did:plc:carol"));
    }

    #[tokio::test]
    async fn failed_sync_leaves_edges_untouched() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );

        let now = Utc::now();
        db.insert_follow_edge(&FollowEdge {
            follower_did: "did:plc:alice".to_string(),
            following_did: "did:plc:bob".to_string(),
            created_at: now,
            synced_at: now,
        })
        .await
        .unwrap();

        // Nothing listens on port 1, so the fetch fails before any write
        let config = Arc::new(crate::config::AppConfig::test_default(
            "http://127.0.0.1:1".to_string(),
        ));
        let sync = ReplaceSync::new(db.clone(), Arc::new(reqwest::Client::new()), config);

        assert!(sync.sync_user("did:plc:alice").await.is_err());
        assert_eq!(db.count_follows("did:plc:alice").await.unwrap(), 1);
    }
}
