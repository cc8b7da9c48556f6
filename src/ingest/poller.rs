//! Ingestion poller
//!
//! Keeps the local check-in store eventually consistent with newly
//! created protocol records. One cycle runs a bounded streaming phase
//! against Jetstream and, when that yields nothing, a point-in-time
//! fallback poll of a fixed set of known repositories.
//!
//! Error policy: a cycle always returns a summary. Transport failures
//! (connect, read, upstream HTTP) are counted and logged, never
//! propagated, so every run produces a processing-log entry. Only
//! local database failures surface as errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Deserialize;

use super::address::AddressResolver;
use super::jetstream::{JetstreamEvent, JetstreamSubscription};
use super::record::checkin_from_record;
use crate::config::AppConfig;
use crate::data::{Database, EntityId, ProcessingLogEntry};
use crate::error::AppError;
use crate::metrics::{
    CHECKINS_TOTAL, INGEST_EVENTS_TOTAL, INGEST_RUN_DURATION_SECONDS, INGEST_RUNS_TOTAL,
};

/// Run-scoped accumulator for one ingestion cycle
///
/// Returned from the streaming phase and passed to the logging step,
/// so no state outlives the connection.
#[derive(Debug, Default, Clone)]
pub struct IngestSummary {
    /// New rows stored from the streaming phase
    pub stream_events: u64,
    /// New rows stored from the fallback poll
    pub fallback_events: u64,
    /// Per-event and transport errors, counted rather than propagated
    pub errors: u64,
    /// time_us of the last event observed on the stream
    pub last_time_us: Option<u64>,
    /// Total cycle duration in milliseconds
    pub duration_ms: i64,
}

impl IngestSummary {
    /// Which phase produced this cycle's events
    pub fn source(&self) -> &'static str {
        match (self.stream_events, self.fallback_events) {
            (0, f) if f > 0 => "fallback",
            (s, f) if s > 0 && f > 0 => "mixed",
            _ => "jetstream",
        }
    }

    /// Total new rows across both phases
    pub fn events_processed(&self) -> u64 {
        self.stream_events + self.fallback_events
    }
}

/// Ingestion poller
pub struct IngestionPoller {
    db: Arc<Database>,
    http_client: Arc<reqwest::Client>,
    config: Arc<AppConfig>,
    address_resolver: AddressResolver,
}

#[derive(Debug, Deserialize)]
struct ListRecordsResponse {
    records: Vec<ListedRecord>,
}

#[derive(Debug, Deserialize)]
struct ListedRecord {
    uri: String,
    value: serde_json::Value,
}

impl IngestionPoller {
    /// Create new poller
    pub fn new(
        db: Arc<Database>,
        http_client: Arc<reqwest::Client>,
        config: Arc<AppConfig>,
    ) -> Self {
        let address_resolver = AddressResolver::new(
            db.clone(),
            http_client.clone(),
            config.atproto.public_api_base.clone(),
        );

        Self {
            db,
            http_client,
            config,
            address_resolver,
        }
    }

    /// Run one ingestion cycle
    ///
    /// # Steps
    /// 1. Load the persisted resumption cursor (default: now minus the
    ///    configured backfill window)
    /// 2. Stream from Jetstream until the hard deadline, the inactivity
    ///    window, or a connection close terminates the loop
    /// 3. Fall back to listRecords polling when the stream stored nothing
    /// 4. Persist the advanced cursor and append one processing-log row
    pub async fn run_cycle(&self) -> Result<IngestSummary, AppError> {
        let started = Instant::now();
        let mut summary = IngestSummary::default();

        let cursor = match self.db.get_ingest_cursor().await? {
            Some(persisted) => persisted,
            None => {
                let backfill = self.config.ingest.cursor_backfill_seconds as i64;
                (Utc::now() - chrono::Duration::seconds(backfill)).timestamp_micros() as u64
            }
        };

        self.stream_phase(cursor, &mut summary).await?;

        if summary.stream_events == 0 {
            self.fallback_phase(&mut summary).await?;
        }

        summary.duration_ms = started.elapsed().as_millis() as i64;

        if let Some(time_us) = summary.last_time_us {
            self.db.set_ingest_cursor(time_us).await?;
        }

        let entry = ProcessingLogEntry {
            id: EntityId::new().0,
            run_at: Utc::now(),
            source: summary.source().to_string(),
            events_processed: summary.events_processed() as i64,
            errors: summary.errors as i64,
            duration_ms: summary.duration_ms,
        };
        self.db.append_processing_log(&entry).await?;

        CHECKINS_TOTAL.set(self.db.count_checkins().await?);

        let status = if summary.errors > 0 { "partial" } else { "ok" };
        INGEST_RUNS_TOTAL.with_label_values(&[status]).inc();
        INGEST_RUN_DURATION_SECONDS
            .with_label_values(&[summary.source()])
            .observe(summary.duration_ms as f64 / 1000.0);

        tracing::info!(
            stream_events = summary.stream_events,
            fallback_events = summary.fallback_events,
            errors = summary.errors,
            duration_ms = summary.duration_ms,
            source = summary.source(),
            "Ingestion cycle completed"
        );

        Ok(summary)
    }

    /// Streaming phase: consume Jetstream until a timer or close ends it
    ///
    /// Two independent timers bound the loop: a hard deadline on total
    /// connection time and an inactivity window reset by each event.
    /// Either firing means "caught up", not failure.
    async fn stream_phase(
        &self,
        cursor: u64,
        summary: &mut IngestSummary,
    ) -> Result<(), AppError> {
        let mut subscription = match JetstreamSubscription::connect(
            &self.config.atproto.jetstream_base,
            &self.config.ingest.collection,
            Some(cursor),
        )
        .await
        {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::warn!(%error, "Jetstream connection failed; relying on fallback poll");
                summary.errors += 1;
                return Ok(());
            }
        };

        let hard_deadline =
            Instant::now() + Duration::from_secs(self.config.ingest.hard_timeout_seconds);
        let inactivity = Duration::from_secs(self.config.ingest.inactivity_timeout_seconds);

        loop {
            let now = Instant::now();
            if now >= hard_deadline {
                tracing::debug!("Jetstream hard deadline reached");
                break;
            }
            let wait = inactivity.min(hard_deadline - now);

            match tokio::time::timeout(wait, subscription.next_event()).await {
                // Inactivity window elapsed with no event: caught up
                Err(_elapsed) => {
                    tracing::debug!("Jetstream inactivity window elapsed; treating as caught up");
                    break;
                }
                Ok(Ok(Some(event))) => {
                    summary.last_time_us = Some(event.time_us);
                    self.process_stream_event(&event, summary).await?;
                }
                Ok(Ok(None)) => {
                    tracing::debug!("Jetstream connection closed by server");
                    break;
                }
                Ok(Err(error)) => {
                    tracing::warn!(%error, "Jetstream read failed");
                    summary.errors += 1;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle one inbound stream event
    async fn process_stream_event(
        &self,
        event: &JetstreamEvent,
        summary: &mut IngestSummary,
    ) -> Result<(), AppError> {
        if !event.is_create_for(&self.config.ingest.collection) {
            return Ok(());
        }

        let Some(commit) = &event.commit else {
            return Ok(());
        };
        let Some(record) = &commit.record else {
            tracing::warn!(did = %event.did, rkey = %commit.rkey, "Create event without record body");
            summary.errors += 1;
            INGEST_EVENTS_TOTAL
                .with_label_values(&["jetstream", "error"])
                .inc();
            return Ok(());
        };

        let checkin =
            checkin_from_record(&event.did, &commit.collection, &commit.rkey, record);

        if self.db.insert_checkin_if_new(&checkin).await? {
            summary.stream_events += 1;
            INGEST_EVENTS_TOTAL
                .with_label_values(&["jetstream", "inserted"])
                .inc();
            self.resolve_address_best_effort(&checkin, summary).await;
        } else {
            INGEST_EVENTS_TOTAL
                .with_label_values(&["jetstream", "duplicate"])
                .inc();
        }

        Ok(())
    }

    /// Fallback phase: point-in-time listRecords poll of known repos
    async fn fallback_phase(&self, summary: &mut IngestSummary) -> Result<(), AppError> {
        for repo in &self.config.ingest.fallback_repos {
            match self.poll_repo(repo, summary).await {
                Ok(inserted) => {
                    tracing::debug!(repo = %repo, inserted, "Fallback poll completed");
                }
                Err(AppError::Database(error)) => return Err(AppError::Database(error)),
                Err(error) => {
                    tracing::warn!(%error, repo = %repo, "Fallback poll failed");
                    summary.errors += 1;
                }
            }
        }

        Ok(())
    }

    /// List and ingest one repo's records via the same dedup/insert path
    async fn poll_repo(&self, repo: &str, summary: &mut IngestSummary) -> Result<u64, AppError> {
        let url = format!(
            "{}/xrpc/com.atproto.repo.listRecords",
            self.config.atproto.public_api_base.trim_end_matches('/')
        );
        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("repo", repo),
                ("collection", self.config.ingest.collection.as_str()),
                ("limit", "100"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Upstream(format!(
                "listRecords for {} returned HTTP {}",
                repo,
                response.status()
            )));
        }

        let listing: ListRecordsResponse = response.json().await?;
        let mut inserted = 0u64;

        for record in listing.records {
            let Some(rkey) = record.uri.rsplit('/').next() else {
                summary.errors += 1;
                continue;
            };

            let checkin = checkin_from_record(
                repo,
                &self.config.ingest.collection,
                rkey,
                &record.value,
            );

            if self.db.insert_checkin_if_new(&checkin).await? {
                inserted += 1;
                summary.fallback_events += 1;
                INGEST_EVENTS_TOTAL
                    .with_label_values(&["fallback", "inserted"])
                    .inc();
                self.resolve_address_best_effort(&checkin, summary).await;
            } else {
                INGEST_EVENTS_TOTAL
                    .with_label_values(&["fallback", "duplicate"])
                    .inc();
            }
        }

        Ok(inserted)
    }

    /// Resolve a freshly inserted check-in's address reference
    ///
    /// Failures are counted in the summary, never propagated.
    async fn resolve_address_best_effort(
        &self,
        checkin: &crate::data::Checkin,
        summary: &mut IngestSummary,
    ) {
        let Some(address_uri) = &checkin.address_ref_uri else {
            return;
        };

        if self
            .address_resolver
            .resolve_for_checkin(&checkin.uri, address_uri, checkin.address_ref_cid.as_deref())
            .await
            .is_err()
        {
            summary.errors += 1;
        }
    }
}
