//! Jetstream firehose subscription
//!
//! Thin wrapper over a WebSocket connection to a Jetstream endpoint,
//! filtered to one record collection and optionally resumed from a
//! microsecond cursor. Yields decoded commit events; undecodable
//! frames are skipped with a warning.

use futures::StreamExt;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::AppError;

/// One decoded Jetstream event
#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamEvent {
    pub did: String,
    /// Monotonically increasing microsecond timestamp of the event
    pub time_us: u64,
    pub kind: String,
    pub commit: Option<CommitData>,
}

/// Commit payload of a `kind = "commit"` event
#[derive(Debug, Clone, Deserialize)]
pub struct CommitData {
    /// "create", "update", or "delete"
    pub operation: String,
    pub collection: String,
    pub rkey: String,
    /// Record body, present for create/update
    pub record: Option<serde_json::Value>,
    pub cid: Option<String>,
}

impl JetstreamEvent {
    /// Whether this is a creation event for the given collection
    pub fn is_create_for(&self, collection: &str) -> bool {
        self.kind == "commit"
            && self
                .commit
                .as_ref()
                .is_some_and(|c| c.operation == "create" && c.collection == collection)
    }
}

/// Open WebSocket subscription
pub struct JetstreamSubscription {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl JetstreamSubscription {
    /// Connect to a Jetstream endpoint
    ///
    /// # Arguments
    /// * `base` - WebSocket base URL (ws:// or wss://)
    /// * `collection` - Collection NSID to filter on
    /// * `cursor_us` - Optional resumption cursor (microseconds)
    pub async fn connect(
        base: &str,
        collection: &str,
        cursor_us: Option<u64>,
    ) -> Result<Self, AppError> {
        let mut url = url::Url::parse(&format!("{}/subscribe", base.trim_end_matches('/')))
            .map_err(|e| AppError::Config(format!("invalid jetstream base URL: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("wantedCollections", collection);
        if let Some(cursor) = cursor_us {
            url.query_pairs_mut()
                .append_pair("cursor", &cursor.to_string());
        }

        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| AppError::Upstream(format!("jetstream connect failed: {}", e)))?;

        tracing::debug!(collection = %collection, cursor = ?cursor_us, "Jetstream subscription opened");

        Ok(Self { ws })
    }

    /// Read the next decoded event
    ///
    /// Returns `Ok(None)` when the server closes the connection.
    /// Frames that fail to decode are skipped, not surfaced as errors.
    pub async fn next_event(&mut self) -> Result<Option<JetstreamEvent>, AppError> {
        loop {
            let Some(message) = self.ws.next().await else {
                return Ok(None);
            };

            let message =
                message.map_err(|e| AppError::Upstream(format!("jetstream read failed: {}", e)))?;

            match message {
                Message::Text(text) => match serde_json::from_str::<JetstreamEvent>(&text) {
                    Ok(event) => return Ok(Some(event)),
                    Err(error) => {
                        tracing::warn!(%error, "Skipping undecodable jetstream frame");
                    }
                },
                Message::Close(_) => return Ok(None),
                // Ping/pong and binary frames carry no events
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_commit_event() {
        let raw = r#"{
            "did": "did:plc:alice",
            "time_us": 1737200000000000,
            "kind": "commit",
            "commit": {
                "rev": "22",
                "operation": "create",
                "collection": "app.dropanchor.checkin",
                "rkey": "3kabc",
                "record": {"text": "hi", "createdAt": "2025-01-18T10:00:00Z"},
                "cid": "bafyabc"
            }
        }"#;

        let event: JetstreamEvent = serde_json::from_str(raw).unwrap();
        assert!(event.is_create_for("app.dropanchor.checkin"));
        assert!(!event.is_create_for("app.bsky.feed.post"));
        assert_eq!(event.time_us, 1_737_200_000_000_000);
        assert_eq!(event.commit.unwrap().rkey, "3kabc");
    }

    #[test]
    fn identity_events_are_not_creates() {
        let raw = r#"{"did": "did:plc:alice", "time_us": 1, "kind": "identity"}"#;
        let event: JetstreamEvent = serde_json::from_str(raw).unwrap();
        assert!(!event.is_create_for("app.dropanchor.checkin"));
    }

    #[test]
    fn delete_operations_are_not_creates() {
        let raw = r#"{
            "did": "did:plc:alice",
            "time_us": 2,
            "kind": "commit",
            "commit": {
                "operation": "delete",
                "collection": "app.dropanchor.checkin",
                "rkey": "3kabc"
            }
        }"#;
        let event: JetstreamEvent = serde_json::from_str(raw).unwrap();
        assert!(!event.is_create_for("app.dropanchor.checkin"));
    }
}
