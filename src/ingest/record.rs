//! Check-in record parsing
//!
//! Extracts normalized fields from raw `app.dropanchor.checkin` record
//! bodies. Coordinates arrive as JSON strings or numbers depending on
//! the writing client; both are accepted. Invalid or out-of-range
//! coordinates become null rather than rejecting the whole record.

use chrono::Utc;
use serde_json::Value;

use crate::data::Checkin;

/// StrongRef to another record (URI plus content hash)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrongRef {
    pub uri: String,
    pub cid: Option<String>,
}

/// Build the canonical at:// URI for a record
pub fn record_uri(did: &str, collection: &str, rkey: &str) -> String {
    format!("at://{}/{}/{}", did, collection, rkey)
}

/// Parse one coordinate from a string-or-number JSON value
///
/// Non-numeric input yields None.
fn parse_coordinate(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Extract a validated (latitude, longitude) pair from a record body
///
/// Out-of-range values (|lat| > 90, |lng| > 180) are dropped as a pair;
/// the check-in itself is still stored.
fn parse_coordinates(record: &Value) -> (Option<f64>, Option<f64>) {
    let Some(coords) = record.get("coordinates") else {
        return (None, None);
    };

    let latitude = coords.get("latitude").and_then(parse_coordinate);
    let longitude = coords.get("longitude").and_then(parse_coordinate);

    match (latitude, longitude) {
        (Some(lat), Some(lng))
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) =>
        {
            (Some(lat), Some(lng))
        }
        _ => (None, None),
    }
}

/// Extract the optional address StrongRef from a record body
fn parse_address_ref(record: &Value) -> Option<StrongRef> {
    let address_ref = record.get("addressRef")?;
    let uri = address_ref.get("uri")?.as_str()?.to_string();
    let cid = address_ref
        .get("cid")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string());

    Some(StrongRef { uri, cid })
}

/// Build a storable check-in from a raw record body
///
/// # Arguments
/// * `did` - Author DID
/// * `collection` - Record collection NSID
/// * `rkey` - Record key
/// * `record` - Raw record body JSON
pub fn checkin_from_record(did: &str, collection: &str, rkey: &str, record: &Value) -> Checkin {
    let (latitude, longitude) = parse_coordinates(record);
    let address_ref = parse_address_ref(record);

    Checkin {
        id: rkey.to_string(),
        uri: record_uri(did, collection, rkey),
        author_did: did.to_string(),
        text: record
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        created_at: record
            .get("createdAt")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        latitude,
        longitude,
        address_ref_uri: address_ref.as_ref().map(|r| r.uri.clone()),
        address_ref_cid: address_ref.and_then(|r| r.cid),
        cached_address_name: None,
        cached_address_street: None,
        cached_address_locality: None,
        cached_address_region: None,
        cached_address_country: None,
        cached_address_postal_code: None,
        indexed_at: Utc::now(),
    }
}
