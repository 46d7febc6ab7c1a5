//! The normalized record every source emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A normalized brand-mention record, one per line in the sink.
///
/// `event_id` is deterministic from native source fields, so re-ingesting
/// the same upstream item yields the same id; downstream storage dedupes
/// on it. `content_hash` detects silent edits of the same native item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: String,
    pub ts_event: DateTime<Utc>,
    pub brand_id: String,
    pub source: String,
    pub geo_country: Option<String>,
    pub text: String,
    pub content_hash: String,
    pub metadata: serde_json::Value,
    #[serde(rename = "_ingested_at")]
    pub ingested_at: DateTime<Utc>,
    #[serde(rename = "_source_run")]
    pub source_run: String,
}

impl RawEvent {
    /// Date partition key for the sink (`YYYY-MM-DD` of the event time).
    #[must_use]
    pub fn partition_date(&self) -> String {
        self.ts_event.format("%Y-%m-%d").to_string()
    }
}

/// Short content hash: first 16 hex chars of SHA-256 of the text.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..16].to_string()
}
