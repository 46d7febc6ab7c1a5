//! Date-partitioned NDJSON sink.
//!
//! Groups a batch of normalized events by the date portion of their event
//! time, serializes each date partition as sorted-key newline-delimited
//! JSON, gzips it, and uploads one object per partition to
//! `raw/{source}/dt={YYYY-MM-DD}/part-{run_id}.jsonl.gz`.
//!
//! Uploads are all-or-nothing per partition; a failure on one date does
//! not roll back partitions already written. The backing store comes from
//! a URL (`gs://`, `s3://`, `file://`, `memory://`), so production GCS and
//! in-memory tests share the same code path.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use thiserror::Error;

use brandpulse_core::RawEvent;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("invalid sink URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Compress(#[from] std::io::Error),

    #[error("object store error: {0}")]
    Store(#[from] object_store::Error),
}

/// Outcome of writing one batch. Partition failures are collected, not
/// propagated, so one bad date never blocks the others.
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Object paths written, one per date partition.
    pub files: Vec<String>,
    /// Records that made it into a written partition.
    pub records_written: usize,
    /// `(date, error)` pairs for partitions that failed to upload.
    pub failures: Vec<(String, String)>,
}

/// Writes normalized events to the blob store, partitioned by event date.
#[derive(Clone, Debug)]
pub struct PartitionWriter {
    store: Arc<dyn ObjectStore>,
    prefix: ObjectPath,
}

impl PartitionWriter {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, prefix: ObjectPath) -> Self {
        Self { store, prefix }
    }

    /// Build a writer from a store URL such as `gs://bucket/base`,
    /// `file:///data/raw`, or `memory:///`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::InvalidUrl`] if the URL cannot be parsed or
    /// names an unsupported scheme.
    pub fn from_url(url: &str) -> Result<Self, SinkError> {
        let parsed = url::Url::parse(url).map_err(|e| SinkError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        let (store, prefix) =
            object_store::parse_url(&parsed).map_err(|e| SinkError::InvalidUrl {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(Arc::from(store), prefix))
    }

    /// Write one batch of events for `source`.
    ///
    /// Events are grouped by `ts_event` date; each group becomes one
    /// gzip-compressed NDJSON object. Records are serialized with sorted
    /// keys so identical content always produces identical bytes.
    pub async fn write_batch(
        &self,
        source: &str,
        run_id: &str,
        events: &[RawEvent],
    ) -> WriteReport {
        let mut report = WriteReport::default();
        if events.is_empty() {
            tracing::info!(source, "no events to write");
            return report;
        }

        let mut by_date: BTreeMap<String, Vec<&RawEvent>> = BTreeMap::new();
        for event in events {
            by_date.entry(event.partition_date()).or_default().push(event);
        }

        for (date, partition) in by_date {
            let path = self.partition_path(source, &date, run_id);
            match self.write_partition(&path, &partition).await {
                Ok(()) => {
                    tracing::info!(
                        source,
                        date = %date,
                        records = partition.len(),
                        path = %path,
                        "wrote partition"
                    );
                    report.records_written += partition.len();
                    report.files.push(path.to_string());
                }
                Err(e) => {
                    tracing::error!(source, date = %date, error = %e, "partition write failed");
                    report.failures.push((date, e.to_string()));
                }
            }
        }

        report
    }

    async fn write_partition(
        &self,
        path: &ObjectPath,
        events: &[&RawEvent],
    ) -> Result<(), SinkError> {
        let mut lines = Vec::with_capacity(events.len());
        for event in events {
            lines.push(sorted_json_line(event)?);
        }
        let ndjson = lines.join("\n");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(ndjson.as_bytes())?;
        let compressed = encoder.finish()?;

        self.store
            .put(path, PutPayload::from(compressed))
            .await?;
        Ok(())
    }

    fn partition_path(&self, source: &str, date: &str, run_id: &str) -> ObjectPath {
        let suffix = format!("raw/{source}/dt={date}/part-{run_id}.jsonl.gz");
        if self.prefix.as_ref().is_empty() {
            ObjectPath::from(suffix)
        } else {
            ObjectPath::from(format!("{}/{suffix}", self.prefix))
        }
    }
}

/// One event as a single JSON line with lexicographically sorted keys.
///
/// `serde_json::Value` maps are BTree-backed, so a value round-trip is all
/// the sorting needed.
fn sorted_json_line(event: &RawEvent) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(event)?;
    serde_json::to_string(&value)
}

/// Run-unique suffix for partition file names: UTC timestamp plus eight
/// hex chars of a v4 UUID, so concurrent runs never collide on a path.
#[must_use]
pub fn new_run_id(now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d-%H%M%S");
    let nonce = uuid::Uuid::new_v4().simple().to_string();
    format!("{stamp}-{}", &nonce[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::read::GzDecoder;
    use std::io::Read;

    use brandpulse_core::content_hash;

    fn event(id: &str, ts: DateTime<Utc>) -> RawEvent {
        RawEvent {
            event_id: id.to_string(),
            ts_event: ts,
            brand_id: "chase".to_string(),
            source: "reddit".to_string(),
            geo_country: None,
            text: "Chase fees".to_string(),
            content_hash: content_hash("Chase fees"),
            metadata: serde_json::json!({"subreddit": "personalfinance"}),
            ingested_at: ts,
            source_run: "test-run".to_string(),
        }
    }

    fn memory_writer() -> PartitionWriter {
        PartitionWriter::new(
            Arc::new(object_store::memory::InMemory::new()),
            ObjectPath::default(),
        )
    }

    async fn read_gz(writer: &PartitionWriter, path: &str) -> String {
        let bytes = writer
            .store
            .get(&ObjectPath::from(path))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        let mut decoder = GzDecoder::new(&bytes[..]);
        let mut out = String::new();
        decoder.read_to_string(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn groups_events_into_date_partitions() {
        let writer = memory_writer();
        let day1 = Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2025, 3, 15, 8, 0, 0).unwrap();
        let events = vec![event("a", day1), event("b", day2), event("c", day1)];

        let report = writer.write_batch("reddit", "run-1", &events).await;
        assert_eq!(report.files.len(), 2);
        assert_eq!(report.records_written, 3);
        assert!(report.failures.is_empty());
        assert!(report.files[0].contains("raw/reddit/dt=2025-03-14/part-run-1.jsonl.gz"));
        assert!(report.files[1].contains("dt=2025-03-15"));

        let content = read_gz(&writer, &report.files[0]).await;
        assert_eq!(content.lines().count(), 2);
    }

    #[tokio::test]
    async fn lines_have_sorted_keys() {
        let writer = memory_writer();
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap();
        let report = writer.write_batch("reddit", "run-2", &[event("a", ts)]).await;

        let content = read_gz(&writer, &report.files[0]).await;
        let line = content.lines().next().unwrap();
        // '_'-prefixed bookkeeping fields sort first.
        assert!(line.starts_with("{\"_ingested_at\""));
        let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["event_id"], "a");
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let writer = memory_writer();
        let report = writer.write_batch("reddit", "run-3", &[]).await;
        assert!(report.files.is_empty());
        assert_eq!(report.records_written, 0);
    }

    #[test]
    fn run_ids_embed_timestamp_and_are_unique() {
        let now = Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap();
        let a = new_run_id(now);
        let b = new_run_id(now);
        assert!(a.starts_with("20250314-092653-"));
        assert_ne!(a, b);
        assert_eq!(a.len(), "20250314-092653-".len() + 8);
    }

    #[test]
    fn from_url_rejects_garbage() {
        let err = PartitionWriter::from_url("not a url").unwrap_err();
        assert!(matches!(err, SinkError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn from_url_memory_scheme_works() {
        let writer = PartitionWriter::from_url("memory:///").unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap();
        let report = writer.write_batch("cfpb", "run-4", &[event("x", ts)]).await;
        assert_eq!(report.files.len(), 1);
    }
}
