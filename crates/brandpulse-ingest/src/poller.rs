//! Incremental polling state: watermark resolution, advancement tracking,
//! and the cursor store boundary.
//!
//! Each poll run is one-shot: read the latest watermark for a source key,
//! widen it backward by the overlap window, scan, and append a new
//! watermark row only if the maximum observed event time moved past the
//! window start. Failures on the store degrade instead of aborting — a
//! failed read falls back to the default lookback, a failed write is
//! logged and left for the next run's overlap to absorb.

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use crate::error::IngestError;

/// Page size on the very first fetch of a source.
pub const INITIAL_PAGE_LIMIT: usize = 500;
/// Page size on ordinary incremental polls.
pub const INCREMENTAL_PAGE_LIMIT: usize = 100;

/// The furthest-ingested point for one source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watermark {
    pub cursor: DateTime<Utc>,
    /// Source-native id breaking ties between items at the same cursor
    /// time. Compared lexicographically; the comparator is part of the
    /// idempotency contract and must not change between runs.
    pub tie_breaker: String,
}

/// Append-only persistence for per-source watermarks.
#[allow(async_fn_in_trait)]
pub trait CursorStore {
    async fn get(&self, source_key: &str) -> Result<Option<Watermark>, IngestError>;
    async fn append(&self, source_key: &str, watermark: &Watermark) -> Result<(), IngestError>;
}

/// Cursor store backed by the `ingest_state` table.
#[derive(Clone)]
pub struct PgCursorStore {
    pool: PgPool,
}

impl PgCursorStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl CursorStore for PgCursorStore {
    async fn get(&self, source_key: &str) -> Result<Option<Watermark>, IngestError> {
        let Some(row) = brandpulse_db::cursor::get_state(&self.pool, source_key).await? else {
            return Ok(None);
        };
        let Some(cursor_iso) = row.cursor_iso else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&cursor_iso) {
            Ok(cursor) => Ok(Some(Watermark {
                cursor: cursor.with_timezone(&Utc),
                tie_breaker: row.tie_breaker_id.unwrap_or_default(),
            })),
            Err(e) => {
                // Unparsable cursor is treated as no prior state.
                tracing::warn!(source_key, cursor_iso, error = %e, "ignoring malformed cursor");
                Ok(None)
            }
        }
    }

    async fn append(&self, source_key: &str, watermark: &Watermark) -> Result<(), IngestError> {
        brandpulse_db::cursor::append_state(
            &self.pool,
            source_key,
            &watermark.cursor.to_rfc3339(),
            Some(&watermark.tie_breaker),
        )
        .await?;
        Ok(())
    }
}

/// The resolved scan window for one poll run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollWindow {
    /// Items with event time before this are skipped.
    pub since: DateTime<Utc>,
    pub page_limit: usize,
    pub initial: bool,
}

/// Decide the scan window for a run.
///
/// Precedence: an initial fetch always rewinds the full lookback; an
/// explicit caller-supplied start wins over stored state; otherwise the
/// prior cursor minus the overlap window; with no prior state at all the
/// window defaults to the lookback, never "all history".
#[must_use]
pub fn resolve_window(
    now: DateTime<Utc>,
    explicit_since: Option<DateTime<Utc>>,
    initial_fetch: bool,
    prior: Option<&Watermark>,
    lookback: Duration,
    overlap: Duration,
) -> PollWindow {
    if initial_fetch {
        return PollWindow {
            since: now - lookback,
            page_limit: INITIAL_PAGE_LIMIT,
            initial: true,
        };
    }
    let since = match (explicit_since, prior) {
        (Some(explicit), _) => explicit - overlap,
        (None, Some(watermark)) => watermark.cursor - overlap,
        (None, None) => now - lookback,
    };
    PollWindow {
        since,
        page_limit: INCREMENTAL_PAGE_LIMIT,
        initial: false,
    }
}

/// Tracks the maximum event time seen during a scan, with lexicographic
/// tie-breaking on the native id for items at the same time.
#[derive(Debug)]
pub struct WatermarkTracker {
    window_start: DateTime<Utc>,
    max_ts: DateTime<Utc>,
    tie_breaker: String,
}

impl WatermarkTracker {
    #[must_use]
    pub fn new(window_start: DateTime<Utc>, prior_tie_breaker: Option<&str>) -> Self {
        Self {
            window_start,
            max_ts: window_start,
            tie_breaker: prior_tie_breaker.unwrap_or_default().to_string(),
        }
    }

    pub fn observe(&mut self, ts: DateTime<Utc>, native_id: &str) {
        if ts > self.max_ts || (ts == self.max_ts && native_id > self.tie_breaker.as_str()) {
            self.max_ts = ts;
            self.tie_breaker = native_id.to_string();
        }
    }

    /// The new watermark, or `None` if nothing moved past the window
    /// start (an empty or fully-filtered scan must not regress state).
    #[must_use]
    pub fn advanced(&self) -> Option<Watermark> {
        (self.max_ts > self.window_start).then(|| Watermark {
            cursor: self.max_ts,
            tie_breaker: self.tie_breaker.clone(),
        })
    }
}

/// Read the latest watermark, treating a failed read as "no prior state"
/// so the run can still proceed on the default lookback.
pub async fn load_state<S: CursorStore>(store: &S, source_key: &str) -> Option<Watermark> {
    match store.get(source_key).await {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(source_key, error = %e, "cursor read failed, falling back to lookback");
            None
        }
    }
}

/// Append the new watermark if the scan advanced. A failed write is
/// logged, not propagated: the next poll re-scans the overlap window and
/// deterministic event ids make the re-detection harmless downstream.
pub async fn persist_if_advanced<S: CursorStore>(
    store: &S,
    source_key: &str,
    tracker: &WatermarkTracker,
) {
    let Some(watermark) = tracker.advanced() else {
        tracing::debug!(source_key, "watermark did not advance, leaving state untouched");
        return;
    };
    if let Err(e) = store.append(source_key, &watermark).await {
        tracing::error!(source_key, error = %e, "cursor write failed, next poll will re-scan");
    }
}
