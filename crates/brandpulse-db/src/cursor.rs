//! Append-only watermark store (`ingest_state`).
//!
//! Each poll that advances a source's cursor appends one row; rows are
//! never updated or deleted. The live cursor for a source is the most
//! recently written row. Concurrent pollers for the same source may both
//! append; downstream dedup on deterministic event ids absorbs the
//! duplicate work, so no coordination happens here.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `ingest_state` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CursorStateRow {
    pub id: i64,
    pub source: String,
    pub cursor_iso: Option<String>,
    pub tie_breaker_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Fetch the latest watermark for a source, or `None` if the source has
/// never been polled.
///
/// "Latest" is by `updated_at` then `id`, so append-only duplicates from
/// concurrent runs resolve deterministically.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails. Callers are expected to
/// degrade a failed read to "no prior state" rather than aborting a poll.
pub async fn get_state(pool: &PgPool, source: &str) -> Result<Option<CursorStateRow>, DbError> {
    let row = sqlx::query_as::<_, CursorStateRow>(
        "SELECT id, source, cursor_iso, tie_breaker_id, updated_at \
         FROM ingest_state \
         WHERE source = $1 \
         ORDER BY updated_at DESC, id DESC \
         LIMIT 1",
    )
    .bind(source)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Append a new watermark row for a source. Never overwrites prior rows.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails. Callers log and continue;
/// the next poll re-scans the overlap window and re-detects already-ingested
/// items, which is safe because event ids are deterministic.
pub async fn append_state(
    pool: &PgPool,
    source: &str,
    cursor_iso: &str,
    tie_breaker_id: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO ingest_state (source, cursor_iso, tie_breaker_id, updated_at) \
         VALUES ($1, $2, $3, NOW())",
    )
    .bind(source)
    .bind(cursor_iso)
    .bind(tie_breaker_id)
    .execute(pool)
    .await?;

    tracing::info!(
        source,
        cursor = cursor_iso,
        tie_breaker = tie_breaker_id,
        "appended cursor state"
    );
    Ok(())
}

/// All watermark rows for a source, newest first. Audit/replay helper.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_states(
    pool: &PgPool,
    source: &str,
    limit: i64,
) -> Result<Vec<CursorStateRow>, DbError> {
    let rows = sqlx::query_as::<_, CursorStateRow>(
        "SELECT id, source, cursor_iso, tie_breaker_id, updated_at \
         FROM ingest_state \
         WHERE source = $1 \
         ORDER BY updated_at DESC, id DESC \
         LIMIT $2",
    )
    .bind(source)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
