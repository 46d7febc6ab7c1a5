//! Deterministic event identity and the common record builder.
//!
//! Every `event_id` is derived only from native source fields, never from
//! wall-clock time or randomness, so re-ingesting the same native item
//! (e.g. in two overlapping poll windows) yields the same id and the
//! downstream upsert dedupes it.

use chrono::{DateTime, Utc};
use serde_json::Value;

use brandpulse_core::{content_hash, RawEvent};

#[must_use]
pub fn reddit_post_event_id(native_id: &str) -> String {
    format!("reddit_t3_{native_id}")
}

#[must_use]
pub fn reddit_comment_event_id(native_id: &str) -> String {
    format!("reddit_t1_{native_id}")
}

#[must_use]
pub fn cfpb_event_id(complaint_id: &str) -> String {
    format!("cfpb_complaint_{complaint_id}")
}

#[must_use]
pub fn glassdoor_event_id(review_id: &str) -> String {
    format!("glassdoor_review_{review_id}")
}

#[must_use]
pub fn twitter_event_id(tweet_id: &str) -> String {
    format!("twitter_tweet_{tweet_id}")
}

/// Trends points have no native id; brand, keyword, and point time
/// together identify one measurement.
#[must_use]
pub fn trends_event_id(brand_id: &str, keyword: &str, epoch_secs: i64) -> String {
    format!("trends_{brand_id}_{}_{epoch_secs}", slug(keyword))
}

/// Batch identifier recorded in `_source_run`.
#[must_use]
pub fn source_run_id(source: &str, run_id: &str) -> String {
    format!("{source}_fetcher_{run_id}")
}

fn slug(term: &str) -> String {
    term.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Assemble one normalized record. Pure apart from `ingested_at`, which
/// the caller supplies so a whole batch shares one ingest timestamp.
#[must_use]
#[allow(clippy::too_many_arguments)]
pub fn make_event(
    event_id: String,
    ts_event: DateTime<Utc>,
    brand_id: &str,
    source: &str,
    geo_country: Option<String>,
    text: String,
    metadata: Value,
    ingested_at: DateTime<Utc>,
    source_run: &str,
) -> RawEvent {
    let hash = content_hash(&text);
    RawEvent {
        event_id,
        ts_event,
        brand_id: brand_id.to_string(),
        source: source.to_string(),
        geo_country,
        text,
        content_hash: hash,
        metadata,
        ingested_at,
        source_run: source_run.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn event_ids_are_deterministic_per_native_item() {
        assert_eq!(reddit_post_event_id("1abc2d"), reddit_post_event_id("1abc2d"));
        assert_eq!(reddit_post_event_id("1abc2d"), "reddit_t3_1abc2d");
        assert_eq!(reddit_comment_event_id("k9x"), "reddit_t1_k9x");
        assert_eq!(cfpb_event_id("7421339"), "cfpb_complaint_7421339");
        assert_eq!(glassdoor_event_id("88120431"), "glassdoor_review_88120431");
        assert_eq!(twitter_event_id("1764023"), "twitter_tweet_1764023");
    }

    #[test]
    fn trends_ids_slug_the_keyword() {
        let id = trends_event_id("td_bank", "TD Bank mortgage rates", 1_741_939_200);
        assert_eq!(id, "trends_td_bank_td_bank_mortgage_rates_1741939200");
        assert_eq!(
            id,
            trends_event_id("td_bank", "TD Bank mortgage rates", 1_741_939_200)
        );
    }

    #[test]
    fn make_event_hashes_the_text() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 0).unwrap();
        let event = make_event(
            reddit_post_event_id("abc"),
            ts,
            "chase",
            "reddit",
            None,
            "Chase raised my fees".to_string(),
            serde_json::json!({}),
            ts,
            "reddit_fetcher_20250314-080000-deadbeef",
        );
        assert_eq!(event.content_hash, content_hash("Chase raised my fees"));
        assert_eq!(event.content_hash.len(), 16);
        assert_eq!(event.source, "reddit");
    }
}
