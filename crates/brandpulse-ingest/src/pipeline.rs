//! One fetch run, end to end: resolve parameters, fetch from the source,
//! enrich, write to the sink, and record bookkeeping.
//!
//! Run bookkeeping (the `ingest_runs` table) is best-effort: a failure to
//! record a run never blocks fetching. Per-source-unit failures (one
//! subreddit, one brand) are logged and skipped; only failures that make
//! the whole run meaningless (missing credentials, failed auth, a failed
//! single-call fetch) propagate out.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;

use brandpulse_core::{AppConfig, BrandConfig, BrandsFile, RawEvent};
use brandpulse_db::ingest_runs;
use brandpulse_nlp::NlpClient;
use brandpulse_sink::{new_run_id, PartitionWriter};

use crate::error::IngestError;
use crate::normalize::source_run_id;
use crate::pacing::RequestPacer;
use crate::poller::{
    load_state, persist_if_advanced, resolve_window, PgCursorStore, WatermarkTracker,
};
use crate::sources::cfpb::CfpbSource;
use crate::sources::glassdoor::GlassdoorSource;
use crate::sources::reddit::RedditSource;
use crate::sources::trends::TrendsSource;
use crate::sources::twitter::TwitterSource;

/// CFPB runs without a cursor; the default window is a month back.
const CFPB_DEFAULT_LOOKBACK_DAYS: i64 = 30;
const CFPB_DEFAULT_LIMIT: usize = 1000;
const GLASSDOOR_DEFAULT_LIMIT: usize = 100;
const TWITTER_DEFAULT_RESULTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Reddit,
    Cfpb,
    Glassdoor,
    Twitter,
    Trends,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Reddit,
        Source::Cfpb,
        Source::Glassdoor,
        Source::Twitter,
        Source::Trends,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Reddit => "reddit",
            Source::Cfpb => "cfpb",
            Source::Glassdoor => "glassdoor",
            Source::Twitter => "twitter",
            Source::Trends => "trends",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reddit" => Ok(Source::Reddit),
            "cfpb" => Ok(Source::Cfpb),
            "glassdoor" => Ok(Source::Glassdoor),
            "twitter" => Ok(Source::Twitter),
            "trends" => Ok(Source::Trends),
            other => Err(IngestError::UnknownSource(other.to_string())),
        }
    }
}

/// Caller-supplied run parameters, all optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FetchParams {
    /// Explicit scan start date (midnight UTC).
    pub date: Option<NaiveDate>,
    /// Alias of `date` used by the complaint-style sources.
    pub since_date: Option<NaiveDate>,
    pub limit: Option<usize>,
    /// Rewind to the full lookback with larger pages.
    pub initial_fetch: bool,
    /// Override the configured subreddit list (Reddit only).
    pub subreddits: Option<Vec<String>>,
    /// Restrict the run to these brand ids.
    pub brands: Option<Vec<String>>,
}

/// What one run did, returned to the HTTP/CLI caller.
#[derive(Debug, Serialize)]
pub struct IngestSummary {
    pub status: &'static str,
    pub source: String,
    pub run_id: String,
    pub records_emitted: usize,
    pub files_written: Vec<String>,
    pub partition_failures: usize,
    /// Subreddits (Reddit) or brands (everything else) processed.
    pub units_processed: usize,
    pub api_requests: u64,
    pub initial_fetch: bool,
}

/// What one source collection produced, before enrichment and writing.
struct Collected {
    events: Vec<RawEvent>,
    /// Subreddits or brands scanned.
    units: usize,
    api_requests: u64,
}

/// Shared per-process state driving fetch runs.
#[derive(Clone)]
pub struct Pipeline {
    config: AppConfig,
    brands: BrandsFile,
    pool: PgPool,
    writer: PartitionWriter,
    nlp: NlpClient,
}

impl Pipeline {
    /// # Errors
    ///
    /// Returns [`IngestError::Sink`] if the sink URL is unusable.
    pub fn new(config: AppConfig, brands: BrandsFile, pool: PgPool) -> Result<Self, IngestError> {
        let writer =
            PartitionWriter::from_url(&config.sink_url).map_err(|e| IngestError::Sink(e.to_string()))?;
        let nlp = NlpClient::new(config.nlp_endpoint.clone(), config.http_timeout_secs);
        Ok(Self {
            config,
            brands,
            pool,
            writer,
            nlp,
        })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Execute one fetch run for `source`.
    ///
    /// # Errors
    ///
    /// Returns the error that made the run meaningless; partial failures
    /// inside the run are logged and reflected only in the summary counts.
    pub async fn run(
        &self,
        source: Source,
        trigger: &str,
        params: FetchParams,
    ) -> Result<IngestSummary, IngestError> {
        let started = Utc::now();
        let run_id = new_run_id(started);
        let source_run = source_run_id(source.as_str(), &run_id);
        tracing::info!(source = %source, run_id, trigger, initial_fetch = params.initial_fetch, "starting ingest run");

        let bookkeeping =
            match ingest_runs::create_ingest_run(&self.pool, source.as_str(), trigger).await {
                Ok(row) => Some(row),
                Err(e) => {
                    tracing::warn!(error = %e, "run bookkeeping unavailable, continuing");
                    None
                }
            };

        match self.collect(source, &params, &source_run, started).await {
            Ok(mut collected) => {
                self.enrich(&mut collected.events).await;
                let report = self
                    .writer
                    .write_batch(source.as_str(), &run_id, &collected.events)
                    .await;

                if let Some(row) = bookkeeping {
                    let emitted = i32::try_from(report.records_written).unwrap_or(i32::MAX);
                    let files = i32::try_from(report.files.len()).unwrap_or(i32::MAX);
                    if let Err(e) =
                        ingest_runs::complete_ingest_run(&self.pool, row.id, emitted, files).await
                    {
                        tracing::warn!(run = row.id, error = %e, "failed to record run completion");
                    }
                }

                tracing::info!(
                    source = %source,
                    run_id,
                    records = report.records_written,
                    files = report.files.len(),
                    partition_failures = report.failures.len(),
                    "ingest run complete"
                );
                Ok(IngestSummary {
                    status: "success",
                    source: source.to_string(),
                    run_id,
                    records_emitted: report.records_written,
                    files_written: report.files,
                    partition_failures: report.failures.len(),
                    units_processed: collected.units,
                    api_requests: collected.api_requests,
                    initial_fetch: params.initial_fetch,
                })
            }
            Err(e) => {
                if let Some(row) = bookkeeping {
                    if let Err(mark_err) =
                        ingest_runs::fail_ingest_run(&self.pool, row.id, &e.to_string()).await
                    {
                        tracing::warn!(run = row.id, error = %mark_err, "failed to record run failure");
                    }
                }
                tracing::error!(source = %source, run_id, error = %e, "ingest run failed");
                Err(e)
            }
        }
    }

    async fn collect(
        &self,
        source: Source,
        params: &FetchParams,
        source_run: &str,
        now: DateTime<Utc>,
    ) -> Result<Collected, IngestError> {
        match source {
            Source::Reddit => self.collect_reddit(params, source_run, now).await,
            Source::Cfpb => self.collect_cfpb(params, source_run, now).await,
            Source::Glassdoor => self.collect_glassdoor(params, source_run, now).await,
            Source::Twitter => self.collect_twitter(params, source_run, now).await,
            Source::Trends => self.collect_trends(params, source_run, now).await,
        }
    }

    async fn collect_reddit(
        &self,
        params: &FetchParams,
        source_run: &str,
        now: DateTime<Utc>,
    ) -> Result<Collected, IngestError> {
        let reddit = RedditSource::new(
            self.config.reddit_client_id.clone(),
            self.config.reddit_client_secret.clone(),
            self.config.reddit_user_agent.clone(),
            self.config.http_timeout_secs,
        )?;
        let token = reddit.authenticate().await?;
        let store = PgCursorStore::new(self.pool.clone());
        let brands = filter_brands(&self.brands, params.brands.as_deref());
        let subreddits = params
            .subreddits
            .clone()
            .unwrap_or_else(|| self.brands.subreddits.clone());
        let explicit_since = params.date.or(params.since_date).map(midnight_utc);
        let lookback = Duration::days(self.config.lookback_days);
        let overlap = Duration::hours(self.config.overlap_hours);
        let mut pacer = RequestPacer::from_rpm(self.config.requests_per_minute);

        let mut events = Vec::new();
        let mut processed = 0usize;
        for subreddit in &subreddits {
            let source_key = format!("reddit_{subreddit}");
            let prior = load_state(&store, &source_key).await;
            let window = resolve_window(
                now,
                explicit_since,
                params.initial_fetch,
                prior.as_ref(),
                lookback,
                overlap,
            );
            tracing::info!(subreddit, since = %window.since, initial = window.initial, "polling subreddit");
            let mut tracker = WatermarkTracker::new(
                window.since,
                prior.as_ref().map(|w| w.tie_breaker.as_str()),
            );
            let batch = reddit
                .fetch_subreddit(
                    &token,
                    subreddit,
                    &brands,
                    &window,
                    &mut pacer,
                    &mut tracker,
                    source_run,
                    now,
                )
                .await;
            events.extend(batch);
            persist_if_advanced(&store, &source_key, &tracker).await;
            processed += 1;
        }
        tracing::info!(
            subreddits = processed,
            events = events.len(),
            api_requests = pacer.requests_made(),
            "reddit collection complete"
        );
        Ok(Collected {
            events,
            units: processed,
            api_requests: pacer.requests_made(),
        })
    }

    async fn collect_cfpb(
        &self,
        params: &FetchParams,
        source_run: &str,
        now: DateTime<Utc>,
    ) -> Result<Collected, IngestError> {
        let cfpb = CfpbSource::new(self.config.http_timeout_secs)?;
        let brands = filter_brands(&self.brands, params.brands.as_deref());
        let since = params
            .since_date
            .or(params.date)
            .unwrap_or_else(|| (now - Duration::days(CFPB_DEFAULT_LOOKBACK_DAYS)).date_naive());
        let limit = params.limit.unwrap_or(CFPB_DEFAULT_LIMIT);
        let events = cfpb.fetch(&brands, since, limit, source_run, now).await?;
        Ok(Collected {
            events,
            units: 1,
            api_requests: 1,
        })
    }

    async fn collect_glassdoor(
        &self,
        params: &FetchParams,
        source_run: &str,
        now: DateTime<Utc>,
    ) -> Result<Collected, IngestError> {
        let glassdoor = GlassdoorSource::new(
            self.config.rapidapi_key.clone(),
            self.config.rapidapi_host.clone(),
            self.config.http_timeout_secs,
        )?;
        let brands = filter_brands(&self.brands, params.brands.as_deref());
        let limit = params.limit.unwrap_or(GLASSDOOR_DEFAULT_LIMIT);
        let mut pacer = RequestPacer::from_rpm(self.config.requests_per_minute);

        let mut events = Vec::new();
        let mut processed = 0usize;
        for brand in &brands {
            match glassdoor
                .fetch_brand(brand, limit, &mut pacer, source_run, now)
                .await
            {
                Ok(batch) => events.extend(batch),
                Err(e) => {
                    tracing::error!(brand = %brand.id, transient = e.is_transient(), error = %e, "glassdoor brand fetch failed, continuing");
                }
            }
            processed += 1;
        }
        Ok(Collected {
            events,
            units: processed,
            api_requests: pacer.requests_made(),
        })
    }

    async fn collect_twitter(
        &self,
        params: &FetchParams,
        source_run: &str,
        now: DateTime<Utc>,
    ) -> Result<Collected, IngestError> {
        let twitter = TwitterSource::new(
            self.config.twitter_bearer_token.clone(),
            self.config.http_timeout_secs,
        )?;
        let brands = filter_brands(&self.brands, params.brands.as_deref());
        // Default to yesterday; recent search only reaches back a week.
        let since = params
            .date
            .or(params.since_date)
            .map_or_else(|| now - Duration::days(1), midnight_utc);
        let max_results = params.limit.unwrap_or(TWITTER_DEFAULT_RESULTS);
        let mut pacer = RequestPacer::from_rpm(self.config.requests_per_minute);

        let mut events = Vec::new();
        let mut processed = 0usize;
        for brand in &brands {
            match twitter
                .fetch_brand(brand, since, max_results, &mut pacer, source_run, now)
                .await
            {
                Ok(batch) => events.extend(batch),
                Err(e) => {
                    tracing::error!(brand = %brand.id, transient = e.is_transient(), error = %e, "twitter brand fetch failed, continuing");
                }
            }
            processed += 1;
        }
        Ok(Collected {
            events,
            units: processed,
            api_requests: pacer.requests_made(),
        })
    }

    async fn collect_trends(
        &self,
        params: &FetchParams,
        source_run: &str,
        now: DateTime<Utc>,
    ) -> Result<Collected, IngestError> {
        let trends = TrendsSource::new(self.config.http_timeout_secs)?;
        let brands = filter_brands(&self.brands, params.brands.as_deref());
        let mut pacer = RequestPacer::from_rpm(self.config.requests_per_minute);

        let mut events = Vec::new();
        let mut processed = 0usize;
        for brand in &brands {
            let batch = trends.fetch_brand(brand, &mut pacer, source_run, now).await;
            events.extend(batch);
            processed += 1;
        }
        Ok(Collected {
            events,
            units: processed,
            api_requests: pacer.requests_made(),
        })
    }

    /// Attach classification scores to each event's metadata. Service
    /// failures land in a sidecar field, never block emission.
    async fn enrich(&self, events: &mut [RawEvent]) {
        for event in events.iter_mut() {
            let enrichment = self.nlp.analyze(&event.text).await;
            if let Value::Object(metadata) = &mut event.metadata {
                metadata.insert(
                    "nlp".to_string(),
                    serde_json::to_value(&enrichment.insights).unwrap_or(Value::Null),
                );
                if let Some(error) = enrichment.error {
                    metadata.insert("nlp_error".to_string(), Value::String(error));
                }
            }
        }
    }
}

/// The brand subset a run operates on; unknown ids in the filter are
/// ignored.
#[must_use]
pub fn filter_brands(brands: &BrandsFile, filter: Option<&[String]>) -> Vec<BrandConfig> {
    match filter {
        Some(ids) => brands
            .brands
            .iter()
            .filter(|b| ids.iter().any(|id| id == &b.id))
            .cloned()
            .collect(),
        None => brands.brands.clone(),
    }
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    DateTime::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0).unwrap_or_default(), Utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn brands_file() -> BrandsFile {
        let yaml = r"
brands:
  - id: chase
    name: Chase
    aliases: [Chase, Chase Bank]
  - id: td_bank
    name: TD Bank
    aliases: [TD Bank, TD]
subreddits: [personalfinance]
";
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn source_names_round_trip() {
        for source in Source::ALL {
            assert_eq!(Source::from_str(source.as_str()).unwrap(), source);
        }
        let err = Source::from_str("myspace").unwrap_err();
        assert!(matches!(err, IngestError::UnknownSource(_)));
    }

    #[test]
    fn fetch_params_deserialize_from_a_sparse_body() {
        let params: FetchParams = serde_json::from_str(
            r#"{"since_date": "2025-03-01", "initial_fetch": true, "brands": ["td_bank"]}"#,
        )
        .unwrap();
        assert_eq!(
            params.since_date,
            Some(NaiveDate::from_ymd_opt(2025, 3, 1).unwrap())
        );
        assert!(params.initial_fetch);
        assert_eq!(params.brands.as_deref(), Some(&["td_bank".to_string()][..]));
        assert!(params.date.is_none());
        assert!(params.subreddits.is_none());

        let empty: FetchParams = serde_json::from_str("{}").unwrap();
        assert!(!empty.initial_fetch);
    }

    #[test]
    fn brand_filter_keeps_only_requested_ids() {
        let brands = brands_file();
        let all = filter_brands(&brands, None);
        assert_eq!(all.len(), 2);

        let filter = vec!["td_bank".to_string(), "not_a_brand".to_string()];
        let subset = filter_brands(&brands, Some(&filter));
        assert_eq!(subset.len(), 1);
        assert_eq!(subset[0].id, "td_bank");
    }

    #[test]
    fn summary_carries_the_request_count() {
        let summary = IngestSummary {
            status: "success",
            source: "reddit".to_string(),
            run_id: "20250314-120000-deadbeef".to_string(),
            records_emitted: 4,
            files_written: vec!["raw/reddit/dt=2025-03-14/part-x.jsonl.gz".to_string()],
            partition_failures: 0,
            units_processed: 2,
            api_requests: RequestPacer::from_rpm(60).requests_made(),
            initial_fetch: false,
        };
        let json = serde_json::to_value(&summary).expect("serialize");
        assert_eq!(json["api_requests"], 0);
        assert_eq!(json["units_processed"], 2);
    }

    #[test]
    fn midnight_utc_pins_the_date_to_day_start() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let ts = midnight_utc(date);
        assert_eq!(ts.to_rfc3339(), "2025-03-14T00:00:00+00:00");
    }
}
