//! Glassdoor reviews via the RapidAPI proxy.
//!
//! Company search resolves a brand to the proxy's best-matching company
//! id, then reviews are pulled page by page (bounded). A 429 gets one
//! fixed pause and one retry, nothing more elaborate; the proxy's quota
//! resets on a coarse clock.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use brandpulse_core::{BrandConfig, RawEvent};

use crate::error::IngestError;
use crate::normalize::{glassdoor_event_id, make_event};
use crate::pacing::RequestPacer;

/// Pause before the single retry after a 429.
const RATE_LIMIT_PAUSE: Duration = Duration::from_secs(60);
const MAX_REVIEW_PAGES: usize = 5;
/// The proxy caps review pages at 50 items.
const REVIEWS_PER_PAGE: usize = 50;

#[derive(Debug)]
pub struct GlassdoorSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_host: String,
    rate_limit_pause: Duration,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Company {
    #[serde(alias = "company_id")]
    id: Value,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Review {
    #[serde(alias = "review_id")]
    id: Value,
    #[serde(default, alias = "review_date")]
    date: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default, alias = "headline")]
    summary: Option<String>,
    #[serde(default)]
    pros: Option<String>,
    #[serde(default)]
    cons: Option<String>,
}

impl GlassdoorSource {
    /// # Errors
    ///
    /// Returns [`IngestError::MissingCredentials`] when the RapidAPI key
    /// or host is absent.
    pub fn new(
        api_key: Option<String>,
        api_host: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, IngestError> {
        let api_key = api_key.ok_or_else(|| IngestError::MissingCredentials {
            api: "glassdoor".to_string(),
            var: "RAPIDAPI_KEY".to_string(),
        })?;
        let api_host = api_host.ok_or_else(|| IngestError::MissingCredentials {
            api: "glassdoor".to_string(),
            var: "RAPIDAPI_HOST".to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: format!("https://{api_host}"),
            api_key,
            api_host,
            rate_limit_pause: RATE_LIMIT_PAUSE,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Shorten the 429 pause in tests.
    #[must_use]
    pub fn with_rate_limit_pause(mut self, pause: Duration) -> Self {
        self.rate_limit_pause = pause;
        self
    }

    /// Fetch recent reviews for one brand. Page-level failures after the
    /// first page are logged and truncate the scan rather than failing it.
    ///
    /// # Errors
    ///
    /// Propagates company-search failures; without a company id there is
    /// nothing to scan.
    pub async fn fetch_brand(
        &self,
        brand: &BrandConfig,
        limit: usize,
        pacer: &mut RequestPacer,
        source_run: &str,
        ingested_at: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, IngestError> {
        pacer.pace().await;
        let Some(company) = self.search_company(&brand.name).await? else {
            tracing::warn!(brand = %brand.id, "no Glassdoor company match");
            return Ok(Vec::new());
        };
        let Some(company_id) = value_as_string(&company.id) else {
            return Err(IngestError::Shape {
                context: format!("glassdoor company for {}", brand.id),
                reason: "missing company id".to_string(),
            });
        };
        let company_name = company.name.clone().unwrap_or_else(|| brand.name.clone());
        tracing::info!(brand = %brand.id, company_id, company = %company_name, "resolved Glassdoor company");

        let mut events = Vec::new();
        let mut page = 1usize;
        while page <= MAX_REVIEW_PAGES && events.len() < limit {
            pacer.pace().await;
            let reviews = match self.reviews(&company_id, page).await {
                Ok(reviews) => reviews,
                Err(e) => {
                    tracing::error!(
                        brand = %brand.id,
                        page,
                        transient = e.is_transient(),
                        error = %e,
                        "review page fetch failed, stopping pagination"
                    );
                    break;
                }
            };
            if reviews.is_empty() {
                break;
            }
            for review in &reviews {
                match normalize_review(
                    review,
                    brand,
                    &company_id,
                    &company_name,
                    source_run,
                    ingested_at,
                ) {
                    Ok(event) => events.push(event),
                    Err(e) => {
                        tracing::warn!(brand = %brand.id, error = %e, "skipping malformed review");
                    }
                }
            }
            page += 1;
        }
        events.truncate(limit);

        tracing::info!(brand = %brand.id, events = events.len(), "glassdoor fetch complete");
        Ok(events)
    }

    /// Best-matching company for a search term, if any.
    async fn search_company(&self, query: &str) -> Result<Option<Company>, IngestError> {
        let url = format!("{}/company-search", self.base_url);
        let envelope: Envelope<Vec<Company>> = self
            .get_with_retry(&url, &[("query", query), ("limit", "10")])
            .await?;
        Ok(unwrap_data(envelope).into_iter().next())
    }

    async fn reviews(&self, company_id: &str, page: usize) -> Result<Vec<Review>, IngestError> {
        let url = format!("{}/company-reviews", self.base_url);
        let envelope: Envelope<Vec<Review>> = self
            .get_with_retry(
                &url,
                &[
                    ("company_id", company_id),
                    ("page", &page.to_string()),
                    ("limit", &REVIEWS_PER_PAGE.to_string()),
                    ("sort", "date"),
                    ("language", "en"),
                ],
            )
            .await?;
        Ok(unwrap_data(envelope))
    }

    /// One GET with the RapidAPI headers; on a 429, pause once and retry
    /// once.
    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, IngestError> {
        let mut rate_limited_once = false;
        loop {
            let response = self
                .client
                .get(url)
                .header("X-RapidAPI-Key", &self.api_key)
                .header("X-RapidAPI-Host", &self.api_host)
                .header(reqwest::header::ACCEPT, "application/json")
                .query(params)
                .send()
                .await?;

            let status = response.status();
            if status.as_u16() == 429 {
                if rate_limited_once {
                    return Err(IngestError::RateLimited {
                        api: "glassdoor".to_string(),
                    });
                }
                rate_limited_once = true;
                tracing::warn!(url, pause_secs = self.rate_limit_pause.as_secs(), "rate limited, pausing once");
                tokio::time::sleep(self.rate_limit_pause).await;
                continue;
            }
            if !status.is_success() {
                return Err(IngestError::UnexpectedStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }
            let body = response.text().await?;
            return serde_json::from_str(&body).map_err(|e| IngestError::Deserialize {
                context: url.to_string(),
                source: e,
            });
        }
    }
}

/// The proxy signals application-level failure with `status != "OK"`
/// even on HTTP 200; treat that as an empty result.
fn unwrap_data<T: Default>(envelope: Envelope<T>) -> T {
    if envelope.status == "OK" {
        envelope.data.unwrap_or_default()
    } else {
        T::default()
    }
}

fn normalize_review(
    review: &Review,
    brand: &BrandConfig,
    company_id: &str,
    company_name: &str,
    source_run: &str,
    ingested_at: DateTime<Utc>,
) -> Result<RawEvent, IngestError> {
    let id = value_as_string(&review.id).ok_or_else(|| IngestError::Shape {
        context: "glassdoor review".to_string(),
        reason: "missing review id".to_string(),
    })?;
    let date = review.date.as_deref().ok_or_else(|| IngestError::Shape {
        context: format!("glassdoor review {id}"),
        reason: "missing review date".to_string(),
    })?;
    let ts = parse_review_date(date).ok_or_else(|| IngestError::Shape {
        context: format!("glassdoor review {id}"),
        reason: format!("unparsable review date '{date}'"),
    })?;

    let mut parts = Vec::new();
    if let Some(summary) = review.summary.as_deref().filter(|s| !s.is_empty()) {
        parts.push(summary.to_string());
    }
    if let Some(pros) = review.pros.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Pros: {pros}"));
    }
    if let Some(cons) = review.cons.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Cons: {cons}"));
    }
    let text = parts.join(" | ");

    let metadata = serde_json::json!({
        "review_id": id,
        "company_id": company_id,
        "company_name": company_name,
        "rating": review.rating,
    });

    Ok(make_event(
        glassdoor_event_id(&id),
        ts,
        &brand.id,
        "glassdoor",
        None,
        text,
        metadata,
        ingested_at,
        source_run,
    ))
}

fn parse_review_date(date: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(date) {
        return Some(ts.with_timezone(&Utc));
    }
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        parsed.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn brand() -> BrandConfig {
        BrandConfig {
            id: "td_bank".to_string(),
            name: "TD Bank".to_string(),
            aliases: vec!["TD Bank".to_string()],
            cfpb_companies: Vec::new(),
            twitter_terms: Vec::new(),
            trends_terms: Vec::new(),
        }
    }

    fn source(server: &MockServer) -> GlassdoorSource {
        GlassdoorSource::new(
            Some("key".to_string()),
            Some("glassdoor.p.rapidapi.com".to_string()),
            5,
        )
        .unwrap()
        .with_base_url(&server.uri())
        .with_rate_limit_pause(Duration::from_millis(1))
    }

    async fn mount_company_search(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/company-search"))
            .and(query_param("query", "TD Bank"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "data": [
                    { "id": 1154, "name": "TD Bank" },
                    { "id": 9999, "name": "TD Securities" }
                ]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn fetch_resolves_company_and_normalizes_reviews() {
        let server = MockServer::start().await;
        mount_company_search(&server).await;
        Mock::given(method("GET"))
            .and(path("/company-reviews"))
            .and(query_param("company_id", "1154"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "data": [{
                    "review_id": "88120431",
                    "review_date": "2025-03-10",
                    "rating": 2.0,
                    "headline": "Long hours",
                    "pros": "Good benefits",
                    "cons": "Constant restructuring"
                }]
            })))
            .mount(&server)
            .await;
        // Page 2 is empty, ending pagination.
        Mock::given(method("GET"))
            .and(path("/company-reviews"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "data": []
            })))
            .mount(&server)
            .await;

        let glassdoor = source(&server);
        let mut pacer = RequestPacer::from_rpm(60_000);
        let events = glassdoor
            .fetch_brand(&brand(), 100, &mut pacer, "glassdoor_fetcher_test", Utc::now())
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_id, "glassdoor_review_88120431");
        assert_eq!(event.brand_id, "td_bank");
        assert_eq!(event.partition_date(), "2025-03-10");
        assert_eq!(
            event.text,
            "Long hours | Pros: Good benefits | Cons: Constant restructuring"
        );
        assert_eq!(event.metadata["rating"], 2.0);
    }

    #[tokio::test]
    async fn rate_limit_pauses_once_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/company-search"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_company_search(&server).await;
        Mock::given(method("GET"))
            .and(path("/company-reviews"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "data": []
            })))
            .mount(&server)
            .await;

        let glassdoor = source(&server);
        let mut pacer = RequestPacer::from_rpm(60_000);
        let events = glassdoor
            .fetch_brand(&brand(), 100, &mut pacer, "glassdoor_fetcher_test", Utc::now())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn persistent_rate_limit_gives_up_after_one_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/company-search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let glassdoor = source(&server);
        let mut pacer = RequestPacer::from_rpm(60_000);
        let err = glassdoor
            .fetch_brand(&brand(), 100, &mut pacer, "glassdoor_fetcher_test", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::RateLimited { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn no_company_match_yields_no_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/company-search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "OK",
                "data": []
            })))
            .mount(&server)
            .await;

        let glassdoor = source(&server);
        let mut pacer = RequestPacer::from_rpm(60_000);
        let events = glassdoor
            .fetch_brand(&brand(), 100, &mut pacer, "glassdoor_fetcher_test", Utc::now())
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
