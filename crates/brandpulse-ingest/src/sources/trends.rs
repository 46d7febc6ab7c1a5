//! Google Trends interest-over-time source.
//!
//! Trends has no documented API; the flow mirrors the web widget
//! protocol: an `explore` call returns per-widget request tokens, then
//! `widgetdata/multiline` returns the time series for the TIMESERIES
//! widget. Both responses carry an XSSI guard prefix before the JSON
//! body that must be stripped.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use brandpulse_core::{BrandConfig, RawEvent};

use crate::error::IngestError;
use crate::normalize::{make_event, trends_event_id};
use crate::pacing::RequestPacer;

const DEFAULT_BASE: &str = "https://trends.google.com";
const DEFAULT_GEO: &str = "US";
const DEFAULT_TIMEFRAME: &str = "now 7-d";
const HL: &str = "en-US";
const TZ: &str = "360";

#[derive(Debug)]
pub struct TrendsSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ExploreResponse {
    widgets: Vec<Widget>,
}

#[derive(Debug, Deserialize)]
struct Widget {
    id: String,
    token: String,
    request: Value,
}

#[derive(Debug, Deserialize)]
struct MultilineResponse {
    default: Timeline,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Timeline {
    timeline_data: Vec<TimelinePoint>,
}

#[derive(Debug, Deserialize)]
struct TimelinePoint {
    /// Epoch seconds as a decimal string.
    time: String,
    #[serde(default)]
    value: Vec<i64>,
}

impl TrendsSource {
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be constructed.
    pub fn new(timeout_secs: u64) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Fetch interest-over-time for each of the brand's trends terms.
    /// Per-term failures are logged and skipped.
    pub async fn fetch_brand(
        &self,
        brand: &BrandConfig,
        pacer: &mut RequestPacer,
        source_run: &str,
        ingested_at: DateTime<Utc>,
    ) -> Vec<RawEvent> {
        let mut events = Vec::new();
        for term in brand.trends_query_terms() {
            pacer.pace().await;
            match self.interest_over_time(term).await {
                Ok(points) => {
                    for point in points {
                        if let Some(event) =
                            normalize_point(&point, brand, term, source_run, ingested_at)
                        {
                            events.push(event);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        brand = %brand.id,
                        term,
                        transient = e.is_transient(),
                        error = %e,
                        "trends fetch failed for term, continuing"
                    );
                }
            }
        }
        tracing::info!(brand = %brand.id, events = events.len(), "trends fetch complete");
        events
    }

    async fn interest_over_time(&self, keyword: &str) -> Result<Vec<TimelinePoint>, IngestError> {
        let widget = self.explore(keyword).await?;
        self.widget_data(&widget).await
    }

    async fn explore(&self, keyword: &str) -> Result<Widget, IngestError> {
        let url = format!("{}/trends/api/explore", self.base_url);
        let req = serde_json::json!({
            "comparisonItem": [{
                "keyword": keyword,
                "geo": DEFAULT_GEO,
                "time": DEFAULT_TIMEFRAME,
            }],
            "category": 0,
            "property": "",
        });
        let body = self
            .get_text(&url, &[("hl", HL), ("tz", TZ), ("req", &req.to_string())])
            .await?;
        let parsed: ExploreResponse =
            serde_json::from_str(strip_xssi_prefix(&body)).map_err(|e| {
                IngestError::Deserialize {
                    context: format!("trends explore '{keyword}'"),
                    source: e,
                }
            })?;
        parsed
            .widgets
            .into_iter()
            .find(|w| w.id == "TIMESERIES")
            .ok_or_else(|| IngestError::Shape {
                context: format!("trends explore '{keyword}'"),
                reason: "no TIMESERIES widget in response".to_string(),
            })
    }

    async fn widget_data(&self, widget: &Widget) -> Result<Vec<TimelinePoint>, IngestError> {
        let url = format!("{}/trends/api/widgetdata/multiline", self.base_url);
        let body = self
            .get_text(
                &url,
                &[
                    ("hl", HL),
                    ("tz", TZ),
                    ("req", &widget.request.to_string()),
                    ("token", &widget.token),
                ],
            )
            .await?;
        let parsed: MultilineResponse =
            serde_json::from_str(strip_xssi_prefix(&body)).map_err(|e| {
                IngestError::Deserialize {
                    context: "trends widget data".to_string(),
                    source: e,
                }
            })?;
        Ok(parsed.default.timeline_data)
    }

    async fn get_text(&self, url: &str, params: &[(&str, &str)]) -> Result<String, IngestError> {
        let response = self.client.get(url).query(params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

/// Drop the `)]}'` guard (and any junk before the first brace).
fn strip_xssi_prefix(body: &str) -> &str {
    match body.find('{') {
        Some(start) => &body[start..],
        None => body,
    }
}

fn normalize_point(
    point: &TimelinePoint,
    brand: &BrandConfig,
    keyword: &str,
    source_run: &str,
    ingested_at: DateTime<Utc>,
) -> Option<RawEvent> {
    let epoch: i64 = point.time.parse().ok()?;
    let ts = DateTime::from_timestamp(epoch, 0)?;
    let value = point.value.first().copied().unwrap_or(0);

    let metadata = serde_json::json!({
        "keyword": keyword,
        "keyword_type": "brand",
        "geo": DEFAULT_GEO,
        "timeframe": DEFAULT_TIMEFRAME,
        "value": value,
        "is_brand_keyword": true,
    });

    Some(make_event(
        trends_event_id(&brand.id, keyword, epoch),
        ts,
        &brand.id,
        "trends",
        Some(DEFAULT_GEO.to_string()),
        keyword.to_string(),
        metadata,
        ingested_at,
        source_run,
    ))
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
            trends_terms: vec!["TD Bank".to_string()],
        }
    }

    #[test]
    fn xssi_prefix_is_stripped() {
        assert_eq!(strip_xssi_prefix(")]}'\n{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_xssi_prefix(")]}',\n{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_xssi_prefix("{\"a\":1}"), "{\"a\":1}");
    }

    #[tokio::test]
    async fn fetch_walks_the_explore_then_widget_data_flow() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                ")]}'\n{\"widgets\":[\
                 {\"id\":\"TIMESERIES\",\"token\":\"tok-1\",\"request\":{\"q\":\"td\"}},\
                 {\"id\":\"RELATED_QUERIES\",\"token\":\"tok-2\",\"request\":{}}]}",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/trends/api/widgetdata/multiline"))
            .and(query_param("token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                ")]}',\n{\"default\":{\"timelineData\":[\
                 {\"time\":\"1741939200\",\"value\":[42]},\
                 {\"time\":\"1741942800\",\"value\":[57]}]}}",
            ))
            .mount(&server)
            .await;

        let trends = TrendsSource::new(5).unwrap().with_base_url(&server.uri());
        let mut pacer = RequestPacer::from_rpm(60_000);
        let events = trends
            .fetch_brand(&brand(), &mut pacer, "trends_fetcher_test", Utc::now())
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].event_id,
            "trends_td_bank_td_bank_1741939200"
        );
        assert_eq!(events[0].metadata["value"], 42);
        assert_eq!(events[0].geo_country.as_deref(), Some("US"));
        assert_eq!(events[1].metadata["value"], 57);
    }

    #[tokio::test]
    async fn term_failure_is_skipped_not_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let trends = TrendsSource::new(5).unwrap().with_base_url(&server.uri());
        let mut pacer = RequestPacer::from_rpm(60_000);
        let events = trends
            .fetch_brand(&brand(), &mut pacer, "trends_fetcher_test", Utc::now())
            .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn missing_timeseries_widget_is_a_shape_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/trends/api/explore"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(")]}'\n{\"widgets\":[{\"id\":\"GEO_MAP\",\"token\":\"t\",\"request\":{}}]}"),
            )
            .mount(&server)
            .await;

        let trends = TrendsSource::new(5).unwrap().with_base_url(&server.uri());
        let err = trends.interest_over_time("TD Bank").await.unwrap_err();
        assert!(matches!(err, IngestError::Shape { .. }));
        assert!(!err.is_transient());
    }
}
