//! Text enrichment via a hosted classification service.
//!
//! The service is an opaque HTTP endpoint: raw text in, a small JSON
//! object with sentiment/severity/topics out. Service failures never
//! block record emission — callers get the all-zero default with the
//! error string carried in a sidecar field. When no endpoint is
//! configured, a keyword-based fallback analyzer runs instead.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod fallback;
mod taxonomy;

pub use taxonomy::FINANCIAL_TOPICS;

const MAX_TOPICS: usize = 3;
const MIN_ANALYZABLE_CHARS: usize = 10;
const MAX_TEXT_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum NlpError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classification service returned status {0}")]
    Status(u16),

    #[error("classification response parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Scores returned by the classification service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextInsights {
    /// Sentiment in `[-1, 1]`.
    pub sentiment: f64,
    /// Issue severity in `[0, 1]`.
    pub severity: f64,
    /// At most three topics from the fixed taxonomy.
    pub topics: Vec<String>,
    pub language: String,
    /// Analysis confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Default for TextInsights {
    fn default() -> Self {
        Self {
            sentiment: 0.0,
            severity: 0.0,
            topics: Vec::new(),
            language: "en".to_string(),
            confidence: 0.0,
        }
    }
}

/// Result of enriching one text: insights plus an optional sidecar error.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrichment {
    pub insights: TextInsights,
    /// Set when the service failed and `insights` is the default.
    pub error: Option<String>,
}

impl Enrichment {
    fn ok(insights: TextInsights) -> Self {
        Self {
            insights,
            error: None,
        }
    }

    fn degraded(error: String) -> Self {
        Self {
            insights: TextInsights::default(),
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

/// Client for the hosted classification endpoint.
#[derive(Debug, Clone)]
pub struct NlpClient {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl NlpClient {
    /// Build a client. `endpoint = None` selects the keyword fallback.
    #[must_use]
    pub fn new(endpoint: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    /// Analyze one text. Never fails: service errors degrade to the
    /// default insights with the error recorded in the sidecar field.
    pub async fn analyze(&self, text: &str) -> Enrichment {
        let cleaned = clean_text(text);
        if cleaned.chars().count() < MIN_ANALYZABLE_CHARS {
            return Enrichment::ok(TextInsights::default());
        }

        let Some(endpoint) = &self.endpoint else {
            return Enrichment::ok(fallback::analyze(&cleaned));
        };

        match self.call_service(endpoint, &cleaned).await {
            Ok(insights) => Enrichment::ok(insights),
            Err(e) => {
                tracing::warn!(error = %e, "classification service failed, using default insights");
                Enrichment::degraded(e.to_string())
            }
        }
    }

    async fn call_service(&self, endpoint: &str, text: &str) -> Result<TextInsights, NlpError> {
        let response = self
            .client
            .post(endpoint)
            .json(&AnalyzeRequest { text })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NlpError::Status(response.status().as_u16()));
        }

        let raw: TextInsights = response.json().await.map_err(NlpError::Http)?;
        Ok(clamp_insights(raw))
    }
}

/// Clamp service output into the documented ranges and trim topics to the
/// taxonomy maximum.
fn clamp_insights(mut insights: TextInsights) -> TextInsights {
    insights.sentiment = insights.sentiment.clamp(-1.0, 1.0);
    insights.severity = insights.severity.clamp(0.0, 1.0);
    insights.confidence = insights.confidence.clamp(0.0, 1.0);
    insights.topics.truncate(MAX_TOPICS);
    if insights.language.is_empty() {
        insights.language = "en".to_string();
    }
    insights
}

/// Strip URLs, collapse whitespace, and cap the length.
fn clean_text(text: &str) -> String {
    let without_urls: Vec<&str> = text
        .split_whitespace()
        .filter(|w| !w.starts_with("http://") && !w.starts_with("https://"))
        .collect();
    without_urls.join(" ").chars().take(MAX_TEXT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn short_text_gets_default_insights_without_a_call() {
        let client = NlpClient::new(Some("http://127.0.0.1:1/analyze".to_string()), 1);
        let result = client.analyze("short").await;
        assert_eq!(result.insights, TextInsights::default());
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn no_endpoint_uses_keyword_fallback() {
        let client = NlpClient::new(None, 1);
        let result = client
            .analyze("this bank is terrible and the app is awful")
            .await;
        assert!(result.insights.sentiment < 0.0);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn service_response_is_clamped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "sentiment": -3.5,
                "severity": 2.0,
                "topics": ["fees", "overdraft", "fraud", "atm", "ux"],
                "language": "en",
                "confidence": 1.7
            })))
            .mount(&server)
            .await;

        let client = NlpClient::new(Some(format!("{}/analyze", server.uri())), 5);
        let result = client
            .analyze("long enough text about overdraft fees at my bank")
            .await;
        assert_eq!(result.insights.sentiment, -1.0);
        assert_eq!(result.insights.severity, 1.0);
        assert_eq!(result.insights.confidence, 1.0);
        assert_eq!(result.insights.topics.len(), 3);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn service_error_degrades_to_default_with_sidecar() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = NlpClient::new(Some(format!("{}/analyze", server.uri())), 5);
        let result = client
            .analyze("long enough text about something that matters")
            .await;
        assert_eq!(result.insights, TextInsights::default());
        let err = result.error.expect("sidecar error should be set");
        assert!(err.contains("503"));
    }

    #[test]
    fn clean_text_strips_urls_and_collapses_whitespace() {
        let cleaned = clean_text("fees   went up https://example.com/a see\nhere");
        assert_eq!(cleaned, "fees went up see here");
    }
}
