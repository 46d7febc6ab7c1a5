//! Twitter/X recent-search source.
//!
//! One query per brand: the brand's search terms OR-joined, retweets
//! excluded, English only. Author and place expansions are folded into
//! each event's metadata; the place country becomes `geo_country`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use brandpulse_core::{BrandConfig, RawEvent};

use crate::error::IngestError;
use crate::normalize::{make_event, twitter_event_id};
use crate::pacing::RequestPacer;

const DEFAULT_API_BASE: &str = "https://api.twitter.com/2";
/// The recent-search endpoint accepts 10..=100 results per call.
const MIN_RESULTS: usize = 10;
const MAX_RESULTS: usize = 100;

#[derive(Debug)]
pub struct TwitterSource {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Tweet>,
    #[serde(default)]
    includes: Includes,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
    #[serde(default)]
    places: Vec<Place>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    author_id: String,
    created_at: String,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    public_metrics: Metrics,
    #[serde(default)]
    possibly_sensitive: bool,
    #[serde(default)]
    geo: Option<Geo>,
}

#[derive(Debug, Default, Deserialize)]
struct Metrics {
    #[serde(default)]
    like_count: i64,
    #[serde(default)]
    reply_count: i64,
    #[serde(default)]
    retweet_count: i64,
    #[serde(default)]
    quote_count: i64,
}

#[derive(Debug, Deserialize)]
struct Geo {
    #[serde(default)]
    place_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Place {
    id: String,
    #[serde(default)]
    country: Option<String>,
}

impl TwitterSource {
    /// # Errors
    ///
    /// Returns [`IngestError::MissingCredentials`] without a bearer token.
    pub fn new(bearer_token: Option<String>, timeout_secs: u64) -> Result<Self, IngestError> {
        let bearer_token = bearer_token.ok_or_else(|| IngestError::MissingCredentials {
            api: "twitter".to_string(),
            var: "TWITTER_BEARER_TOKEN".to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_API_BASE.to_string(),
            bearer_token,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Fetch recent tweets mentioning one brand since `since`.
    ///
    /// # Errors
    ///
    /// Propagates HTTP, status, and deserialization failures; the caller
    /// logs and moves on to the next brand.
    pub async fn fetch_brand(
        &self,
        brand: &BrandConfig,
        since: DateTime<Utc>,
        max_results: usize,
        pacer: &mut RequestPacer,
        source_run: &str,
        ingested_at: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, IngestError> {
        let query = build_query(brand.twitter_query_terms());
        let url = format!("{}/tweets/search/recent", self.base_url);
        let max_results = max_results.clamp(MIN_RESULTS, MAX_RESULTS);

        pacer.pace().await;
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("query", query.as_str()),
                ("max_results", &max_results.to_string()),
                ("start_time", &since.to_rfc3339()),
                (
                    "tweet.fields",
                    "id,text,author_id,created_at,lang,public_metrics,possibly_sensitive,geo",
                ),
                ("user.fields", "id,username,location,verified"),
                ("expansions", "author_id,geo.place_id"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }
        let body = response.text().await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| IngestError::Deserialize {
                context: format!("twitter search for {}", brand.id),
                source: e,
            })?;

        let users: HashMap<&str, &User> = parsed
            .includes
            .users
            .iter()
            .map(|u| (u.id.as_str(), u))
            .collect();
        let places: HashMap<&str, &Place> = parsed
            .includes
            .places
            .iter()
            .map(|p| (p.id.as_str(), p))
            .collect();

        let mut events = Vec::new();
        for tweet in &parsed.data {
            let ts = match DateTime::parse_from_rfc3339(&tweet.created_at) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(tweet_id = tweet.id, error = %e, "skipping tweet with bad timestamp");
                    continue;
                }
            };
            let user = users.get(tweet.author_id.as_str());
            let place_id = tweet.geo.as_ref().and_then(|g| g.place_id.as_deref());
            let place = place_id.and_then(|id| places.get(id));

            let metadata = serde_json::json!({
                "tweet_id": tweet.id,
                "author_id": tweet.author_id,
                "author_username": user.and_then(|u| u.username.clone()),
                "author_verified": user.is_some_and(|u| u.verified),
                "author_location": user.and_then(|u| u.location.clone()),
                "lang": tweet.lang.as_deref().unwrap_or("en"),
                "like_count": tweet.public_metrics.like_count,
                "reply_count": tweet.public_metrics.reply_count,
                "retweet_count": tweet.public_metrics.retweet_count,
                "quote_count": tweet.public_metrics.quote_count,
                "possibly_sensitive": tweet.possibly_sensitive,
                "geo_place_id": place_id,
            });

            events.push(make_event(
                twitter_event_id(&tweet.id),
                ts,
                &brand.id,
                "twitter",
                place.and_then(|p| p.country.clone()),
                tweet.text.clone(),
                metadata,
                ingested_at,
                source_run,
            ));
        }

        tracing::info!(brand = %brand.id, events = events.len(), "twitter fetch complete");
        Ok(events)
    }
}

/// OR-join quoted terms, drop retweets, restrict to English.
#[must_use]
pub fn build_query(terms: &[String]) -> String {
    let quoted: Vec<String> = terms.iter().map(|t| format!("\"{t}\"")).collect();
    format!("({}) -is:retweet lang:en", quoted.join(" OR "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn brand() -> BrandConfig {
        BrandConfig {
            id: "wells_fargo".to_string(),
            name: "Wells Fargo".to_string(),
            aliases: vec!["Wells Fargo".to_string()],
            cfpb_companies: Vec::new(),
            twitter_terms: vec!["Wells Fargo".to_string(), "@WellsFargo".to_string()],
            trends_terms: Vec::new(),
        }
    }

    #[test]
    fn query_quotes_terms_and_excludes_retweets() {
        let query = build_query(&["Wells Fargo".to_string(), "@WellsFargo".to_string()]);
        assert_eq!(
            query,
            "(\"Wells Fargo\" OR \"@WellsFargo\") -is:retweet lang:en"
        );
    }

    #[test]
    fn missing_bearer_token_fails_at_construction() {
        let err = TwitterSource::new(None, 5).unwrap_err();
        assert!(matches!(err, IngestError::MissingCredentials { .. }));
    }

    #[tokio::test]
    async fn fetch_folds_expansions_into_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tweets/search/recent"))
            .and(query_param(
                "query",
                "(\"Wells Fargo\" OR \"@WellsFargo\") -is:retweet lang:en",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{
                    "id": "1764023",
                    "text": "Wells Fargo froze my account again",
                    "author_id": "99",
                    "created_at": "2025-03-14T09:30:00.000Z",
                    "lang": "en",
                    "public_metrics": {
                        "like_count": 12, "reply_count": 3,
                        "retweet_count": 1, "quote_count": 0
                    },
                    "geo": { "place_id": "p1" }
                }],
                "includes": {
                    "users": [{ "id": "99", "username": "angrycustomer", "verified": false, "location": "Boston" }],
                    "places": [{ "id": "p1", "country": "United States" }]
                }
            })))
            .mount(&server)
            .await;

        let source = TwitterSource::new(Some("bearer".to_string()), 5)
            .unwrap()
            .with_base_url(&server.uri());
        let since = Utc.with_ymd_and_hms(2025, 3, 13, 0, 0, 0).unwrap();
        let mut pacer = RequestPacer::from_rpm(60_000);
        let events = source
            .fetch_brand(
                &brand(),
                since,
                100,
                &mut pacer,
                "twitter_fetcher_test",
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_id, "twitter_tweet_1764023");
        assert_eq!(event.brand_id, "wells_fargo");
        assert_eq!(event.geo_country.as_deref(), Some("United States"));
        assert_eq!(event.metadata["author_username"], "angrycustomer");
        assert_eq!(event.metadata["like_count"], 12);
    }

    #[tokio::test]
    async fn empty_result_set_yields_no_events() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tweets/search/recent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "meta": { "result_count": 0 }
            })))
            .mount(&server)
            .await;

        let source = TwitterSource::new(Some("bearer".to_string()), 5)
            .unwrap()
            .with_base_url(&server.uri());
        let mut pacer = RequestPacer::from_rpm(60_000);
        let events = source
            .fetch_brand(
                &brand(),
                Utc::now(),
                100,
                &mut pacer,
                "twitter_fetcher_test",
                Utc::now(),
            )
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn consecutive_brand_fetches_go_through_the_pacer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tweets/search/recent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "meta": { "result_count": 0 }
            })))
            .expect(2)
            .mount(&server)
            .await;

        let source = TwitterSource::new(Some("bearer".to_string()), 5)
            .unwrap()
            .with_base_url(&server.uri());
        let mut pacer = RequestPacer::from_rpm(60_000);
        for _ in 0..2 {
            source
                .fetch_brand(
                    &brand(),
                    Utc::now(),
                    100,
                    &mut pacer,
                    "twitter_fetcher_test",
                    Utc::now(),
                )
                .await
                .unwrap();
        }
        assert_eq!(pacer.requests_made(), 2);
    }

    #[tokio::test]
    async fn rate_limit_status_maps_to_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let source = TwitterSource::new(Some("bearer".to_string()), 5)
            .unwrap()
            .with_base_url(&server.uri());
        let mut pacer = RequestPacer::from_rpm(60_000);
        let err = source
            .fetch_brand(
                &brand(),
                Utc::now(),
                100,
                &mut pacer,
                "twitter_fetcher_test",
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
