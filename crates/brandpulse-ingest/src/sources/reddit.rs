//! Reddit source: OAuth client-credentials auth, per-subreddit alias
//! search with bounded pagination, and top-level comment scanning.
//!
//! This is the one source driven by the cursor state machine: the caller
//! resolves a poll window per subreddit, this adapter scans it, runs the
//! term matcher on every candidate text, and reports observed event times
//! back through the watermark tracker.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use brandpulse_core::{matcher, BrandConfig, RawEvent};

use crate::error::IngestError;
use crate::normalize::{make_event, reddit_comment_event_id, reddit_post_event_id};
use crate::pacing::RequestPacer;
use crate::poller::{PollWindow, WatermarkTracker};

const DEFAULT_TOKEN_BASE: &str = "https://www.reddit.com";
const DEFAULT_API_BASE: &str = "https://oauth.reddit.com";
/// Top-level comments scanned per post.
const COMMENTS_PER_POST: usize = 10;
/// Reddit caps listing pages at 100 items.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug)]
pub struct RedditSource {
    client: reqwest::Client,
    token_base: String,
    api_base: String,
    client_id: String,
    client_secret: String,
    user_agent: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    children: Vec<Child>,
    #[serde(default)]
    after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Child {
    kind: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct Submission {
    id: String,
    title: String,
    #[serde(default)]
    selftext: String,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    #[serde(default)]
    num_comments: i64,
    #[serde(default)]
    upvote_ratio: Option<f64>,
    #[serde(default)]
    url: Option<String>,
    permalink: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    edited: Value,
}

#[derive(Debug, Deserialize)]
struct Comment {
    id: String,
    body: String,
    created_utc: f64,
    #[serde(default)]
    score: i64,
    permalink: String,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    edited: Value,
}

impl RedditSource {
    /// # Errors
    ///
    /// Returns [`IngestError::MissingCredentials`] when client id or
    /// secret is absent; a Reddit run cannot proceed without them.
    pub fn new(
        client_id: Option<String>,
        client_secret: Option<String>,
        user_agent: String,
        timeout_secs: u64,
    ) -> Result<Self, IngestError> {
        let client_id = client_id.ok_or_else(|| IngestError::MissingCredentials {
            api: "reddit".to_string(),
            var: "REDDIT_CLIENT_ID".to_string(),
        })?;
        let client_secret = client_secret.ok_or_else(|| IngestError::MissingCredentials {
            api: "reddit".to_string(),
            var: "REDDIT_CLIENT_SECRET".to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            token_base: DEFAULT_TOKEN_BASE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            client_id,
            client_secret,
            user_agent,
        })
    }

    /// Point both endpoints at a test server.
    #[must_use]
    pub fn with_endpoints(mut self, token_base: &str, api_base: &str) -> Self {
        self.token_base = token_base.to_string();
        self.api_base = api_base.to_string();
        self
    }

    /// Exchange client credentials for a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Auth`] on a non-success token response.
    pub async fn authenticate(&self) -> Result<String, IngestError> {
        let url = format!("{}/api/v1/access_token", self.token_base);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Auth {
                api: "reddit".to_string(),
                reason: format!("token endpoint returned {status}"),
            });
        }
        let token: TokenResponse = response.json().await?;
        Ok(token.access_token)
    }

    /// Scan one subreddit for brand mentions inside the poll window.
    ///
    /// Per-term failures are logged and skipped; the scan keeps going.
    /// Every accepted post and comment is reported to `tracker`.
    #[allow(clippy::too_many_arguments)]
    pub async fn fetch_subreddit(
        &self,
        token: &str,
        subreddit: &str,
        brands: &[BrandConfig],
        window: &PollWindow,
        pacer: &mut RequestPacer,
        tracker: &mut WatermarkTracker,
        source_run: &str,
        ingested_at: DateTime<Utc>,
    ) -> Vec<RawEvent> {
        let mut events = Vec::new();
        let mut seen_posts: HashSet<String> = HashSet::new();

        for brand in brands {
            for term in &brand.aliases {
                let scan = ScanTerm {
                    token,
                    subreddit,
                    term,
                    brands,
                    window,
                    source_run,
                    ingested_at,
                };
                scan.run(self, pacer, tracker, &mut seen_posts, &mut events)
                    .await;
            }
        }

        tracing::info!(subreddit, events = events.len(), "subreddit scan complete");
        events
    }

    async fn search(
        &self,
        token: &str,
        subreddit: &str,
        term: &str,
        limit: usize,
        after: Option<&str>,
    ) -> Result<Listing, IngestError> {
        let url = format!("{}/r/{subreddit}/search", self.api_base);
        let limit = limit.to_string();
        let mut params = vec![
            ("q", format!("\"{term}\"")),
            ("restrict_sr", "1".to_string()),
            ("sort", "new".to_string()),
            ("t", "all".to_string()),
            ("limit", limit),
            ("raw_json", "1".to_string()),
        ];
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&params)
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
        serde_json::from_str(&body).map_err(|e| IngestError::Deserialize {
            context: format!("reddit search r/{subreddit}"),
            source: e,
        })
    }

    /// Top-level comments for one post. The response is a two-element
    /// array: the post listing, then the comment listing.
    async fn comments(
        &self,
        token: &str,
        subreddit: &str,
        article: &str,
    ) -> Result<Vec<Comment>, IngestError> {
        let url = format!("{}/r/{subreddit}/comments/{article}", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .query(&[("limit", "100"), ("depth", "1"), ("raw_json", "1")])
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
        let listings: Vec<Listing> =
            serde_json::from_str(&body).map_err(|e| IngestError::Deserialize {
                context: format!("reddit comments {article}"),
                source: e,
            })?;
        let Some(comment_listing) = listings.into_iter().nth(1) else {
            return Ok(Vec::new());
        };

        let mut comments = Vec::new();
        for child in comment_listing.data.children {
            if child.kind != "t1" {
                continue;
            }
            match serde_json::from_value::<Comment>(child.data) {
                Ok(comment) => comments.push(comment),
                Err(e) => {
                    tracing::warn!(article, error = %e, "skipping malformed comment");
                }
            }
        }
        Ok(comments)
    }
}

/// Borrowed context for scanning one alias term in one subreddit.
struct ScanTerm<'a> {
    token: &'a str,
    subreddit: &'a str,
    term: &'a str,
    brands: &'a [BrandConfig],
    window: &'a PollWindow,
    source_run: &'a str,
    ingested_at: DateTime<Utc>,
}

impl ScanTerm<'_> {
    async fn run(
        self,
        source: &RedditSource,
        pacer: &mut RequestPacer,
        tracker: &mut WatermarkTracker,
        seen_posts: &mut HashSet<String>,
        events: &mut Vec<RawEvent>,
    ) {
        let mut after: Option<String> = None;
        let mut fetched = 0usize;

        while fetched < self.window.page_limit {
            let page_size = (self.window.page_limit - fetched).min(MAX_PAGE_SIZE);
            pacer.pace().await;
            let listing = match source
                .search(self.token, self.subreddit, self.term, page_size, after.as_deref())
                .await
            {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::error!(
                        subreddit = self.subreddit,
                        term = self.term,
                        transient = e.is_transient(),
                        error = %e,
                        "subreddit search failed, skipping term"
                    );
                    return;
                }
            };
            if listing.data.children.is_empty() {
                return;
            }
            fetched += listing.data.children.len();

            for child in &listing.data.children {
                if child.kind != "t3" {
                    continue;
                }
                let submission: Submission = match serde_json::from_value(child.data.clone()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(subreddit = self.subreddit, error = %e, "skipping malformed submission");
                        continue;
                    }
                };
                self.process_submission(source, submission, pacer, tracker, seen_posts, events)
                    .await;
            }

            after = listing.data.after;
            if after.is_none() {
                return;
            }
        }
    }

    async fn process_submission(
        &self,
        source: &RedditSource,
        submission: Submission,
        pacer: &mut RequestPacer,
        tracker: &mut WatermarkTracker,
        seen_posts: &mut HashSet<String>,
        events: &mut Vec<RawEvent>,
    ) {
        let Some(ts) = event_time(submission.created_utc) else {
            return;
        };
        if ts < self.window.since {
            return;
        }
        if !seen_posts.insert(submission.id.clone()) {
            return;
        }

        let text = format!("{}\n\n{}", submission.title, submission.selftext)
            .trim()
            .to_string();
        let result = matcher::score(&text, self.brands);
        if result.is_detection() {
            if let Some(brand_id) = result.brand_id.clone() {
                tracker.observe(ts, &submission.id);
                events.push(normalize_submission(
                    &submission,
                    ts,
                    &brand_id,
                    self.subreddit,
                    text,
                    self.ingested_at,
                    self.source_run,
                ));
            }
        }

        pacer.pace().await;
        match source.comments(self.token, self.subreddit, &submission.id).await {
            Ok(comments) => {
                for comment in comments.into_iter().take(COMMENTS_PER_POST) {
                    let Some(comment_ts) = event_time(comment.created_utc) else {
                        continue;
                    };
                    if comment_ts < self.window.since {
                        continue;
                    }
                    let comment_match = matcher::score(&comment.body, self.brands);
                    if comment_match.is_detection() {
                        if let Some(brand_id) = comment_match.brand_id {
                            tracker.observe(comment_ts, &comment.id);
                            events.push(normalize_comment(
                                &comment,
                                comment_ts,
                                &brand_id,
                                self.subreddit,
                                self.ingested_at,
                                self.source_run,
                            ));
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    post_id = submission.id,
                    transient = e.is_transient(),
                    error = %e,
                    "comment fetch failed, continuing"
                );
            }
        }
    }
}

fn event_time(created_utc: f64) -> Option<DateTime<Utc>> {
    #[allow(clippy::cast_possible_truncation)]
    DateTime::from_timestamp(created_utc as i64, 0)
}

/// Reddit reports `edited` as either `false` or an edit timestamp.
fn edited_flag(edited: &Value) -> bool {
    !matches!(edited, Value::Bool(false) | Value::Null)
}

fn normalize_submission(
    submission: &Submission,
    ts: DateTime<Utc>,
    brand_id: &str,
    subreddit: &str,
    text: String,
    ingested_at: DateTime<Utc>,
    source_run: &str,
) -> RawEvent {
    let metadata = serde_json::json!({
        "reddit_id": submission.id,
        "reddit_type": "post",
        "subreddit": subreddit,
        "author": submission.author.as_deref().unwrap_or("[deleted]"),
        "title": submission.title,
        "score": submission.score,
        "num_comments": submission.num_comments,
        "upvote_ratio": submission.upvote_ratio,
        "url": submission.url,
        "permalink": format!("https://reddit.com{}", submission.permalink),
        "edited": edited_flag(&submission.edited),
    });
    make_event(
        reddit_post_event_id(&submission.id),
        ts,
        brand_id,
        "reddit",
        None,
        text,
        metadata,
        ingested_at,
        source_run,
    )
}

fn normalize_comment(
    comment: &Comment,
    ts: DateTime<Utc>,
    brand_id: &str,
    subreddit: &str,
    ingested_at: DateTime<Utc>,
    source_run: &str,
) -> RawEvent {
    let metadata = serde_json::json!({
        "reddit_id": comment.id,
        "reddit_type": "comment",
        "subreddit": subreddit,
        "author": comment.author.as_deref().unwrap_or("[deleted]"),
        "score": comment.score,
        "permalink": format!("https://reddit.com{}", comment.permalink),
        "parent_id": comment.parent_id,
        "edited": edited_flag(&comment.edited),
    });
    make_event(
        reddit_comment_event_id(&comment.id),
        ts,
        brand_id,
        "reddit",
        None,
        comment.body.trim().to_string(),
        metadata,
        ingested_at,
        source_run,
    )
}
