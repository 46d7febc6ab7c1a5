//! CFPB consumer-complaints source.
//!
//! One search call per run against the public complaints API, filtered to
//! the tracked institutions by company-name mapping: exact name match
//! first, then a substring fallback in either direction. Complaints for
//! unmapped companies are dropped.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;

use brandpulse_core::{BrandConfig, RawEvent};

use crate::error::IngestError;
use crate::normalize::{cfpb_event_id, make_event};

const DEFAULT_API_BASE: &str =
    "https://www.consumerfinance.gov/data-research/consumer-complaints/search/api/v1/";

#[derive(Debug)]
pub struct CfpbSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: OuterHits,
}

#[derive(Debug, Deserialize)]
struct OuterHits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_source")]
    source: Complaint,
}

#[derive(Debug, Deserialize)]
struct Complaint {
    /// The API reports ids as strings or numbers depending on endpoint
    /// version.
    #[serde(default)]
    complaint_id: Value,
    #[serde(default)]
    date_received: Option<String>,
    #[serde(default)]
    company: String,
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    issue: Option<String>,
    #[serde(default)]
    sub_issue: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    zip_code: Option<String>,
    #[serde(default)]
    submitted_via: Option<String>,
    #[serde(default)]
    company_response_to_consumer: Option<String>,
    #[serde(default)]
    timely_response: Option<String>,
    #[serde(default)]
    consumer_disputed: Option<String>,
    #[serde(default)]
    consumer_consent_provided: Option<String>,
    #[serde(default)]
    consumer_complaint_narrative: Option<String>,
}

impl CfpbSource {
    /// # Errors
    ///
    /// Fails only if the HTTP client cannot be constructed.
    pub fn new(timeout_secs: u64) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: DEFAULT_API_BASE.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Fetch complaints received since `since_date` and normalize the
    /// ones that map to a tracked brand.
    ///
    /// # Errors
    ///
    /// Propagates HTTP and deserialization failures for the single search
    /// call; there is no per-item loop to continue past them.
    pub async fn fetch(
        &self,
        brands: &[BrandConfig],
        since_date: NaiveDate,
        limit: usize,
        source_run: &str,
        ingested_at: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, IngestError> {
        let since = since_date.format("%Y-%m-%d").to_string();
        tracing::info!(since = %since, limit, "fetching CFPB complaints");

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("date_received_min", since.as_str()),
                ("size", &limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::UnexpectedStatus {
                status: status.as_u16(),
                url: self.base_url.clone(),
            });
        }
        let body = response.text().await?;
        let parsed: SearchResponse =
            serde_json::from_str(&body).map_err(|e| IngestError::Deserialize {
                context: "cfpb complaints search".to_string(),
                source: e,
            })?;

        let mut events = Vec::new();
        for hit in parsed.hits.hits {
            let complaint = hit.source;
            let Some(brand_id) = map_company(brands, &complaint.company) else {
                tracing::debug!(company = %complaint.company, "unmapped company, skipping");
                continue;
            };
            match normalize_complaint(&complaint, brand_id, source_run, ingested_at) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(company = %complaint.company, error = %e, "skipping malformed complaint");
                }
            }
        }

        tracing::info!(events = events.len(), "CFPB fetch complete");
        Ok(events)
    }
}

/// Map a CFPB-reported company name to a tracked brand id.
///
/// Exact (case-insensitive) matches against each brand's configured
/// company names win; substring containment in either direction is the
/// fallback for the API's naming drift.
#[must_use]
pub fn map_company<'a>(brands: &'a [BrandConfig], company: &str) -> Option<&'a str> {
    if company.is_empty() {
        return None;
    }
    let company_upper = company.to_uppercase();

    for brand in brands {
        for name in &brand.cfpb_companies {
            if name.to_uppercase() == company_upper {
                return Some(&brand.id);
            }
        }
    }
    for brand in brands {
        for name in &brand.cfpb_companies {
            let name_upper = name.to_uppercase();
            if company_upper.contains(&name_upper) || name_upper.contains(&company_upper) {
                return Some(&brand.id);
            }
        }
    }
    None
}

fn normalize_complaint(
    complaint: &Complaint,
    brand_id: &str,
    source_run: &str,
    ingested_at: DateTime<Utc>,
) -> Result<RawEvent, IngestError> {
    let id = value_as_string(&complaint.complaint_id).ok_or_else(|| IngestError::Shape {
        context: "cfpb complaint".to_string(),
        reason: "missing complaint_id".to_string(),
    })?;
    let date = complaint
        .date_received
        .as_deref()
        .ok_or_else(|| IngestError::Shape {
            context: format!("cfpb complaint {id}"),
            reason: "missing date_received".to_string(),
        })?;
    let ts = parse_received_date(date).ok_or_else(|| IngestError::Shape {
        context: format!("cfpb complaint {id}"),
        reason: format!("unparsable date_received '{date}'"),
    })?;

    let metadata = serde_json::json!({
        "complaint_id": id,
        "company": complaint.company,
        "product": complaint.product,
        "issue": complaint.issue,
        "sub_issue": complaint.sub_issue,
        "state": complaint.state,
        "zip_code": complaint.zip_code,
        "submitted_via": complaint.submitted_via,
        "company_response": complaint.company_response_to_consumer,
        "timely_response": complaint.timely_response,
        "consumer_disputed": complaint.consumer_disputed,
        "consumer_consent_provided": complaint.consumer_consent_provided,
    });

    Ok(make_event(
        cfpb_event_id(&id),
        ts,
        brand_id,
        "cfpb",
        Some("US".to_string()),
        build_complaint_text(complaint),
        metadata,
        ingested_at,
        source_run,
    ))
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_received_date(date: &str) -> Option<DateTime<Utc>> {
    // Dates come as YYYY-MM-DD; the event time is midnight UTC.
    let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    Some(DateTime::from_naive_utc_and_offset(
        parsed.and_hms_opt(0, 0, 0)?,
        Utc,
    ))
}

fn build_complaint_text(complaint: &Complaint) -> String {
    let mut parts = Vec::new();
    if let Some(issue) = complaint.issue.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Issue: {issue}"));
    }
    if let Some(sub_issue) = complaint.sub_issue.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Sub-issue: {sub_issue}"));
    }
    if let Some(narrative) = complaint
        .consumer_complaint_narrative
        .as_deref()
        .filter(|s| !s.is_empty())
    {
        parts.push(format!("Complaint: {narrative}"));
    }
    if let Some(product) = complaint.product.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("Product: {product}"));
    }
    if parts.is_empty() {
        format!("CFPB complaint for {}", complaint.company)
    } else {
        parts.join(" | ")
    }
}
