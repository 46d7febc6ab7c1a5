use axum::{
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use brandpulse_ingest::{FetchParams, IngestError, IngestSummary, Pipeline, Source};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
}

/// Error envelope for every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub status: &'static str,
    pub message: String,
    #[serde(skip)]
    pub code: StatusCode,
}

impl ApiError {
    fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let code = self.code;
        (code, Json(self)).into_response()
    }
}

impl From<IngestError> for ApiError {
    fn from(error: IngestError) -> Self {
        let code = match &error {
            IngestError::UnknownSource(_) => StatusCode::BAD_REQUEST,
            IngestError::MissingCredentials { .. } => StatusCode::PRECONDITION_FAILED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::error!(error = %error, transient = error.is_transient(), "ingest run failed");
        ApiError::new(code, error.to_string())
    }
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    database: &'static str,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
}

/// Row shapes returned by the audit endpoints.
#[derive(Debug, Serialize)]
pub struct RunItem {
    pub public_id: String,
    pub source: String,
    pub trigger_source: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_emitted: i32,
    pub files_written: i32,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StateItem {
    pub source: String,
    pub cursor_iso: Option<String>,
    pub tie_breaker_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

fn normalize_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(50).clamp(1, 200)
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/fetch/{source}", post(trigger_fetch))
        .route("/api/v1/runs", get(list_runs))
        .route("/api/v1/state/{source}", get(list_state))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors()),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match brandpulse_db::ping(state.pipeline.pool()).await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthData {
                status: "ok",
                database: "ok",
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "health check: database unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthData {
                    status: "degraded",
                    database: "unavailable",
                }),
            )
        }
    }
}

/// Run one fetch for the source in the path. The body is an optional
/// JSON parameter object; an empty body means all defaults.
async fn trigger_fetch(
    State(state): State<AppState>,
    Path(source): Path<String>,
    body: Option<Json<FetchParams>>,
) -> Result<Json<IngestSummary>, ApiError> {
    let source: Source = source.parse()?;
    let params = body.map(|Json(p)| p).unwrap_or_default();
    let summary = state.pipeline.run(source, "api", params).await?;
    Ok(Json(summary))
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RunItem>>, ApiError> {
    let limit = normalize_limit(query.limit);
    let rows = brandpulse_db::ingest_runs::list_ingest_runs(state.pipeline.pool(), limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "listing ingest runs failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "database query failed")
        })?;
    let items = rows
        .into_iter()
        .map(|r| RunItem {
            public_id: r.public_id.to_string(),
            source: r.source,
            trigger_source: r.trigger_source,
            status: r.status,
            started_at: r.started_at,
            completed_at: r.completed_at,
            records_emitted: r.records_emitted,
            files_written: r.files_written,
            error_message: r.error_message,
        })
        .collect();
    Ok(Json(items))
}

/// Cursor history for one source key, newest first. The key is the raw
/// state key, e.g. `reddit_wallstreetbets`.
async fn list_state(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<StateItem>>, ApiError> {
    let limit = normalize_limit(query.limit);
    let rows = brandpulse_db::cursor::list_states(state.pipeline.pool(), &source, limit)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "listing cursor state failed");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "database query failed")
        })?;
    let items = rows
        .into_iter()
        .map(|r| StateItem {
            source: r.source,
            cursor_iso: r.cursor_iso,
            tie_breaker_id: r.tie_breaker_id,
            updated_at: r.updated_at,
        })
        .collect();
    Ok(Json(items))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_limit_applies_defaults_and_bounds() {
        assert_eq!(normalize_limit(None), 50);
        assert_eq!(normalize_limit(Some(0)), 1);
        assert_eq!(normalize_limit(Some(1_000)), 200);
        assert_eq!(normalize_limit(Some(25)), 25);
    }

    #[test]
    fn api_error_serializes_contract_shape() {
        let err = ApiError::new(StatusCode::BAD_REQUEST, "unknown source: myspace");
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["status"], "error");
        assert_eq!(json["message"], "unknown source: myspace");
        assert!(json.get("code").is_none(), "status code must not leak into the body");
    }

    #[test]
    fn unknown_source_maps_to_bad_request() {
        let err: ApiError = IngestError::UnknownSource("myspace".to_string()).into();
        assert_eq!(err.code, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn missing_credentials_maps_to_precondition_failed() {
        let err: ApiError = IngestError::MissingCredentials {
            api: "reddit".to_string(),
            var: "REDDIT_CLIENT_ID".to_string(),
        }
        .into();
        assert_eq!(err.code, StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn run_item_is_serializable() {
        let item = RunItem {
            public_id: "b4a1c9e2-0000-0000-0000-000000000000".to_string(),
            source: "cfpb".to_string(),
            trigger_source: "api".to_string(),
            status: "completed".to_string(),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
            records_emitted: 12,
            files_written: 2,
            error_message: None,
        };
        let json = serde_json::to_value(&item).expect("serialize RunItem");
        assert_eq!(json["source"], "cfpb");
        assert_eq!(json["records_emitted"], 12);
        assert!(json["error_message"].is_null());
    }
}
