use axum::{
	Json, Router,
	extract::{
		Query, State,
		rejection::{JsonRejection, QueryRejection},
	},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::state::AppState;
use datalive_domain::TtlClass;
use datalive_service::{
	CacheStats, Error as ServiceError, QueryRequest, QueryResponse, SearchResponse, StatusReport,
};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/status", get(status))
		.route("/query", post(query))
		.route("/search", post(search))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/cache/stats", get(cache_stats))
		.route("/v1/admin/cache/invalidate", post(invalidate_cache))
		.with_state(state)
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
	success: bool,
	data: T,
}
impl<T> Envelope<T> {
	fn ok(data: T) -> Json<Self> {
		Json(Self { success: true, data })
	}
}

/// `?ttl_class=temporal` narrows invalidation to one class; no parameter clears everything.
#[derive(Debug, Deserialize)]
struct InvalidateParams {
	#[serde(default)]
	ttl_class: Option<TtlClass>,
}

#[derive(Debug, Serialize)]
struct InvalidateReport {
	removed: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	ttl_class: Option<TtlClass>,
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn status(State(state): State<AppState>) -> Json<Envelope<StatusReport>> {
	Envelope::ok(state.engine.status().await)
}

async fn query(
	State(state): State<AppState>,
	payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Envelope<QueryResponse>>, ApiError> {
	let Json(payload) = payload?;
	let response = state.engine.query(payload).await?;

	Ok(Envelope::ok(response))
}

async fn search(
	State(state): State<AppState>,
	payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Envelope<SearchResponse>>, ApiError> {
	let Json(payload) = payload?;
	let response = state.engine.search(payload).await?;

	Ok(Envelope::ok(response))
}

async fn cache_stats(State(state): State<AppState>) -> Json<Envelope<CacheStats>> {
	Envelope::ok(state.engine.cache_stats().await)
}

async fn invalidate_cache(
	State(state): State<AppState>,
	params: Result<Query<InvalidateParams>, QueryRejection>,
) -> Result<Json<Envelope<InvalidateReport>>, ApiError> {
	let Query(InvalidateParams { ttl_class }) = params?;
	let removed = state.engine.invalidate_cache(ttl_class).await?;

	Ok(Envelope::ok(InvalidateReport { removed, ttl_class }))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	success: bool,
	error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
	message: String,
	code: String,
	timestamp: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, code: code.into(), message: message.into() }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::Validation { code, message } =>
				Self::new(StatusCode::BAD_REQUEST, code.as_str(), message),
			ServiceError::Retrieval { message, failures } => {
				tracing::warn!(failures = failures.len(), "Every retrieval adapter failed.");

				Self::new(StatusCode::BAD_GATEWAY, "RETRIEVAL_ERROR", message)
			},
			ServiceError::Timeout { message } =>
				Self::new(StatusCode::GATEWAY_TIMEOUT, "REQUEST_TIMEOUT", message),
			other => {
				tracing::error!(error = %other, "Request failed.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal error.")
			},
		}
	}
}
impl From<JsonRejection> for ApiError {
	fn from(err: JsonRejection) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "INVALID_JSON", err.body_text())
	}
}
impl From<QueryRejection> for ApiError {
	fn from(err: QueryRejection) -> Self {
		Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMETER", err.body_text())
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let timestamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
		let body = ErrorBody {
			success: false,
			error: ErrorDetail { message: self.message, code: self.code, timestamp },
		};

		(self.status, Json(body)).into_response()
	}
}
