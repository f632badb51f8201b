use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use datalive_domain::Strategy;

use crate::{Error, Result, ValidationCode};

/// Inbound ask as it arrives on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
	pub query: String,
	#[serde(default)]
	pub strategy: Option<String>,
	#[serde(default)]
	pub max_results: Option<i64>,
	#[serde(default)]
	pub filters: Option<Map<String, Value>>,
	#[serde(default)]
	pub session_id: Option<String>,
	#[serde(default)]
	pub enable_reranking: Option<bool>,
	#[serde(default)]
	pub confidence_threshold: Option<f64>,
	#[serde(default)]
	pub use_cache: Option<bool>,
}
impl QueryRequest {
	pub fn new(query: impl Into<String>) -> Self {
		Self { query: query.into(), ..Default::default() }
	}

	/// Rejects what cannot be served and clamps numeric knobs into their allowed ranges.
	pub fn validate(&self, cfg: &datalive_config::Query) -> Result<ValidatedQuery> {
		let query = self.query.trim();

		if query.is_empty() {
			return Err(Error::validation(ValidationCode::EmptyQuery, "Query must not be empty."));
		}

		let chars = query.chars().count();

		if chars > cfg.max_query_chars as usize {
			return Err(Error::validation(
				ValidationCode::QueryTooLong,
				format!("Query has {chars} characters; the limit is {}.", cfg.max_query_chars),
			));
		}

		let strategy_override = match self.strategy.as_deref() {
			Some(raw) if !raw.trim().is_empty() => Strategy::parse_override(raw)?,
			_ => None,
		};
		let max_results = self
			.max_results
			.unwrap_or(i64::from(cfg.default_max_results))
			.clamp(1, i64::from(cfg.max_results_limit)) as usize;
		let confidence_threshold = match self.confidence_threshold {
			Some(value) if !value.is_finite() => {
				return Err(Error::validation(
					ValidationCode::InvalidParameter,
					"confidence_threshold must be a finite number.",
				));
			},
			Some(value) => (value as f32).clamp(cfg.min_confidence_threshold, 1.0),
			None => cfg.default_confidence_threshold,
		};
		let session_id = self
			.session_id
			.as_deref()
			.map(str::trim)
			.filter(|session| !session.is_empty())
			.map(str::to_string);

		Ok(ValidatedQuery {
			query: query.to_string(),
			strategy_override,
			max_results,
			filters: self.filters.clone().unwrap_or_default(),
			session_id,
			enable_reranking: self.enable_reranking.unwrap_or(true),
			confidence_threshold,
			use_cache: self.use_cache.unwrap_or(true),
		})
	}
}

/// A request that passed validation; immutable from here on.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
	pub query: String,
	pub strategy_override: Option<Strategy>,
	pub max_results: usize,
	pub filters: Map<String, Value>,
	pub session_id: Option<String>,
	pub enable_reranking: bool,
	pub confidence_threshold: f32,
	/// `false` skips the cache read, the write and request coalescing.
	pub use_cache: bool,
}
