use serde_json::Value;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use datalive_domain::{Candidate, CandidateMetadata, SourceTag, window};
use datalive_storage::context::{self, ContextQuery};

use crate::{AdapterQuery, BoxFuture, Result, RetrievalAdapter};

/// Time-windowed structured records. The window comes from time words in the query; the
/// record's own confidence becomes the raw score.
pub struct ContextAdapter {
	pool: PgPool,
	default_window_days: u32,
	limit: u32,
	confidence_floor: f32,
}
impl ContextAdapter {
	pub fn new(pool: PgPool, cfg: &datalive_config::Retrieval) -> Self {
		Self {
			pool,
			default_window_days: cfg.context_default_window_days,
			limit: cfg.context_limit,
			confidence_floor: cfg.context_confidence_floor,
		}
	}

	async fn fetch_records(&self, query: &AdapterQuery) -> Result<Vec<Candidate>> {
		let days = window::resolve_window_days(&query.tokens, self.default_window_days);
		let since = OffsetDateTime::now_utc() - Duration::days(i64::from(days));
		let rows = context::recent_records(
			&self.pool,
			ContextQuery {
				session_id: query.session_id.as_deref(),
				since,
				confidence_floor: self.confidence_floor,
				limit: i64::from(self.limit),
			},
		)
		.await?;

		Ok(rows
			.into_iter()
			.map(|row| {
				let extra = match row.metadata {
					Value::Object(map) => map,
					_ => Default::default(),
				};

				Candidate {
					source: SourceTag::Context,
					text: row.content,
					raw_score: row.confidence,
					metadata: CandidateMetadata {
						timestamp: Some(row.recorded_at),
						extra,
						..Default::default()
					},
				}
			})
			.collect())
	}
}
impl RetrievalAdapter for ContextAdapter {
	fn source(&self) -> SourceTag {
		SourceTag::Context
	}

	fn fetch<'a>(&'a self, query: &'a AdapterQuery) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(self.fetch_records(query))
	}
}
