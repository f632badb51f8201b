use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result, models::ContextRecord};

#[derive(Debug, Clone, Copy)]
pub struct ContextQuery<'a> {
	/// When set, records of this session plus records shared across sessions.
	pub session_id: Option<&'a str>,
	pub since: OffsetDateTime,
	pub confidence_floor: f32,
	pub limit: i64,
}

/// Most recent records first.
pub async fn recent_records(pool: &PgPool, query: ContextQuery<'_>) -> Result<Vec<ContextRecord>> {
	if query.limit <= 0 {
		return Ok(vec![]);
	}

	let rows = sqlx::query_as::<_, ContextRecord>(
		"\
SELECT record_id, session_id, content, confidence, metadata, recorded_at
FROM context_records
WHERE recorded_at >= $1
	AND confidence >= $2
	AND ($3::text IS NULL OR session_id = $3 OR session_id IS NULL)
ORDER BY recorded_at DESC, record_id
LIMIT $4",
	)
	.bind(query.since)
	.bind(query.confidence_floor)
	.bind(query.session_id)
	.bind(query.limit)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}

pub async fn insert_record(
	pool: &PgPool,
	session_id: Option<&str>,
	content: &str,
	confidence: f32,
	metadata: &Value,
	recorded_at: OffsetDateTime,
) -> Result<Uuid> {
	if !(0.0..=1.0).contains(&confidence) {
		return Err(Error::InvalidArgument(format!(
			"Context confidence must be within [0, 1]; got {confidence}."
		)));
	}

	let record_id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO context_records (record_id, session_id, content, confidence, metadata, recorded_at)
VALUES ($1, $2, $3, $4, $5, $6)",
	)
	.bind(record_id)
	.bind(session_id)
	.bind(content)
	.bind(confidence)
	.bind(metadata)
	.bind(recorded_at)
	.execute(pool)
	.await?;

	Ok(record_id)
}
