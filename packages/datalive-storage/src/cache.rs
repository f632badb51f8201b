use serde_json::Value;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::{
	Result,
	models::{CacheTableStats, CachedResponse},
};

/// Returns the live entry for `key` and records the hit.
pub async fn fetch(
	pool: &PgPool,
	key: &str,
	now: OffsetDateTime,
) -> Result<Option<CachedResponse>> {
	let row = sqlx::query_as::<_, CachedResponse>(
		"\
UPDATE response_cache
SET last_accessed_at = $2, hit_count = hit_count + 1
WHERE cache_key = $1 AND expires_at > $2
RETURNING cache_key, ttl_class, payload, created_at, expires_at, hit_count",
	)
	.bind(key)
	.bind(now)
	.fetch_optional(pool)
	.await?;

	Ok(row)
}

/// Inserts or overwrites the entry for `key`; a rewrite resets its hit count.
pub async fn upsert(
	pool: &PgPool,
	key: &str,
	ttl_class: &str,
	payload: &Value,
	now: OffsetDateTime,
	expires_at: OffsetDateTime,
) -> Result<()> {
	sqlx::query(
		"\
INSERT INTO response_cache
	(cache_key, ttl_class, payload, created_at, last_accessed_at, expires_at, hit_count)
VALUES ($1, $2, $3, $4, $4, $5, 0)
ON CONFLICT (cache_key) DO UPDATE SET
	ttl_class = EXCLUDED.ttl_class,
	payload = EXCLUDED.payload,
	created_at = EXCLUDED.created_at,
	last_accessed_at = EXCLUDED.last_accessed_at,
	expires_at = EXCLUDED.expires_at,
	hit_count = 0",
	)
	.bind(key)
	.bind(ttl_class)
	.bind(payload)
	.bind(now)
	.bind(expires_at)
	.execute(pool)
	.await?;

	Ok(())
}

pub async fn stats(pool: &PgPool, now: OffsetDateTime) -> Result<CacheTableStats> {
	let stats = sqlx::query_as::<_, CacheTableStats>(
		"\
SELECT
	count(*) AS entries,
	count(*) FILTER (WHERE expires_at > $1) AS live_entries
FROM response_cache",
	)
	.bind(now)
	.fetch_one(pool)
	.await?;

	Ok(stats)
}

pub async fn purge_expired(pool: &PgPool, now: OffsetDateTime) -> Result<u64> {
	let result = sqlx::query("DELETE FROM response_cache WHERE expires_at <= $1")
		.bind(now)
		.execute(pool)
		.await?;

	Ok(result.rows_affected())
}

/// Drops every entry written under one TTL class, live or not.
pub async fn clear_class(pool: &PgPool, ttl_class: &str) -> Result<u64> {
	let result = sqlx::query("DELETE FROM response_cache WHERE ttl_class = $1")
		.bind(ttl_class)
		.execute(pool)
		.await?;

	Ok(result.rows_affected())
}

pub async fn clear(pool: &PgPool) -> Result<u64> {
	let result = sqlx::query("DELETE FROM response_cache").execute(pool).await?;

	Ok(result.rows_affected())
}
