use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GraphEntity {
	pub entity_id: Uuid,
	pub name: String,
	pub name_norm: String,
	pub entity_type: String,
	pub properties: Value,
}

/// A relation joined with the display names of both endpoints.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GraphRelation {
	pub relation_id: Uuid,
	pub subject_id: Uuid,
	pub subject_name: String,
	pub predicate: String,
	pub object_id: Uuid,
	pub object_name: String,
	pub weight: f32,
}

#[derive(Debug, Clone)]
pub struct TraversedRelation {
	pub relation: GraphRelation,
	pub depth: u32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ContextRecord {
	pub record_id: Uuid,
	pub session_id: Option<String>,
	pub content: String,
	pub confidence: f32,
	pub metadata: Value,
	pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CachedResponse {
	pub cache_key: String,
	pub ttl_class: String,
	pub payload: Value,
	pub created_at: OffsetDateTime,
	pub expires_at: OffsetDateTime,
	pub hit_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct CacheTableStats {
	pub entries: i64,
	pub live_entries: i64,
}
