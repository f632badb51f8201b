use std::{
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
	time::{Duration, Instant},
};

use moka::{Expiry, sync::Cache};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::PgPool;
use time::OffsetDateTime;

use datalive_domain::{Strategy, TtlClass, TtlTable};

use crate::{BoxFuture, Error, Result, SourceItem, cache_key_prefix};

const CACHE_KIND: &str = "response";
const CACHE_SCHEMA_VERSION: u32 = 2;

/// A memoized response. The TTL class is fixed when the entry is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
	pub answer: String,
	pub strategy_used: Strategy,
	pub sources: Vec<SourceItem>,
	pub average_confidence: f32,
	pub degraded: bool,
	pub ttl_class: TtlClass,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
	pub enabled: bool,
	pub backend: Option<&'static str>,
	pub entries: Option<u64>,
	pub hits: u64,
	pub misses: u64,
	pub writes: u64,
	pub errors: u64,
}

pub trait CacheStore
where
	Self: Send + Sync,
{
	fn backend(&self) -> &'static str;

	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>>>;

	fn put<'a>(
		&'a self,
		key: &'a str,
		entry: &'a CacheEntry,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>>;

	fn len(&self) -> BoxFuture<'_, Result<u64>>;

	/// Drops every entry of `ttl_class`, or all entries for `None`, and returns how many went.
	fn invalidate(&self, ttl_class: Option<TtlClass>) -> BoxFuture<'_, Result<u64>>;

	/// Reclaims entries whose TTL has passed.
	fn purge_expired(&self) -> BoxFuture<'_, Result<u64>>;
}

#[derive(Clone)]
struct MemoryEntry {
	entry: Arc<CacheEntry>,
	ttl: Duration,
}

struct PerEntryTtl;
impl Expiry<String, MemoryEntry> for PerEntryTtl {
	fn expire_after_create(
		&self,
		_key: &String,
		value: &MemoryEntry,
		_created_at: Instant,
	) -> Option<Duration> {
		Some(value.ttl)
	}

	fn expire_after_update(
		&self,
		_key: &String,
		value: &MemoryEntry,
		_updated_at: Instant,
		_duration_until_expiry: Option<Duration>,
	) -> Option<Duration> {
		Some(value.ttl)
	}
}

/// In-process moka cache. Each entry expires after its own TTL class duration.
pub struct MemoryCacheStore {
	cache: Cache<String, MemoryEntry>,
}
impl MemoryCacheStore {
	pub fn new(max_entries: u64) -> Self {
		let cache = Cache::builder().max_capacity(max_entries).expire_after(PerEntryTtl).build();

		Self { cache }
	}
}
impl CacheStore for MemoryCacheStore {
	fn backend(&self) -> &'static str {
		"memory"
	}

	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>>> {
		let hit = self.cache.get(key).map(|value| value.entry.as_ref().clone());

		Box::pin(async move { Ok(hit) })
	}

	fn put<'a>(
		&'a self,
		key: &'a str,
		entry: &'a CacheEntry,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>> {
		self.cache.insert(key.to_string(), MemoryEntry { entry: Arc::new(entry.clone()), ttl });

		Box::pin(async { Ok(()) })
	}

	fn len(&self) -> BoxFuture<'_, Result<u64>> {
		self.cache.run_pending_tasks();

		let len = self.cache.entry_count();

		Box::pin(async move { Ok(len) })
	}

	fn invalidate(&self, ttl_class: Option<TtlClass>) -> BoxFuture<'_, Result<u64>> {
		self.cache.run_pending_tasks();

		let removed = match ttl_class {
			None => {
				let removed = self.cache.entry_count();

				self.cache.invalidate_all();

				removed
			},
			Some(class) => {
				let keys: Vec<Arc<String>> = self
					.cache
					.iter()
					.filter(|(_, value)| value.entry.ttl_class == class)
					.map(|(key, _)| key)
					.collect();

				for key in &keys {
					self.cache.invalidate(key.as_str());
				}

				keys.len() as u64
			},
		};

		self.cache.run_pending_tasks();

		Box::pin(async move { Ok(removed) })
	}

	// moka already hides expired entries; this only forces the eviction bookkeeping. The count
	// is approximate.
	fn purge_expired(&self) -> BoxFuture<'_, Result<u64>> {
		let before = self.cache.entry_count();

		self.cache.run_pending_tasks();

		let removed = before.saturating_sub(self.cache.entry_count());

		Box::pin(async move { Ok(removed) })
	}
}

/// Shared cache in the `response_cache` table, for deployments running several API replicas.
pub struct PgCacheStore {
	pool: PgPool,
}
impl PgCacheStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn fetch(&self, key: &str) -> Result<Option<CacheEntry>> {
		let Some(row) =
			datalive_storage::cache::fetch(&self.pool, key, OffsetDateTime::now_utc()).await?
		else {
			return Ok(None);
		};
		let entry = serde_json::from_value(row.payload).map_err(|err| Error::Cache {
			message: format!("Failed to decode cache payload: {err}"),
		})?;

		Ok(Some(entry))
	}

	async fn store(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<()> {
		let payload = serde_json::to_value(entry).map_err(|err| Error::Cache {
			message: format!("Failed to encode cache payload: {err}"),
		})?;
		let now = OffsetDateTime::now_utc();

		datalive_storage::cache::upsert(
			&self.pool,
			key,
			entry.ttl_class.as_str(),
			&payload,
			now,
			now + ttl,
		)
		.await?;

		Ok(())
	}

	async fn count_live(&self) -> Result<u64> {
		let stats = datalive_storage::cache::stats(&self.pool, OffsetDateTime::now_utc()).await?;

		Ok(stats.live_entries.max(0) as u64)
	}

	async fn remove(&self, ttl_class: Option<TtlClass>) -> Result<u64> {
		let removed = match ttl_class {
			Some(class) => datalive_storage::cache::clear_class(&self.pool, class.as_str()).await?,
			None => datalive_storage::cache::clear(&self.pool).await?,
		};

		Ok(removed)
	}

	async fn purge(&self) -> Result<u64> {
		Ok(datalive_storage::cache::purge_expired(&self.pool, OffsetDateTime::now_utc()).await?)
	}
}
impl CacheStore for PgCacheStore {
	fn backend(&self) -> &'static str {
		"postgres"
	}

	fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<CacheEntry>>> {
		Box::pin(self.fetch(key))
	}

	fn put<'a>(
		&'a self,
		key: &'a str,
		entry: &'a CacheEntry,
		ttl: Duration,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(self.store(key, entry, ttl))
	}

	fn len(&self) -> BoxFuture<'_, Result<u64>> {
		Box::pin(self.count_live())
	}

	fn invalidate(&self, ttl_class: Option<TtlClass>) -> BoxFuture<'_, Result<u64>> {
		Box::pin(self.remove(ttl_class))
	}

	fn purge_expired(&self) -> BoxFuture<'_, Result<u64>> {
		Box::pin(self.purge())
	}
}

/// Read-through/write-through gate in front of retrieval. Store failures are logged and
/// bypassed; callers only ever see a miss.
pub struct CacheManager {
	store: Option<Arc<dyn CacheStore>>,
	ttl: TtlTable,
	hits: AtomicU64,
	misses: AtomicU64,
	writes: AtomicU64,
	errors: AtomicU64,
}
impl CacheManager {
	pub fn new(store: Option<Arc<dyn CacheStore>>, ttl: TtlTable) -> Self {
		Self {
			store,
			ttl,
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
			writes: AtomicU64::new(0),
			errors: AtomicU64::new(0),
		}
	}

	pub fn enabled(&self) -> bool {
		self.store.is_some()
	}

	pub async fn get(&self, key: &str) -> Option<CacheEntry> {
		let store = self.store.as_ref()?;

		match store.get(key).await {
			Ok(Some(entry)) => {
				self.hits.fetch_add(1, Ordering::Relaxed);
				tracing::info!(
					cache_kind = CACHE_KIND,
					cache_key_prefix = cache_key_prefix(key),
					hit = true,
					ttl_class = entry.ttl_class.as_str(),
					"Cache hit."
				);

				Some(entry)
			},
			Ok(None) => {
				self.misses.fetch_add(1, Ordering::Relaxed);
				tracing::info!(
					cache_kind = CACHE_KIND,
					cache_key_prefix = cache_key_prefix(key),
					hit = false,
					"Cache miss."
				);

				None
			},
			Err(err) => {
				self.errors.fetch_add(1, Ordering::Relaxed);
				tracing::warn!(
					error = %err,
					cache_kind = CACHE_KIND,
					cache_key_prefix = cache_key_prefix(key),
					"Cache read failed; bypassing cache."
				);

				None
			},
		}
	}

	/// Second look taken by the computation that won a key, in case a request that finished
	/// just before it already stored the answer. Only hits are counted.
	pub async fn recheck(&self, key: &str) -> Option<CacheEntry> {
		let store = self.store.as_ref()?;

		match store.get(key).await {
			Ok(Some(entry)) => {
				self.hits.fetch_add(1, Ordering::Relaxed);
				tracing::info!(
					cache_kind = CACHE_KIND,
					cache_key_prefix = cache_key_prefix(key),
					hit = true,
					recheck = true,
					ttl_class = entry.ttl_class.as_str(),
					"Cache hit."
				);

				Some(entry)
			},
			Ok(None) => None,
			Err(err) => {
				tracing::debug!(
					error = %err,
					cache_kind = CACHE_KIND,
					cache_key_prefix = cache_key_prefix(key),
					"Cache recheck failed."
				);

				None
			},
		}
	}

	pub async fn put(&self, key: &str, entry: &CacheEntry) {
		let Some(store) = self.store.as_ref() else {
			return;
		};
		let ttl = self.ttl.duration(entry.ttl_class);

		match store.put(key, entry, ttl).await {
			Ok(()) => {
				self.writes.fetch_add(1, Ordering::Relaxed);
				tracing::info!(
					cache_kind = CACHE_KIND,
					cache_key_prefix = cache_key_prefix(key),
					ttl_class = entry.ttl_class.as_str(),
					ttl_secs = ttl.as_secs(),
					"Cache stored."
				);
			},
			Err(err) => {
				self.errors.fetch_add(1, Ordering::Relaxed);
				tracing::warn!(
					error = %err,
					cache_kind = CACHE_KIND,
					cache_key_prefix = cache_key_prefix(key),
					"Cache write failed."
				);
			},
		}
	}

	pub async fn stats(&self) -> CacheStats {
		let (backend, entries) = match self.store.as_ref() {
			Some(store) => {
				let entries = match store.len().await {
					Ok(len) => Some(len),
					Err(err) => {
						tracing::warn!(error = %err, cache_kind = CACHE_KIND, "Cache size failed.");

						None
					},
				};

				(Some(store.backend()), entries)
			},
			None => (None, None),
		};

		CacheStats {
			enabled: self.enabled(),
			backend,
			entries,
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			writes: self.writes.load(Ordering::Relaxed),
			errors: self.errors.load(Ordering::Relaxed),
		}
	}

	/// Drops one TTL class, or everything for `None`.
	pub async fn invalidate(&self, ttl_class: Option<TtlClass>) -> Result<u64> {
		let Some(store) = self.store.as_ref() else {
			return Ok(0);
		};
		let removed = store.invalidate(ttl_class).await?;

		tracing::info!(
			cache_kind = CACHE_KIND,
			ttl_class = ttl_class.map(TtlClass::as_str).unwrap_or("all"),
			removed,
			"Cache invalidated."
		);

		Ok(removed)
	}

	pub async fn purge_expired(&self) -> Result<u64> {
		let Some(store) = self.store.as_ref() else {
			return Ok(0);
		};
		let removed = store.purge_expired().await?;

		tracing::debug!(cache_kind = CACHE_KIND, removed, "Expired cache entries purged.");

		Ok(removed)
	}
}

/// Everything that changes a response. The session only participates for session-scoped
/// (personal) entries.
#[derive(Debug, Clone, Copy)]
pub struct ResponseKey<'a> {
	pub normalized_query: &'a str,
	pub strategy: Strategy,
	pub filters: &'a Map<String, Value>,
	pub session_id: Option<&'a str>,
	pub max_results: usize,
	pub confidence_threshold: f32,
	pub enable_reranking: bool,
}
impl ResponseKey<'_> {
	/// blake3 over the canonical JSON encoding.
	pub fn digest(&self) -> Result<String> {
		let payload = serde_json::json!({
			"kind": CACHE_KIND,
			"schema_version": CACHE_SCHEMA_VERSION,
			"query": self.normalized_query,
			"strategy": self.strategy.as_str(),
			"filters": canonical(&Value::Object(self.filters.clone())),
			"session": self.session_id,
			"max_results": self.max_results,
			"confidence_threshold": self.confidence_threshold,
			"enable_reranking": self.enable_reranking,
		});
		let bytes = serde_json::to_vec(&payload).map_err(|err| Error::Cache {
			message: format!("Failed to encode cache key: {err}"),
		})?;

		Ok(blake3::hash(&bytes).to_hex().to_string())
	}
}

/// Rebuilds objects with sorted keys so the encoding does not depend on insertion order.
fn canonical(value: &Value) -> Value {
	match value {
		Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();

			keys.sort();

			let mut out = Map::new();

			for key in keys {
				out.insert(key.clone(), canonical(&map[key]));
			}

			Value::Object(out)
		},
		Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
		other => other.clone(),
	}
}
