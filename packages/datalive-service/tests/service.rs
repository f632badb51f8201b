use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use serde_json::Value;
use tokio::task::JoinSet;

use datalive_config::{Config, LlmProviderConfig};
use datalive_domain::{Candidate, CandidateMetadata, SourceTag, Strategy};
use datalive_domain::TtlClass;
use datalive_service::{
	AdapterQuery, Adapters, BoxFuture, CacheEntry, CacheStore, CompletionProvider, Error,
	MemoryCacheStore, QueryEngine, QueryRequest, RetrievalAdapter, ValidationCode,
	engine::NO_EVIDENCE_ANSWER, synthesis::INSUFFICIENT_INFORMATION,
};

const FACTUAL_QUERY: &str = "What is the DataLive ingestion pipeline?";
const STRONG_TEXT: &str =
	"what the datalive ingestion pipeline does for connected sources every day";
const WEAK_TEXT: &str = "coffee beans roasted slowly over wood fire in mountain villages";
const ANSWER: &str = "The pipeline ingests connected sources continuously [1].";

const BASE_CONFIG: &str = r#"
[service]
http_bind          = "127.0.0.1:0"
admin_bind         = "127.0.0.1:0"
log_level          = "info"
request_timeout_ms = 2000

[storage.postgres]
dsn            = "postgres://unused"
pool_max_conns = 1

[storage.qdrant]
url        = "http://127.0.0.1:6334"
collection = "unused"
vector_dim = 4

[providers.embedding]
provider_id = "test"
api_base    = "http://127.0.0.1:1"
api_key     = "test"
path        = "/v1/embeddings"
model       = "test-embed"
dimensions  = 4
timeout_ms  = 1000

[providers.embedding.default_headers]

[providers.llm]
provider_id = "test"
api_base    = "http://127.0.0.1:1"
api_key     = "test"
path        = "/v1/chat/completions"
temperature = 0.1
timeout_ms  = 1000

[providers.llm.default_headers]

[retrieval]
adapter_timeout_ms = 1000

[synthesis]
primary_model      = "primary"
primary_max_tokens = 512
light_model        = "light"
light_max_tokens   = 256
"#;

enum Behavior {
	Return(Vec<(&'static str, f32)>),
	Fail,
	Hang,
}

struct FakeAdapter {
	source: SourceTag,
	behavior: Behavior,
	calls: Arc<AtomicUsize>,
}
impl RetrievalAdapter for FakeAdapter {
	fn source(&self) -> SourceTag {
		self.source
	}

	fn fetch<'a>(
		&'a self,
		_query: &'a AdapterQuery,
	) -> BoxFuture<'a, datalive_service::Result<Vec<Candidate>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			match &self.behavior {
				Behavior::Return(items) => Ok(items
					.iter()
					.map(|(text, raw_score)| Candidate {
						source: self.source,
						text: text.to_string(),
						raw_score: *raw_score,
						metadata: CandidateMetadata::default(),
					})
					.collect()),
				Behavior::Fail => Err(Error::Storage { message: "backend unavailable".to_string() }),
				Behavior::Hang => {
					tokio::time::sleep(Duration::from_secs(30)).await;

					Ok(Vec::new())
				},
			}
		})
	}
}

struct CountingCompletion {
	calls: Arc<AtomicUsize>,
	delay: Duration,
	fail: bool,
}
impl CompletionProvider for CountingCompletion {
	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_model: &'a str,
		_max_tokens: u32,
		_messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			tokio::time::sleep(self.delay).await;

			if self.fail {
				return Err(color_eyre::eyre::eyre!("model offline"));
			}

			Ok(ANSWER.to_string())
		})
	}
}

/// Memory store whose first `slow_reads` lookups take the snapshot and then stall.
struct SlowReadStore {
	inner: MemoryCacheStore,
	slow_reads: AtomicUsize,
	stall: Duration,
}
impl CacheStore for SlowReadStore {
	fn backend(&self) -> &'static str {
		"slow-memory"
	}

	fn get<'a>(
		&'a self,
		key: &'a str,
	) -> BoxFuture<'a, datalive_service::Result<Option<CacheEntry>>> {
		let slow =
			self.slow_reads.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

		Box::pin(async move {
			let snapshot = self.inner.get(key).await?;

			if slow.is_ok() {
				tokio::time::sleep(self.stall).await;
			}

			Ok(snapshot)
		})
	}

	fn put<'a>(
		&'a self,
		key: &'a str,
		entry: &'a CacheEntry,
		ttl: Duration,
	) -> BoxFuture<'a, datalive_service::Result<()>> {
		self.inner.put(key, entry, ttl)
	}

	fn len(&self) -> BoxFuture<'_, datalive_service::Result<u64>> {
		self.inner.len()
	}

	fn invalidate(
		&self,
		ttl_class: Option<TtlClass>,
	) -> BoxFuture<'_, datalive_service::Result<u64>> {
		self.inner.invalidate(ttl_class)
	}

	fn purge_expired(&self) -> BoxFuture<'_, datalive_service::Result<u64>> {
		self.inner.purge_expired()
	}
}

struct BrokenStore;
impl BrokenStore {
	fn error() -> Error {
		Error::Cache { message: "cache backend unreachable".to_string() }
	}
}
impl CacheStore for BrokenStore {
	fn backend(&self) -> &'static str {
		"broken"
	}

	fn get<'a>(
		&'a self,
		_key: &'a str,
	) -> BoxFuture<'a, datalive_service::Result<Option<CacheEntry>>> {
		Box::pin(async { Err(Self::error()) })
	}

	fn put<'a>(
		&'a self,
		_key: &'a str,
		_entry: &'a CacheEntry,
		_ttl: Duration,
	) -> BoxFuture<'a, datalive_service::Result<()>> {
		Box::pin(async { Err(Self::error()) })
	}

	fn len(&self) -> BoxFuture<'_, datalive_service::Result<u64>> {
		Box::pin(async { Err(Self::error()) })
	}

	fn invalidate(
		&self,
		_ttl_class: Option<TtlClass>,
	) -> BoxFuture<'_, datalive_service::Result<u64>> {
		Box::pin(async { Err(Self::error()) })
	}

	fn purge_expired(&self) -> BoxFuture<'_, datalive_service::Result<u64>> {
		Box::pin(async { Err(Self::error()) })
	}
}

struct Harness {
	engine: Arc<QueryEngine>,
	adapter_calls: Arc<AtomicUsize>,
	completion_calls: Arc<AtomicUsize>,
}

fn config() -> Config {
	datalive_config::from_toml_str(BASE_CONFIG).expect("Test config must parse.")
}

fn harness(
	cfg: &Config,
	adapters: Vec<(SourceTag, Behavior)>,
	completion: CountingCompletion,
) -> Harness {
	harness_with_store(cfg, adapters, completion, Arc::new(MemoryCacheStore::new(100)))
}

fn harness_with_store(
	cfg: &Config,
	adapters: Vec<(SourceTag, Behavior)>,
	completion: CountingCompletion,
	store: Arc<dyn CacheStore>,
) -> Harness {
	let adapter_calls = Arc::new(AtomicUsize::new(0));
	let completion_calls = completion.calls.clone();
	let mut registry = Adapters::new();

	for (source, behavior) in adapters {
		registry.register(Arc::new(FakeAdapter { source, behavior, calls: adapter_calls.clone() }));
	}

	let engine = QueryEngine::from_parts(cfg, registry, Arc::new(completion), Some(store));

	Harness { engine: Arc::new(engine), adapter_calls, completion_calls }
}

fn completion(delay_ms: u64) -> CountingCompletion {
	CountingCompletion {
		calls: Arc::new(AtomicUsize::new(0)),
		delay: Duration::from_millis(delay_ms),
		fail: false,
	}
}

fn request(query: &str, threshold: f64) -> QueryRequest {
	QueryRequest { confidence_threshold: Some(threshold), ..QueryRequest::new(query) }
}

#[tokio::test]
async fn identical_concurrent_queries_share_one_synthesis() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		completion(150),
	);
	let mut tasks = JoinSet::new();

	for _ in 0..8 {
		let engine = h.engine.clone();

		tasks.spawn(async move { engine.query(request(FACTUAL_QUERY, 0.1)).await });
	}

	let mut answers = Vec::new();

	while let Some(joined) = tasks.join_next().await {
		let response = joined.expect("Task must not panic.").expect("Query must succeed.");

		answers.push(response.answer);
	}

	assert_eq!(answers.len(), 8);
	assert!(answers.iter().all(|answer| answer == ANSWER));
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 1);
	assert_eq!(h.adapter_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		completion(0),
	);
	let first = h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect("First query.");
	let second = h
		.engine
		.query(request("  what is the DATALIVE ingestion pipeline?  ", 0.1))
		.await
		.expect("Second query.");

	assert!(!first.metadata.cached);
	assert!(second.metadata.cached);
	assert_eq!(first.answer, second.answer);
	assert_eq!(first.sources, second.sources);
	assert_eq!(first.strategy_used, Strategy::Rag);
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 1);

	let stats = h.engine.cache_stats().await;

	assert_eq!(stats.hits, 1);
	assert_eq!(stats.writes, 1);
}

#[tokio::test]
async fn cached_answer_is_not_reused_for_different_result_shape() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(
			SourceTag::Vector,
			Behavior::Return(vec![(STRONG_TEXT, 0.9), (STRONG_TEXT, 0.8), (STRONG_TEXT, 0.6)]),
		)],
		completion(0),
	);
	let broad = QueryRequest { max_results: Some(10), ..request(FACTUAL_QUERY, 0.1) };
	let first = h.engine.query(broad).await.expect("Broad query.");

	assert_eq!(first.sources.len(), 3);

	let strict = QueryRequest { max_results: Some(1), ..request(FACTUAL_QUERY, 1.0) };
	let second = h.engine.query(strict).await.expect("Strict query.");

	assert!(!second.metadata.cached);
	assert!(second.sources.len() <= 1);
	assert!(second.sources.iter().all(|source| source.confidence >= 1.0));

	let narrow = QueryRequest { max_results: Some(1), ..request(FACTUAL_QUERY, 0.1) };
	let third = h.engine.query(narrow).await.expect("Narrow query.");

	assert!(!third.metadata.cached);
	assert_eq!(third.sources.len(), 1);

	let raw = QueryRequest {
		max_results: Some(10),
		enable_reranking: Some(false),
		..request(FACTUAL_QUERY, 0.1)
	};

	assert!(!h.engine.query(raw).await.expect("Raw query.").metadata.cached);
}

#[tokio::test]
async fn late_arrival_after_flight_finished_reuses_stored_answer() {
	let cfg = config();
	let store = Arc::new(SlowReadStore {
		inner: MemoryCacheStore::new(100),
		slow_reads: AtomicUsize::new(2),
		stall: Duration::from_millis(100),
	});
	let h = harness_with_store(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		completion(0),
		store,
	);
	let first = {
		let engine = h.engine.clone();

		tokio::spawn(async move { engine.query(request(FACTUAL_QUERY, 0.1)).await })
	};

	tokio::time::sleep(Duration::from_millis(50)).await;

	let second = {
		let engine = h.engine.clone();

		tokio::spawn(async move { engine.query(request(FACTUAL_QUERY, 0.1)).await })
	};
	let first = first.await.expect("Task must not panic.").expect("First query.");
	let second = second.await.expect("Task must not panic.").expect("Second query.");

	assert!(!first.metadata.cached);
	assert!(second.metadata.cached);
	assert_eq!(second.answer, ANSWER);
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn opting_out_of_cache_always_recomputes() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		completion(0),
	);
	let req = QueryRequest { use_cache: Some(false), ..request(FACTUAL_QUERY, 0.1) };

	h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect("Warm the cache.");

	let first = h.engine.query(req.clone()).await.expect("First uncached query.");
	let second = h.engine.query(req).await.expect("Second uncached query.");

	assert!(!first.metadata.cached);
	assert!(!second.metadata.cached);
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 3);

	let stats = h.engine.cache_stats().await;

	assert_eq!((stats.hits, stats.writes), (0, 1));
}

#[tokio::test]
async fn unreachable_cache_is_bypassed() {
	let cfg = config();
	let h = harness_with_store(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		completion(0),
		Arc::new(BrokenStore),
	);
	let response = h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect("Query must succeed.");

	assert_eq!(response.answer, ANSWER);
	assert!(!response.metadata.cached);
	assert!(!response.metadata.degraded);

	let stats = h.engine.cache_stats().await;

	assert_eq!(stats.errors, 2);
	assert_eq!((stats.hits, stats.writes), (0, 0));
	assert_eq!(stats.entries, None);
	assert!(h.engine.invalidate_cache(None).await.is_err());
}

#[tokio::test]
async fn disabled_reranking_keeps_adapter_order_and_raw_confidence() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(
			SourceTag::Vector,
			Behavior::Return(vec![(WEAK_TEXT, 0.3), (STRONG_TEXT, 0.95), (WEAK_TEXT, 0.5)]),
		)],
		completion(0),
	);
	let req = QueryRequest {
		max_results: Some(2),
		enable_reranking: Some(false),
		..request(FACTUAL_QUERY, 0.9)
	};
	let response = h.engine.query(req).await.expect("Query must succeed.");
	let raw: Vec<f32> = response
		.sources
		.iter()
		.map(|source| source.metadata["raw_score"].as_f64().map(|v| v as f32).unwrap_or(-1.0))
		.collect();

	assert_eq!(raw, vec![0.3, 0.95]);
	assert!((response.sources[0].confidence - 0.3).abs() < 1e-6);
	assert!((response.sources[1].confidence - 0.95).abs() < 1e-6);
	assert!(response.sources.iter().all(|source| source.metadata.get("match_stats").is_none()));
	assert_eq!(response.answer, ANSWER);
}

#[tokio::test]
async fn scoped_invalidation_leaves_other_classes() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		completion(0),
	);

	h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect("Factual query.");

	assert_eq!(h.engine.invalidate_cache(Some(TtlClass::Temporal)).await.expect("Scoped."), 0);
	assert!(h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect("Again.").metadata.cached);
	assert_eq!(h.engine.invalidate_cache(Some(TtlClass::Factual)).await.expect("Scoped."), 1);
	assert!(!h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect("After.").metadata.cached);
}

#[tokio::test]
async fn failed_adapter_degrades_response_without_caching() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![
			(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)])),
			(SourceTag::Graph, Behavior::Fail),
			(SourceTag::Context, Behavior::Return(vec![(STRONG_TEXT, 0.7)])),
		],
		completion(0),
	);
	let req = QueryRequest { strategy: Some("hybrid".to_string()), ..request(FACTUAL_QUERY, 0.1) };
	let response = h.engine.query(req.clone()).await.expect("Partial failure still answers.");

	assert_eq!(response.strategy_used, Strategy::Hybrid);
	assert!(response.metadata.degraded);
	assert_eq!(response.metadata.failures.len(), 1);
	assert_eq!(response.metadata.failures[0].source, SourceTag::Graph);
	assert_eq!(response.sources.len(), 2);
	assert!(response.sources.iter().all(|source| source.metadata["source"] != "graph"));

	let again = h.engine.query(req).await.expect("Second partial failure.");

	assert!(!again.metadata.cached);
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn threshold_and_max_results_bound_sources() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(
			SourceTag::Vector,
			Behavior::Return(vec![
				(WEAK_TEXT, 0.95),
				(STRONG_TEXT, 0.6),
				(STRONG_TEXT, 0.9),
				(STRONG_TEXT, 0.8),
			]),
		)],
		completion(0),
	);
	let req = QueryRequest { max_results: Some(2), ..request(FACTUAL_QUERY, 0.5) };
	let response = h.engine.query(req).await.expect("Query must succeed.");

	assert_eq!(response.sources.len(), 2);
	assert_eq!(response.metadata.total_sources, 2);
	assert!(response.sources.iter().all(|source| source.confidence >= 0.5));
	assert!(response.sources[0].score >= response.sources[1].score);
	assert_eq!(response.sources[0].metadata["raw_score"].as_f64().map(|v| v as f32), Some(0.9));
	assert!(response.sources.iter().all(|source| source.content == STRONG_TEXT));
}

#[tokio::test]
async fn no_evidence_skips_synthesis_and_cache() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(WEAK_TEXT, 0.9)]))],
		completion(0),
	);
	let response = h.engine.query(request(FACTUAL_QUERY, 0.9)).await.expect("Query must succeed.");

	assert_eq!(response.answer, NO_EVIDENCE_ANSWER);
	assert!(response.sources.is_empty());
	assert_eq!(response.metadata.total_sources, 0);
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 0);
	assert_eq!(h.engine.cache_stats().await.writes, 0);
}

#[tokio::test]
async fn failed_synthesis_returns_marker_and_is_not_cached() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		CountingCompletion {
			calls: Arc::new(AtomicUsize::new(0)),
			delay: Duration::ZERO,
			fail: true,
		},
	);
	let response = h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect("Query must succeed.");

	assert!(response.answer.starts_with(INSUFFICIENT_INFORMATION));
	assert!(response.metadata.degraded);
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 2);
	assert_eq!(h.engine.cache_stats().await.writes, 0);
}

#[tokio::test]
async fn every_adapter_failing_is_a_retrieval_error() {
	let cfg = config();
	let h = harness(&cfg, vec![(SourceTag::Vector, Behavior::Fail)], completion(0));
	let err = h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect_err("Must fail.");

	match err {
		Error::Retrieval { failures, .. } => {
			assert_eq!(failures.len(), 1);
			assert_eq!(failures[0].source, SourceTag::Vector);
		},
		other => panic!("Unexpected error: {other:?}"),
	}
}

#[tokio::test]
async fn overall_deadline_maps_to_timeout() {
	let cfg = config();
	let cfg = Config {
		service: datalive_config::Service { request_timeout_ms: 150, ..cfg.service },
		retrieval: datalive_config::Retrieval { adapter_timeout_ms: 10_000, ..cfg.retrieval },
		..cfg
	};
	let h = harness(&cfg, vec![(SourceTag::Vector, Behavior::Hang)], completion(0));
	let err = h.engine.query(request(FACTUAL_QUERY, 0.1)).await.expect_err("Must time out.");

	assert!(matches!(err, Error::Timeout { .. }), "Unexpected error: {err:?}");
	assert_eq!(h.engine.status().await.in_flight, 0);
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_retrieval() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9)]))],
		completion(0),
	);
	let empty = h.engine.query(QueryRequest::new("   ")).await.expect_err("Empty query.");
	let unknown = h
		.engine
		.query(QueryRequest {
			strategy: Some("graphql".to_string()),
			..QueryRequest::new(FACTUAL_QUERY)
		})
		.await
		.expect_err("Unknown strategy.");

	assert!(matches!(empty, Error::Validation { code: ValidationCode::EmptyQuery, .. }));
	assert!(matches!(unknown, Error::Validation { code: ValidationCode::InvalidStrategy, .. }));
	assert_eq!(h.adapter_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn search_returns_ranked_sources_without_synthesis() {
	let cfg = config();
	let h = harness(
		&cfg,
		vec![(SourceTag::Vector, Behavior::Return(vec![(STRONG_TEXT, 0.9), (WEAK_TEXT, 0.9)]))],
		completion(0),
	);
	let response = h.engine.search(request(FACTUAL_QUERY, 0.5)).await.expect("Search.");

	assert_eq!(response.strategy_used, Strategy::Rag);
	assert_eq!(response.sources.len(), 1);
	assert!(!response.degraded);
	assert_eq!(h.completion_calls.load(Ordering::SeqCst), 0);

	let status = h.engine.status().await;

	assert_eq!(status.adapters, vec![SourceTag::Vector]);
	assert_eq!(status.cache.backend, Some("memory"));
}
