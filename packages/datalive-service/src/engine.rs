use std::{
	future::Future,
	sync::Arc,
	time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use datalive_config::Config;
use datalive_domain::{
	Classification, Classifier, Complexity, QueryType, RankedResult, RerankConfig, SourceTag,
	Strategy, TtlClass, TtlTable, rerank, text,
};
use datalive_storage::{db::Db, qdrant::QdrantStore};

use crate::{
	AdapterFailure, AdapterQuery, Adapters, CacheEntry, CacheManager, CacheStats, CacheStore,
	CompletionProvider, Error, FanOut, FanOutOutcome, MemoryCacheStore, PgCacheStore, Providers,
	QueryRequest, Result, Synthesizer, ValidatedQuery,
	adapters::{ContextAdapter, GraphAdapter, VectorAdapter},
	cache::ResponseKey, single_flight::SingleFlight,
};

/// Answer returned when reranking leaves no evidence; the model is not consulted.
pub const NO_EVIDENCE_ANSWER: &str =
	"No evidence above the requested confidence threshold was found for this query.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceItem {
	pub content: String,
	pub score: f32,
	pub confidence: f32,
	pub metadata: Value,
}
impl SourceItem {
	fn from_ranked(result: &RankedResult) -> Self {
		let mut metadata: Map<String, Value> = result.metadata.extra.clone();

		metadata.insert("source".to_string(), Value::from(result.source.as_str()));
		metadata.insert("raw_score".to_string(), Value::from(result.raw_score));

		if !result.metadata.entities.is_empty() {
			metadata.insert("entities".to_string(), Value::from(result.metadata.entities.clone()));
		}
		if let Some(timestamp) = result.metadata.timestamp {
			let formatted = timestamp
				.format(&time::format_description::well_known::Rfc3339)
				.map(Value::String)
				.unwrap_or(Value::Null);

			metadata.insert("timestamp".to_string(), formatted);
		}
		if let Some(relation) = result.metadata.relation.as_ref() {
			metadata.insert("relation".to_string(), serde_json::json!(relation));
		}
		if let Some(stats) = result.match_stats.as_ref() {
			metadata.insert("match_stats".to_string(), serde_json::json!(stats));
		}

		Self {
			content: result.text.clone(),
			score: result.rerank_score,
			confidence: result.confidence,
			metadata: Value::Object(metadata),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMetadata {
	pub total_sources: usize,
	pub average_confidence: f32,
	pub processing_time_ms: u64,
	pub cached: bool,
	pub degraded: bool,
	pub query_type: QueryType,
	pub complexity: Complexity,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub failures: Vec<AdapterFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
	pub answer: String,
	pub strategy_used: Strategy,
	pub sources: Vec<SourceItem>,
	pub metadata: ResponseMetadata,
}

/// Ranked evidence without synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
	pub strategy_used: Strategy,
	pub query_type: QueryType,
	pub complexity: Complexity,
	pub sources: Vec<SourceItem>,
	pub degraded: bool,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub failures: Vec<AdapterFailure>,
	pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
	pub service: &'static str,
	pub version: &'static str,
	pub adapters: Vec<SourceTag>,
	pub cache: CacheStats,
	pub in_flight: usize,
}

/// Classify, consult the cache, then fan out, rerank and synthesize under one deadline.
/// Identical concurrent misses share a single computation.
pub struct QueryEngine {
	query_cfg: datalive_config::Query,
	rerank_cfg: datalive_config::Rerank,
	request_timeout: Duration,
	classifier: Classifier,
	fanout: FanOut,
	synthesizer: Synthesizer,
	cache: CacheManager,
	flights: SingleFlight<Result<QueryResponse>>,
}
impl QueryEngine {
	pub fn new(cfg: &Config, db: &Db, qdrant: QdrantStore) -> Self {
		Self::with_providers(cfg, db, qdrant, Providers::default())
	}

	pub fn with_providers(cfg: &Config, db: &Db, qdrant: QdrantStore, providers: Providers) -> Self {
		let adapters = Adapters::new()
			.with(Arc::new(VectorAdapter::new(
				Arc::new(qdrant),
				cfg.providers.embedding.clone(),
				providers.embedding.clone(),
				&cfg.retrieval,
			)))
			.with(Arc::new(GraphAdapter::new(db.pool.clone(), &cfg.retrieval)))
			.with(Arc::new(ContextAdapter::new(db.pool.clone(), &cfg.retrieval)));
		let store: Option<Arc<dyn CacheStore>> = if !cfg.cache.enabled {
			None
		} else if cfg.cache.backend == "postgres" {
			Some(Arc::new(PgCacheStore::new(db.pool.clone())))
		} else {
			Some(Arc::new(MemoryCacheStore::new(cfg.cache.max_entries)))
		};

		Self::from_parts(cfg, adapters, providers.completion, store)
	}

	/// Assembles an engine from already-built collaborators.
	pub fn from_parts(
		cfg: &Config,
		adapters: Adapters,
		completion: Arc<dyn CompletionProvider>,
		cache_store: Option<Arc<dyn CacheStore>>,
	) -> Self {
		Self {
			query_cfg: cfg.query.clone(),
			rerank_cfg: cfg.rerank.clone(),
			request_timeout: Duration::from_millis(cfg.service.request_timeout_ms),
			classifier: Classifier::from_config(cfg),
			fanout: FanOut::new(adapters, Duration::from_millis(cfg.retrieval.adapter_timeout_ms)),
			synthesizer: Synthesizer::new(
				cfg.synthesis.clone(),
				cfg.providers.llm.clone(),
				completion,
			),
			cache: CacheManager::new(cache_store, TtlTable::from_config(&cfg.cache)),
			flights: SingleFlight::new(),
		}
	}

	pub async fn query(&self, req: QueryRequest) -> Result<QueryResponse> {
		let started = Instant::now();
		let validated = req.validate(&self.query_cfg)?;
		let classification =
			self.classifier.classify(&validated.query, validated.strategy_override)?;
		let ttl_class = TtlClass::select(classification.query_type, validated.session_id.is_some());
		let cache_key = self.cache_key(&validated, &classification, ttl_class);

		if let Some(key) = cache_key.as_deref()
			&& let Some(entry) = self.cache.get(key).await
		{
			return Ok(cached_response(entry, &classification, elapsed_ms(started)));
		}

		let leader_view = classification.clone();
		let run = self.bounded(self.answer(validated, classification, ttl_class, cache_key.clone()));
		let mut response = match cache_key.as_deref() {
			Some(key) => {
				// A request that finished between our miss and this flight may have stored it.
				let compute = move || async move {
					match self.cache.recheck(key).await {
						Some(entry) => Ok(cached_response(entry, &leader_view, 0)),
						None => run.await,
					}
				};

				self.flights.run(key, compute).await.0?
			},
			None => run.await?,
		};

		response.metadata.processing_time_ms = elapsed_ms(started);

		tracing::info!(
			strategy = response.strategy_used.as_str(),
			query_type = response.metadata.query_type.as_str(),
			sources = response.sources.len(),
			cached = response.metadata.cached,
			degraded = response.metadata.degraded,
			elapsed_ms = response.metadata.processing_time_ms,
			"Query served."
		);

		Ok(response)
	}

	/// Retrieval and reranking only; nothing is cached and no model is called.
	pub async fn search(&self, req: QueryRequest) -> Result<SearchResponse> {
		let started = Instant::now();
		let validated = req.validate(&self.query_cfg)?;
		let classification =
			self.classifier.classify(&validated.query, validated.strategy_override)?;
		let (ranked, outcome) = self.bounded(self.retrieve(&validated, &classification)).await?;

		Ok(SearchResponse {
			strategy_used: classification.strategy,
			query_type: classification.query_type,
			complexity: classification.complexity,
			sources: ranked.iter().map(SourceItem::from_ranked).collect(),
			degraded: outcome.degraded(),
			failures: outcome.failures,
			processing_time_ms: elapsed_ms(started),
		})
	}

	pub async fn cache_stats(&self) -> CacheStats {
		self.cache.stats().await
	}

	/// Drops cached answers of one TTL class, or all of them for `None`.
	pub async fn invalidate_cache(&self, ttl_class: Option<TtlClass>) -> Result<u64> {
		self.cache.invalidate(ttl_class).await
	}

	pub async fn purge_expired_cache(&self) -> Result<u64> {
		self.cache.purge_expired().await
	}

	pub async fn status(&self) -> StatusReport {
		StatusReport {
			service: "datalive",
			version: env!("CARGO_PKG_VERSION"),
			adapters: self.fanout.adapters().sources(),
			cache: self.cache.stats().await,
			in_flight: self.flights.in_flight(),
		}
	}

	fn cache_key(
		&self,
		validated: &ValidatedQuery,
		classification: &Classification,
		ttl_class: TtlClass,
	) -> Option<String> {
		if !self.cache.enabled() || !validated.use_cache {
			return None;
		}

		let session_id = match ttl_class {
			TtlClass::Personal => validated.session_id.as_deref(),
			_ => None,
		};
		let normalized_query = text::normalize_query(&validated.query);
		let key = ResponseKey {
			normalized_query: &normalized_query,
			strategy: classification.strategy,
			filters: &validated.filters,
			session_id,
			max_results: validated.max_results,
			confidence_threshold: validated.confidence_threshold,
			enable_reranking: validated.enable_reranking,
		};

		match key.digest() {
			Ok(key) => Some(key),
			Err(err) => {
				tracing::warn!(error = %err, cache_kind = "response", "Cache key build failed.");

				None
			},
		}
	}

	async fn bounded<T, F>(&self, work: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		match tokio::time::timeout(self.request_timeout, work).await {
			Ok(result) => result,
			Err(_) => {
				tracing::warn!(
					timeout_ms = self.request_timeout.as_millis() as u64,
					"Request deadline exceeded."
				);

				Err(Error::Timeout {
					message: format!(
						"Request exceeded {} ms.",
						self.request_timeout.as_millis()
					),
				})
			},
		}
	}

	async fn retrieve(
		&self,
		validated: &ValidatedQuery,
		classification: &Classification,
	) -> Result<(Vec<RankedResult>, FanOutOutcome)> {
		let adapter_query = Arc::new(AdapterQuery {
			query: validated.query.clone(),
			tokens: classification.tokens.clone(),
			filters: validated.filters.clone(),
			session_id: validated.session_id.clone(),
			classification: classification.clone(),
		});
		let mut outcome = self.fanout.fetch(adapter_query, classification.strategy).await?;
		let candidates = std::mem::take(&mut outcome.candidates);
		let ranked = rerank::rerank(
			&validated.query,
			candidates,
			classification,
			&self.rerank_cfg,
			&RerankConfig {
				enabled: validated.enable_reranking,
				max_results: validated.max_results,
				confidence_threshold: validated.confidence_threshold,
			},
		);

		Ok((ranked, outcome))
	}

	async fn answer(
		&self,
		validated: ValidatedQuery,
		classification: Classification,
		ttl_class: TtlClass,
		cache_key: Option<String>,
	) -> Result<QueryResponse> {
		let (ranked, outcome) = self.retrieve(&validated, &classification).await?;
		let adapters_degraded = outcome.degraded();

		if ranked.is_empty() {
			return Ok(QueryResponse {
				answer: NO_EVIDENCE_ANSWER.to_string(),
				strategy_used: classification.strategy,
				sources: Vec::new(),
				metadata: ResponseMetadata {
					total_sources: 0,
					average_confidence: 0.0,
					processing_time_ms: 0,
					cached: false,
					degraded: adapters_degraded,
					query_type: classification.query_type,
					complexity: classification.complexity,
					failures: outcome.failures,
				},
			});
		}

		let synthesis =
			self.synthesizer.synthesize(&validated.query, &ranked, &classification).await;
		let sources: Vec<SourceItem> = ranked.iter().map(SourceItem::from_ranked).collect();
		let degraded = adapters_degraded || !synthesis.succeeded();
		let response = QueryResponse {
			answer: synthesis.answer,
			strategy_used: classification.strategy,
			metadata: ResponseMetadata {
				total_sources: sources.len(),
				average_confidence: synthesis.aggregate_confidence,
				processing_time_ms: 0,
				cached: false,
				degraded,
				query_type: classification.query_type,
				complexity: classification.complexity,
				failures: outcome.failures,
			},
			sources,
		};

		if !degraded && let Some(key) = cache_key.as_deref() {
			let entry = CacheEntry {
				answer: response.answer.clone(),
				strategy_used: response.strategy_used,
				sources: response.sources.clone(),
				average_confidence: response.metadata.average_confidence,
				degraded: false,
				ttl_class,
				created_at: OffsetDateTime::now_utc(),
			};

			self.cache.put(key, &entry).await;
		}

		Ok(response)
	}
}

fn cached_response(
	entry: CacheEntry,
	classification: &Classification,
	processing_time_ms: u64,
) -> QueryResponse {
	QueryResponse {
		answer: entry.answer,
		strategy_used: entry.strategy_used,
		metadata: ResponseMetadata {
			total_sources: entry.sources.len(),
			average_confidence: entry.average_confidence,
			processing_time_ms,
			cached: true,
			degraded: entry.degraded,
			query_type: classification.query_type,
			complexity: classification.complexity,
			failures: Vec::new(),
		},
		sources: entry.sources,
	}
}

fn elapsed_ms(started: Instant) -> u64 {
	started.elapsed().as_millis() as u64
}
