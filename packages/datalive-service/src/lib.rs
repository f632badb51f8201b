pub mod adapters;
pub mod cache;
pub mod engine;
pub mod fanout;
pub mod request;
pub mod single_flight;
pub mod synthesis;

mod error;

pub use adapters::{AdapterQuery, Adapters, RetrievalAdapter};
pub use cache::{CacheEntry, CacheManager, CacheStats, CacheStore, MemoryCacheStore, PgCacheStore};
pub use engine::{
	QueryEngine, QueryResponse, ResponseMetadata, SearchResponse, SourceItem, StatusReport,
};
pub use error::{AdapterFailure, Error, FailureKind, Result, ValidationCode};
pub use fanout::{FanOut, FanOutOutcome};
pub use request::{QueryRequest, ValidatedQuery};
pub use synthesis::{SynthesisOutcome, Synthesizer};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use datalive_config::{EmbeddingProviderConfig, LlmProviderConfig};
use datalive_providers::{completion, embedding};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>>;
}

pub trait CompletionProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		model: &'a str,
		max_tokens: u32,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub completion: Arc<dyn CompletionProvider>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		completion: Arc<dyn CompletionProvider>,
	) -> Self {
		Self { embedding, completion }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { embedding: provider.clone(), completion: provider }
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, color_eyre::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}
impl CompletionProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		model: &'a str,
		max_tokens: u32,
		messages: &'a [Value],
	) -> BoxFuture<'a, color_eyre::Result<String>> {
		Box::pin(completion::complete(cfg, model, max_tokens, messages))
	}
}

/// First 12 characters of a cache key; full keys never reach the logs.
pub(crate) fn cache_key_prefix(key: &str) -> &str {
	let len = key.len().min(12);

	&key[..len]
}
