//! Uniform access to the three retrieval backends. The fan-out only ever sees
//! [`RetrievalAdapter`], so a new backend plugs in by registering one more implementation.

pub mod context;
pub mod graph;
pub mod vector;

pub use context::ContextAdapter;
pub use graph::GraphAdapter;
pub use vector::VectorAdapter;

use std::{collections::HashMap, sync::Arc};

use serde_json::{Map, Value};

use datalive_domain::{Candidate, Classification, SourceTag};

use crate::{BoxFuture, Result};

/// Everything an adapter may use to shape its backend query.
#[derive(Debug, Clone)]
pub struct AdapterQuery {
	pub query: String,
	/// Normalized tokens, see [`datalive_domain::text::tokenize`].
	pub tokens: Vec<String>,
	pub filters: Map<String, Value>,
	pub session_id: Option<String>,
	pub classification: Classification,
}

pub trait RetrievalAdapter
where
	Self: Send + Sync,
{
	fn source(&self) -> SourceTag;

	fn fetch<'a>(&'a self, query: &'a AdapterQuery) -> BoxFuture<'a, Result<Vec<Candidate>>>;
}

/// Registered adapters keyed by the source they serve.
#[derive(Clone, Default)]
pub struct Adapters {
	by_source: HashMap<SourceTag, Arc<dyn RetrievalAdapter>>,
}
impl Adapters {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, adapter: Arc<dyn RetrievalAdapter>) -> Self {
		self.register(adapter);

		self
	}

	/// Replaces any adapter previously registered for the same source.
	pub fn register(&mut self, adapter: Arc<dyn RetrievalAdapter>) {
		self.by_source.insert(adapter.source(), adapter);
	}

	pub fn get(&self, source: SourceTag) -> Option<Arc<dyn RetrievalAdapter>> {
		self.by_source.get(&source).cloned()
	}

	pub fn sources(&self) -> Vec<SourceTag> {
		let mut sources: Vec<SourceTag> = self.by_source.keys().copied().collect();

		sources.sort();

		sources
	}
}
