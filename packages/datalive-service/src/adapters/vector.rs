use std::{collections::HashMap, sync::Arc};

use qdrant_client::qdrant::{Condition, Filter, ScoredPoint, Value as QdrantValue, value::Kind};
use serde_json::{Map, Number, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use datalive_config::EmbeddingProviderConfig;
use datalive_domain::{Candidate, CandidateMetadata, SourceTag};
use datalive_storage::qdrant::QdrantStore;

use crate::{AdapterQuery, BoxFuture, EmbeddingProvider, Error, Result, RetrievalAdapter};

const ENTITIES_FIELD: &str = "entities";
const TIMESTAMP_FIELDS: [&str; 2] = ["timestamp", "created_at"];

/// Dense similarity search: embed the query, then a nearest-neighbour query in Qdrant.
pub struct VectorAdapter {
	qdrant: Arc<QdrantStore>,
	embedding_cfg: EmbeddingProviderConfig,
	embedding: Arc<dyn EmbeddingProvider>,
	top_k: u32,
	min_score: Option<f32>,
}
impl VectorAdapter {
	pub fn new(
		qdrant: Arc<QdrantStore>,
		embedding_cfg: EmbeddingProviderConfig,
		embedding: Arc<dyn EmbeddingProvider>,
		cfg: &datalive_config::Retrieval,
	) -> Self {
		Self {
			qdrant,
			embedding_cfg,
			embedding,
			top_k: cfg.vector_top_k,
			min_score: cfg.vector_min_score,
		}
	}

	async fn search(&self, query: &AdapterQuery) -> Result<Vec<Candidate>> {
		let texts = vec![query.query.clone()];
		let mut vectors = self.embedding.embed(&self.embedding_cfg, &texts).await?;
		let Some(vector) = vectors.pop() else {
			return Err(Error::Provider {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		};
		let filter = build_filter(&query.filters);
		let points =
			self.qdrant.nearest(vector, u64::from(self.top_k), self.min_score, filter).await?;

		Ok(points
			.into_iter()
			.filter_map(|point| point_candidate(point, &self.qdrant.text_field))
			.collect())
	}
}
impl RetrievalAdapter for VectorAdapter {
	fn source(&self) -> SourceTag {
		SourceTag::Vector
	}

	fn fetch<'a>(&'a self, query: &'a AdapterQuery) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(self.search(query))
	}
}

/// Scalar filter entries become exact-match payload conditions; everything else is ignored.
fn build_filter(filters: &Map<String, Value>) -> Option<Filter> {
	let conditions: Vec<Condition> = filters
		.iter()
		.filter_map(|(key, value)| match value {
			Value::String(text) => Some(Condition::matches(key.as_str(), text.clone())),
			Value::Bool(flag) => Some(Condition::matches(key.as_str(), *flag)),
			Value::Number(number) =>
				number.as_i64().map(|int| Condition::matches(key.as_str(), int)),
			_ => None,
		})
		.collect();

	if conditions.is_empty() { None } else { Some(Filter::must(conditions)) }
}

/// Points without a text payload carry nothing to rerank and are dropped.
fn point_candidate(point: ScoredPoint, text_field: &str) -> Option<Candidate> {
	let mut payload = payload_to_json(point.payload);
	let text = match payload.remove(text_field) {
		Some(Value::String(text)) if !text.trim().is_empty() => text,
		_ => return None,
	};
	let entities = match payload.remove(ENTITIES_FIELD) {
		Some(Value::Array(items)) =>
			items.into_iter().filter_map(|item| item.as_str().map(str::to_string)).collect(),
		_ => Vec::new(),
	};
	let timestamp = TIMESTAMP_FIELDS.iter().find_map(|field| {
		payload.get(*field).and_then(Value::as_str).and_then(|raw| {
			OffsetDateTime::parse(raw, &Rfc3339).ok()
		})
	});

	Some(Candidate {
		source: SourceTag::Vector,
		text,
		raw_score: point.score,
		metadata: CandidateMetadata { entities, timestamp, relation: None, extra: payload },
	})
}

fn payload_to_json(payload: HashMap<String, QdrantValue>) -> Map<String, Value> {
	payload.into_iter().map(|(key, value)| (key, qdrant_value_to_json(value))).collect()
}

fn qdrant_value_to_json(value: QdrantValue) -> Value {
	match value.kind {
		Some(Kind::StringValue(text)) => Value::String(text),
		Some(Kind::BoolValue(flag)) => Value::Bool(flag),
		Some(Kind::IntegerValue(int)) => Value::from(int),
		Some(Kind::DoubleValue(float)) => Number::from_f64(float).map_or(Value::Null, Value::Number),
		Some(Kind::ListValue(list)) =>
			Value::Array(list.values.into_iter().map(qdrant_value_to_json).collect()),
		Some(Kind::StructValue(object)) => Value::Object(payload_to_json(object.fields)),
		Some(Kind::NullValue(_)) | None => Value::Null,
	}
}
