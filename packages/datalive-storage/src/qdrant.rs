use qdrant_client::qdrant::{Filter, Query, QueryPointsBuilder, ScoredPoint};

use crate::{Error, Result};

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
	pub text_field: String,
}
impl QdrantStore {
	pub fn new(cfg: &datalive_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self {
			client,
			collection: cfg.collection.clone(),
			vector_dim: cfg.vector_dim,
			text_field: cfg.text_field.clone(),
		})
	}

	/// Nearest-neighbour query over the collection's default dense vector, payload included.
	pub async fn nearest(
		&self,
		vector: Vec<f32>,
		limit: u64,
		min_score: Option<f32>,
		filter: Option<Filter>,
	) -> Result<Vec<ScoredPoint>> {
		if vector.len() != self.vector_dim as usize {
			return Err(Error::InvalidArgument(format!(
				"Query vector has {} dimensions; collection expects {}.",
				vector.len(),
				self.vector_dim
			)));
		}

		let mut search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(vector))
			.with_payload(true)
			.limit(limit);

		if let Some(threshold) = min_score {
			search = search.score_threshold(threshold);
		}
		if let Some(filter) = filter {
			search = search.filter(filter);
		}

		let response = self.client.query(search).await?;

		Ok(response.result)
	}
}
