use std::sync::Arc;

use datalive_service::QueryEngine;
use datalive_storage::{db::Db, qdrant::QdrantStore};

#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<QueryEngine>,
}
impl AppState {
	pub async fn new(config: datalive_config::Config) -> color_eyre::Result<Self> {
		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let qdrant = QdrantStore::new(&config.storage.qdrant)?;
		let engine = QueryEngine::new(&config, &db, qdrant);

		Ok(Self::from_engine(engine))
	}

	pub fn from_engine(engine: QueryEngine) -> Self {
		Self { engine: Arc::new(engine) }
	}
}
