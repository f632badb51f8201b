use std::collections::HashSet;

use sqlx::PgPool;

use datalive_domain::{Candidate, CandidateMetadata, RelationRef, SourceTag};
use datalive_storage::{graph, models::TraversedRelation};

use crate::{AdapterQuery, BoxFuture, Result, RetrievalAdapter};

pub struct GraphAdapter {
	pool: PgPool,
	limit: u32,
	max_depth: u32,
}
impl GraphAdapter {
	pub fn new(pool: PgPool, cfg: &datalive_config::Retrieval) -> Self {
		Self { pool, limit: cfg.graph_limit, max_depth: cfg.graph_max_depth }
	}

	async fn fetch_relations(&self, query: &AdapterQuery) -> Result<Vec<Candidate>> {
		let names = seed_names(&query.tokens);
		let seeds = graph::find_entities_by_norm(&self.pool, &names).await?;

		if seeds.is_empty() {
			return Ok(Vec::new());
		}

		let seed_ids: Vec<_> = seeds.iter().map(|entity| entity.entity_id).collect();
		let walked =
			graph::traverse(&self.pool, &seed_ids, self.max_depth, self.limit as usize).await?;

		Ok(walked.into_iter().map(relation_candidate).collect())
	}
}
impl RetrievalAdapter for GraphAdapter {
	fn source(&self) -> SourceTag {
		SourceTag::Graph
	}

	fn fetch<'a>(&'a self, query: &'a AdapterQuery) -> BoxFuture<'a, Result<Vec<Candidate>>> {
		Box::pin(self.fetch_relations(query))
	}
}

/// Single tokens plus adjacent pairs, so two-word entity names such as "platform team" seed too.
fn seed_names(tokens: &[String]) -> Vec<String> {
	let mut seen = HashSet::new();
	let pairs = tokens.windows(2).map(|pair| format!("{} {}", pair[0], pair[1]));

	tokens.iter().cloned().chain(pairs).filter(|name| seen.insert(name.clone())).collect()
}

fn relation_candidate(hop: TraversedRelation) -> Candidate {
	let TraversedRelation { relation, depth } = hop;
	let text =
		format!("{} --[{}]--> {}", relation.subject_name, relation.predicate, relation.object_name);
	// Farther hops are weaker evidence.
	let raw_score = (relation.weight / depth.max(1) as f32).clamp(0.0, 1.0);

	Candidate {
		source: SourceTag::Graph,
		text,
		raw_score,
		metadata: CandidateMetadata {
			entities: vec![relation.subject_name.clone(), relation.object_name.clone()],
			relation: Some(RelationRef {
				subject: relation.subject_name,
				predicate: relation.predicate,
				object: relation.object_name,
				depth,
			}),
			..Default::default()
		},
	}
}
