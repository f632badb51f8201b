use std::collections::HashSet;

use sqlx::PgPool;
use uuid::Uuid;

use datalive_domain::text;

use crate::{
	Result,
	models::{GraphEntity, GraphRelation, TraversedRelation},
};

/// Folded the way query tokens are (case, diacritics, punctuation) so that "Educación" is found
/// by the token "educacion". Short words stay, unlike in tokenization.
pub fn normalize_entity_name(input: &str) -> String {
	text::fold(input)
		.split(|ch: char| !ch.is_alphanumeric())
		.filter(|word| !word.is_empty())
		.collect::<Vec<_>>()
		.join(" ")
}

pub async fn find_entities_by_norm(pool: &PgPool, names: &[String]) -> Result<Vec<GraphEntity>> {
	if names.is_empty() {
		return Ok(vec![]);
	}

	let rows = sqlx::query_as::<_, GraphEntity>(
		"\
SELECT entity_id, name, name_norm, entity_type, properties
FROM graph_entities
WHERE name_norm = ANY($1::text[])
ORDER BY name_norm",
	)
	.bind(names)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}

/// Relations with either endpoint in `entity_ids`, strongest first.
pub async fn relations_touching(
	pool: &PgPool,
	entity_ids: &[Uuid],
	limit: i64,
) -> Result<Vec<GraphRelation>> {
	if entity_ids.is_empty() || limit <= 0 {
		return Ok(vec![]);
	}

	let rows = sqlx::query_as::<_, GraphRelation>(
		"\
SELECT
	r.relation_id,
	r.subject_id,
	s.name AS subject_name,
	r.predicate,
	r.object_id,
	o.name AS object_name,
	r.weight
FROM graph_relations r
JOIN graph_entities s ON s.entity_id = r.subject_id
JOIN graph_entities o ON o.entity_id = r.object_id
WHERE r.subject_id = ANY($1::uuid[]) OR r.object_id = ANY($1::uuid[])
ORDER BY r.weight DESC, r.relation_id
LIMIT $2",
	)
	.bind(entity_ids)
	.bind(limit)
	.fetch_all(pool)
	.await?;

	Ok(rows)
}

/// Breadth-first walk from `seeds`. Depth 1 relations touch a seed; each later hop expands from
/// the endpoints discovered in the previous one. Each relation is reported once, at its
/// shallowest depth.
pub async fn traverse(
	pool: &PgPool,
	seeds: &[Uuid],
	max_depth: u32,
	limit: usize,
) -> Result<Vec<TraversedRelation>> {
	let mut visited_entities: HashSet<Uuid> = seeds.iter().copied().collect();
	let mut seen_relations: HashSet<Uuid> = HashSet::new();
	let mut frontier: Vec<Uuid> = seeds.to_vec();
	let mut out = Vec::new();

	for depth in 1..=max_depth {
		if frontier.is_empty() || out.len() >= limit {
			break;
		}

		let remaining = (limit - out.len()) as i64;
		let relations = relations_touching(pool, &frontier, remaining).await?;
		let mut next = Vec::new();

		for relation in relations {
			if !seen_relations.insert(relation.relation_id) {
				continue;
			}

			for endpoint in [relation.subject_id, relation.object_id] {
				if visited_entities.insert(endpoint) {
					next.push(endpoint);
				}
			}

			out.push(TraversedRelation { relation, depth });
		}

		frontier = next;
	}

	out.truncate(limit);

	Ok(out)
}

pub async fn upsert_entity(pool: &PgPool, name: &str, entity_type: &str) -> Result<Uuid> {
	let entity_id: Uuid = sqlx::query_scalar(
		"\
INSERT INTO graph_entities (entity_id, name, name_norm, entity_type)
VALUES ($1, $2, $3, $4)
ON CONFLICT (name_norm) DO UPDATE
SET name = EXCLUDED.name, entity_type = EXCLUDED.entity_type, updated_at = now()
RETURNING entity_id",
	)
	.bind(Uuid::new_v4())
	.bind(name)
	.bind(normalize_entity_name(name))
	.bind(entity_type)
	.fetch_one(pool)
	.await?;

	Ok(entity_id)
}

pub async fn insert_relation(
	pool: &PgPool,
	subject_id: Uuid,
	predicate: &str,
	object_id: Uuid,
	weight: f32,
) -> Result<Uuid> {
	let relation_id = Uuid::new_v4();

	sqlx::query(
		"\
INSERT INTO graph_relations (relation_id, subject_id, predicate, object_id, weight)
VALUES ($1, $2, $3, $4, $5)",
	)
	.bind(relation_id)
	.bind(subject_id)
	.bind(predicate)
	.bind(object_id)
	.bind(weight)
	.execute(pool)
	.await?;

	Ok(relation_id)
}
