//! Lexical, positional and type-aware reranking of fan-out candidates.
//!
//! The score of one candidate is
//! `(exact·we + partial·wp + position·wpos + density·wd + raw·wr) · length_norm · type_bonus`,
//! clamped to the configured confidence range. Weights come from [`datalive_config::Rerank`].

use std::collections::{HashMap, HashSet};

use crate::{Candidate, Classification, MatchStats, QueryType, RankedResult, text};

#[derive(Debug, Clone, Copy)]
pub struct RerankConfig {
	pub enabled: bool,
	pub max_results: usize,
	pub confidence_threshold: f32,
}

/// Scores, sorts, filters and truncates `candidates`. With reranking disabled the candidates
/// pass through in their original order, capped at `cfg.max_results`.
pub fn rerank(
	query: &str,
	candidates: Vec<Candidate>,
	classification: &Classification,
	weights: &datalive_config::Rerank,
	cfg: &RerankConfig,
) -> Vec<RankedResult> {
	if !cfg.enabled {
		return candidates.into_iter().take(cfg.max_results).map(pass_through).collect();
	}

	let query_tokens = text::unique_tokens(query);
	let mut ranked: Vec<RankedResult> = candidates
		.into_iter()
		.map(|candidate| {
			let (score, stats) =
				score_candidate(&query_tokens, &candidate, classification.query_type, weights);
			let confidence = score.clamp(weights.min_confidence, weights.max_confidence);

			RankedResult {
				source: candidate.source,
				text: candidate.text,
				raw_score: candidate.raw_score,
				rerank_score: score,
				confidence,
				metadata: candidate.metadata,
				match_stats: Some(stats),
			}
		})
		.collect();

	ranked.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
	ranked.retain(|result| result.confidence >= cfg.confidence_threshold);
	ranked.truncate(cfg.max_results);

	ranked
}

/// Returns the unclamped score and the terms it was built from.
pub fn score_candidate(
	query_tokens: &[String],
	candidate: &Candidate,
	query_type: QueryType,
	weights: &datalive_config::Rerank,
) -> (f32, MatchStats) {
	let text_tokens = text::tokenize(&candidate.text);
	let mut first_position: HashMap<&str, usize> = HashMap::new();

	for (idx, token) in text_tokens.iter().enumerate() {
		first_position.entry(token.as_str()).or_insert(idx);
	}

	let text_set: HashSet<&str> = first_position.keys().copied().collect();
	let mut exact_matches = 0_u32;
	let mut partial_matches = 0_u32;
	let mut position_sum = 0.0_f32;

	for token in query_tokens {
		if let Some(position) = first_position.get(token.as_str()) {
			exact_matches += 1;
			position_sum += 1.0 - *position as f32 / text_tokens.len() as f32;
		} else if text_set.iter().any(|term| term.contains(token.as_str()) || token.contains(term)) {
			partial_matches += 1;
		}
	}

	let query_terms = query_tokens.len();
	let exact_match_ratio = ratio(exact_matches as usize, query_terms);
	let partial_match_ratio =
		weights.partial_discount * ratio(partial_matches as usize, query_terms);
	let position_score =
		if exact_matches == 0 { 0.0 } else { position_sum / exact_matches as f32 };
	let match_density = ratio(exact_matches as usize, text_tokens.len());
	let length_norm = length_norm(candidate.text.chars().count(), weights);
	let type_bonus = type_bonus(candidate, query_type, weights);
	let raw = candidate.raw_score.clamp(0.0, 1.0);
	let base = weights.exact_weight * exact_match_ratio
		+ weights.partial_weight * partial_match_ratio
		+ weights.position_weight * position_score
		+ weights.density_weight * match_density
		+ weights.raw_score_weight * raw;
	let stats = MatchStats {
		query_terms: query_terms as u32,
		text_terms: text_tokens.len() as u32,
		exact_matches,
		partial_matches,
		exact_match_ratio,
		partial_match_ratio,
		position_score,
		match_density,
		length_norm,
		type_bonus,
	};

	(base * length_norm * type_bonus, stats)
}

fn pass_through(candidate: Candidate) -> RankedResult {
	RankedResult {
		source: candidate.source,
		text: candidate.text,
		raw_score: candidate.raw_score,
		rerank_score: candidate.raw_score,
		confidence: candidate.raw_score.clamp(0.0, 1.0),
		metadata: candidate.metadata,
		match_stats: None,
	}
}

fn ratio(numerator: usize, denominator: usize) -> f32 {
	if denominator == 0 { 0.0 } else { numerator as f32 / denominator as f32 }
}

fn length_norm(chars: usize, weights: &datalive_config::Rerank) -> f32 {
	if chars < weights.short_text_chars as usize {
		weights.short_text_norm
	} else if chars > weights.long_text_chars as usize {
		weights.long_text_norm
	} else {
		1.0
	}
}

fn type_bonus(
	candidate: &Candidate,
	query_type: QueryType,
	weights: &datalive_config::Rerank,
) -> f32 {
	match query_type {
		QueryType::Temporal if candidate.metadata.has_temporal() => weights.temporal_bonus,
		QueryType::Relational if candidate.metadata.has_relation() => weights.relational_bonus,
		_ => 1.0,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{CandidateMetadata, SourceTag};

	fn candidate(text: &str, raw_score: f32) -> Candidate {
		Candidate {
			source: SourceTag::Vector,
			text: text.to_string(),
			raw_score,
			metadata: CandidateMetadata::default(),
		}
	}

	fn tokens(query: &str) -> Vec<String> {
		text::unique_tokens(query)
	}

	#[test]
	fn earlier_matches_score_higher() {
		let weights = datalive_config::Rerank::default();
		let query = tokens("pipeline");
		let early = candidate("pipeline stages are described in the operations handbook", 0.5);
		let late = candidate("the operations handbook describes every stage of the pipeline", 0.5);
		let (early_score, early_stats) =
			score_candidate(&query, &early, QueryType::General, &weights);
		let (late_score, late_stats) = score_candidate(&query, &late, QueryType::General, &weights);

		assert!(early_stats.position_score > late_stats.position_score);
		assert!(early_score > late_score);
	}

	#[test]
	fn substring_overlap_counts_as_partial() {
		let weights = datalive_config::Rerank::default();
		let query = tokens("ingest");
		let doc = candidate("ingestion runs nightly across every configured workspace", 0.0);
		let (_, stats) = score_candidate(&query, &doc, QueryType::General, &weights);

		assert_eq!(stats.exact_matches, 0);
		assert_eq!(stats.partial_matches, 1);
		assert!((stats.partial_match_ratio - 0.5).abs() < 1e-6);
	}

	#[test]
	fn length_norm_penalizes_short_and_long_texts() {
		let weights = datalive_config::Rerank::default();

		assert!((length_norm(10, &weights) - 0.5).abs() < 1e-6);
		assert!((length_norm(500, &weights) - 1.0).abs() < 1e-6);
		assert!((length_norm(6_000, &weights) - 0.8).abs() < 1e-6);
	}

	#[test]
	fn disabled_rerank_passes_through_capped() {
		let weights = datalive_config::Rerank::default();
		let classification = Classification {
			query_type: QueryType::General,
			complexity: crate::Complexity::Simple,
			strategy: crate::Strategy::Rag,
			strategy_overridden: false,
			pattern_scores: Default::default(),
			tokens: Vec::new(),
		};
		let candidates = (0..5).map(|i| candidate(&format!("doc {i}"), 0.05)).collect();
		let cfg = RerankConfig { enabled: false, max_results: 3, confidence_threshold: 0.9 };
		let ranked = rerank("anything", candidates, &classification, &weights, &cfg);

		assert_eq!(ranked.len(), 3);
		assert_eq!(ranked[0].text, "doc 0");
		assert!(ranked.iter().all(|result| result.match_stats.is_none()));
	}
}
