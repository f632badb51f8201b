use std::{collections::HashSet, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{SourceTag, text};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
	Temporal,
	Relational,
	Factual,
	Complex,
	General,
}
impl QueryType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Temporal => "temporal",
			Self::Relational => "relational",
			Self::Factual => "factual",
			Self::Complex => "complex",
			Self::General => "general",
		}
	}

	pub fn default_strategy(self) -> Strategy {
		match self {
			Self::Temporal => Strategy::Cag,
			Self::Relational => Strategy::Kag,
			Self::Complex => Strategy::Hybrid,
			Self::Factual | Self::General => Strategy::Rag,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
	Simple,
	Medium,
	Complex,
}
impl Complexity {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Simple => "simple",
			Self::Medium => "medium",
			Self::Complex => "complex",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Strategy {
	#[serde(rename = "RAG")]
	Rag,
	#[serde(rename = "KAG")]
	Kag,
	#[serde(rename = "CAG")]
	Cag,
	#[serde(rename = "Hybrid")]
	Hybrid,
}
impl Strategy {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Rag => "RAG",
			Self::Kag => "KAG",
			Self::Cag => "CAG",
			Self::Hybrid => "Hybrid",
		}
	}

	/// Backends dispatched for this strategy.
	pub fn sources(self) -> &'static [SourceTag] {
		match self {
			Self::Rag => &[SourceTag::Vector],
			Self::Kag => &[SourceTag::Graph],
			Self::Cag => &[SourceTag::Context],
			Self::Hybrid => &[SourceTag::Vector, SourceTag::Graph, SourceTag::Context],
		}
	}

	/// Parses a request override. `auto` (and an absent value upstream) means no override.
	pub fn parse_override(raw: &str) -> Result<Option<Self>, UnknownStrategy> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"auto" => Ok(None),
			other => other.parse().map(Some),
		}
	}
}
impl fmt::Display for Strategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for Strategy {
	type Err = UnknownStrategy;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"rag" => Ok(Self::Rag),
			"kag" => Ok(Self::Kag),
			"cag" => Ok(Self::Cag),
			"hybrid" => Ok(Self::Hybrid),
			_ => Err(UnknownStrategy { value: raw.to_string() }),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown strategy {value:?}; expected one of auto, rag, kag, cag, hybrid.")]
pub struct UnknownStrategy {
	pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
	#[error("Query must not be empty.")]
	Empty,
	#[error("Query has {chars} characters; the limit is {max}.")]
	TooLong { chars: usize, max: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternScores {
	pub temporal: u32,
	pub relational: u32,
	pub factual: u32,
	pub complex: u32,
}
impl PatternScores {
	fn max(&self) -> u32 {
		self.temporal.max(self.relational).max(self.factual).max(self.complex)
	}

	fn any_equal(&self, value: u32) -> bool {
		[self.temporal, self.relational, self.factual, self.complex].contains(&value)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
	pub query_type: QueryType,
	pub complexity: Complexity,
	pub strategy: Strategy,
	pub strategy_overridden: bool,
	pub pattern_scores: PatternScores,
	/// Normalized query tokens in order of appearance.
	pub tokens: Vec<String>,
}

/// Keyword-driven intent classifier. Built once from config and shared read-only.
#[derive(Debug, Clone)]
pub struct Classifier {
	temporal: HashSet<String>,
	relational: HashSet<String>,
	factual: HashSet<String>,
	complex: HashSet<String>,
	medium_token_count: usize,
	complex_token_count: usize,
	max_query_chars: usize,
}
impl Classifier {
	pub fn new(cfg: &datalive_config::Classifier, max_query_chars: u32) -> Self {
		Self {
			temporal: keyword_set(&cfg.temporal),
			relational: keyword_set(&cfg.relational),
			factual: keyword_set(&cfg.factual),
			complex: keyword_set(&cfg.complex),
			medium_token_count: cfg.medium_token_count as usize,
			complex_token_count: cfg.complex_token_count as usize,
			max_query_chars: max_query_chars as usize,
		}
	}

	pub fn from_config(cfg: &datalive_config::Config) -> Self {
		Self::new(&cfg.classifier, cfg.query.max_query_chars)
	}

	pub fn max_query_chars(&self) -> usize {
		self.max_query_chars
	}

	pub fn classify(
		&self,
		query: &str,
		strategy_override: Option<Strategy>,
	) -> Result<Classification, ClassifyError> {
		let trimmed = query.trim();

		if trimmed.is_empty() {
			return Err(ClassifyError::Empty);
		}

		let chars = trimmed.chars().count();

		if chars > self.max_query_chars {
			return Err(ClassifyError::TooLong { chars, max: self.max_query_chars });
		}

		let tokens = text::tokenize(trimmed);
		let token_set: HashSet<&str> = tokens.iter().map(String::as_str).collect();
		let pattern_scores = PatternScores {
			temporal: count_hits(&token_set, &self.temporal),
			relational: count_hits(&token_set, &self.relational),
			factual: count_hits(&token_set, &self.factual),
			complex: count_hits(&token_set, &self.complex),
		};
		let query_type = resolve_query_type(&pattern_scores);
		let complexity = self.resolve_complexity(tokens.len(), &pattern_scores);
		let strategy = strategy_override.unwrap_or_else(|| query_type.default_strategy());

		Ok(Classification {
			query_type,
			complexity,
			strategy,
			strategy_overridden: strategy_override.is_some(),
			pattern_scores,
			tokens,
		})
	}

	fn resolve_complexity(&self, token_count: usize, scores: &PatternScores) -> Complexity {
		if token_count > self.complex_token_count || scores.max() > 1 {
			Complexity::Complex
		} else if token_count > self.medium_token_count || scores.any_equal(1) {
			Complexity::Medium
		} else {
			Complexity::Simple
		}
	}
}

fn keyword_set(keywords: &[String]) -> HashSet<String> {
	keywords.iter().map(|keyword| text::fold(keyword.trim())).filter(|k| !k.is_empty()).collect()
}

fn count_hits(tokens: &HashSet<&str>, keywords: &HashSet<String>) -> u32 {
	keywords.iter().filter(|keyword| tokens.contains(keyword.as_str())).count() as u32
}

/// Highest score wins; ties resolve temporal, relational, complex, factual in that order.
fn resolve_query_type(scores: &PatternScores) -> QueryType {
	let ranked = [
		(QueryType::Temporal, scores.temporal),
		(QueryType::Relational, scores.relational),
		(QueryType::Complex, scores.complex),
		(QueryType::Factual, scores.factual),
	];
	let best = scores.max();

	if best == 0 {
		return QueryType::General;
	}

	ranked
		.into_iter()
		.find(|(_, score)| *score == best)
		.map(|(query_type, _)| query_type)
		.unwrap_or(QueryType::General)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn classifier() -> Classifier {
		Classifier::new(&datalive_config::Classifier::default(), 10_000)
	}

	#[test]
	fn ties_prefer_temporal_then_relational_then_complex() {
		let scores = PatternScores { temporal: 1, relational: 1, factual: 1, complex: 1 };

		assert_eq!(resolve_query_type(&scores), QueryType::Temporal);

		let scores = PatternScores { temporal: 0, relational: 2, factual: 0, complex: 2 };

		assert_eq!(resolve_query_type(&scores), QueryType::Relational);

		let scores = PatternScores { temporal: 0, relational: 0, factual: 1, complex: 1 };

		assert_eq!(resolve_query_type(&scores), QueryType::Complex);
	}

	#[test]
	fn no_keywords_is_general_and_simple() {
		let classification = classifier().classify("datalive onboarding", None).expect("classify");

		assert_eq!(classification.query_type, QueryType::General);
		assert_eq!(classification.complexity, Complexity::Simple);
		assert_eq!(classification.strategy, Strategy::Rag);
	}

	#[test]
	fn long_queries_are_complex() {
		let query = (0..21).map(|i| format!("token{i}")).collect::<Vec<_>>().join(" ");
		let classification = classifier().classify(&query, None).expect("classify");

		assert_eq!(classification.complexity, Complexity::Complex);

		let query = (0..11).map(|i| format!("token{i}")).collect::<Vec<_>>().join(" ");
		let classification = classifier().classify(&query, None).expect("classify");

		assert_eq!(classification.complexity, Complexity::Medium);
	}

	#[test]
	fn override_replaces_strategy_only() {
		let classification = classifier()
			.classify("¿Cuándo se lanzó el sistema?", Some(Strategy::Hybrid))
			.expect("classify");

		assert_eq!(classification.query_type, QueryType::Temporal);
		assert_eq!(classification.strategy, Strategy::Hybrid);
		assert!(classification.strategy_overridden);
	}

	#[test]
	fn parses_overrides() {
		assert_eq!(Strategy::parse_override("auto"), Ok(None));
		assert_eq!(Strategy::parse_override("KAG"), Ok(Some(Strategy::Kag)));
		assert!(Strategy::parse_override("graph").is_err());
	}
}
