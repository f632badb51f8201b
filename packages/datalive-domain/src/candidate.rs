use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Backend family a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
	Vector,
	Graph,
	Context,
}
impl SourceTag {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Vector => "vector",
			Self::Graph => "graph",
			Self::Context => "context",
		}
	}
}
impl fmt::Display for SourceTag {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRef {
	pub subject: String,
	pub predicate: String,
	pub object: String,
	/// Hops from the nearest seed entity; 1 means the relation touches a seed directly.
	pub depth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub entities: Vec<String>,
	#[serde(default, with = "crate::time_serde", skip_serializing_if = "Option::is_none")]
	pub timestamp: Option<OffsetDateTime>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub relation: Option<RelationRef>,
	/// Backend-specific payload carried through untouched.
	#[serde(default, skip_serializing_if = "Map::is_empty")]
	pub extra: Map<String, Value>,
}
impl CandidateMetadata {
	pub fn has_temporal(&self) -> bool {
		self.timestamp.is_some()
	}

	pub fn has_relation(&self) -> bool {
		self.relation.is_some()
	}
}

/// Raw evidence from one backend, before reranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
	pub source: SourceTag,
	pub text: String,
	pub raw_score: f32,
	pub metadata: CandidateMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
	pub query_terms: u32,
	pub text_terms: u32,
	pub exact_matches: u32,
	pub partial_matches: u32,
	pub exact_match_ratio: f32,
	pub partial_match_ratio: f32,
	pub position_score: f32,
	pub match_density: f32,
	pub length_norm: f32,
	pub type_bonus: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
	pub source: SourceTag,
	pub text: String,
	pub raw_score: f32,
	pub rerank_score: f32,
	pub confidence: f32,
	pub metadata: CandidateMetadata,
	/// Absent when reranking was disabled for the request.
	pub match_stats: Option<MatchStats>,
}
