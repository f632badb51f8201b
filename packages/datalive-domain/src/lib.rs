pub mod candidate;
pub mod classifier;
pub mod rerank;
pub mod text;
pub mod time_serde;
pub mod ttl;
pub mod window;

pub use candidate::{Candidate, CandidateMetadata, MatchStats, RankedResult, RelationRef, SourceTag};
pub use classifier::{
	Classification, ClassifyError, Classifier, Complexity, PatternScores, QueryType, Strategy,
	UnknownStrategy,
};
pub use rerank::RerankConfig;
pub use ttl::{TtlClass, TtlTable};
