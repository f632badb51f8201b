use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::QueryType;

/// Cache lifetime buckets. Session-scoped answers always expire fastest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtlClass {
	Factual,
	Analytical,
	Temporal,
	Personal,
}
impl TtlClass {
	pub fn select(query_type: QueryType, session_scoped: bool) -> Self {
		if session_scoped {
			return Self::Personal;
		}

		match query_type {
			QueryType::Temporal => Self::Temporal,
			QueryType::Relational | QueryType::Complex => Self::Analytical,
			QueryType::Factual | QueryType::General => Self::Factual,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Factual => "factual",
			Self::Analytical => "analytical",
			Self::Temporal => "temporal",
			Self::Personal => "personal",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlTable {
	factual: Duration,
	analytical: Duration,
	temporal: Duration,
	personal: Duration,
}
impl TtlTable {
	pub fn from_config(cfg: &datalive_config::Cache) -> Self {
		Self {
			factual: Duration::from_secs(cfg.ttl_secs.factual),
			analytical: Duration::from_secs(cfg.ttl_secs.analytical),
			temporal: Duration::from_secs(cfg.ttl_secs.temporal),
			personal: Duration::from_secs(cfg.ttl_secs.personal),
		}
	}

	pub fn duration(&self, class: TtlClass) -> Duration {
		match class {
			TtlClass::Factual => self.factual,
			TtlClass::Analytical => self.analytical,
			TtlClass::Temporal => self.temporal,
			TtlClass::Personal => self.personal,
		}
	}
}
impl Default for TtlTable {
	fn default() -> Self {
		Self::from_config(&datalive_config::Cache::default())
	}
}
