use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub query: Query,
	#[serde(default)]
	pub classifier: Classifier,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub rerank: Rerank,
	pub synthesis: Synthesis,
	#[serde(default)]
	pub cache: Cache,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
	/// Overall deadline for one uncached request: fan-out, rerank and synthesis together.
	#[serde(default = "default_request_timeout_ms")]
	pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
	/// Payload field holding the chunk text.
	#[serde(default = "default_text_field")]
	pub text_field: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// Connection settings for the chat-completion endpoint. Model names live in [`Synthesis`] so
/// one endpoint can serve both the primary and the light model.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Query {
	pub max_query_chars: u32,
	pub default_max_results: u32,
	pub max_results_limit: u32,
	pub default_confidence_threshold: f32,
	pub min_confidence_threshold: f32,
}
impl Default for Query {
	fn default() -> Self {
		Self {
			max_query_chars: 10_000,
			default_max_results: 10,
			max_results_limit: 50,
			default_confidence_threshold: 0.7,
			min_confidence_threshold: 0.1,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Classifier {
	pub temporal: Vec<String>,
	pub relational: Vec<String>,
	pub factual: Vec<String>,
	pub complex: Vec<String>,
	/// Queries with more tokens than this are at least medium complexity.
	pub medium_token_count: u32,
	/// Queries with more tokens than this are complex.
	pub complex_token_count: u32,
}
impl Default for Classifier {
	fn default() -> Self {
		Self {
			temporal: words(&[
				"cuándo", "ayer", "hoy", "fecha", "fechas", "historia", "histórico", "cronología",
				"evolución", "cambió", "cambios", "reciente", "recientes", "último", "últimos",
				"antes", "después", "desde", "semana", "mes", "año", "when", "yesterday", "today",
				"date", "dates", "history", "historical", "timeline", "recent", "recently",
				"latest", "last", "before", "after", "since", "week", "month", "year", "changed",
				"changes", "evolution",
			]),
			relational: words(&[
				"relación", "relaciones", "relacionado", "relacionados", "conexión", "conecta",
				"quién", "quiénes", "depende", "dependencia", "entre", "vinculado", "pertenece",
				"jerarquía", "equipo", "relationship", "relationships", "related", "relation",
				"connected", "connection", "connects", "between", "depends", "dependency",
				"dependencies", "who", "whom", "belongs", "linked", "reports", "hierarchy", "team",
				"owns", "owner",
			]),
			factual: words(&[
				"cuál", "cuáles", "define", "definición", "significa", "significado", "explica",
				"describe", "dónde", "cuánto", "cuántos", "what", "which", "definition", "meaning",
				"means", "explain", "where", "many", "much",
			]),
			complex: words(&[
				"analiza", "análisis", "compara", "comparación", "comparar", "diferencia",
				"diferencias", "ventajas", "desventajas", "impacto", "evalúa", "evaluar",
				"estrategia", "causas", "razones", "tendencia", "tendencias", "analyze", "analyse",
				"analysis", "compare", "comparison", "contrast", "difference", "differences",
				"advantages", "disadvantages", "impact", "evaluate", "evaluation", "tradeoffs",
				"pros", "cons", "why", "implications", "strategy", "trends", "summarize",
			]),
			medium_token_count: 10,
			complex_token_count: 20,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub adapter_timeout_ms: u64,
	pub vector_top_k: u32,
	pub vector_min_score: Option<f32>,
	pub graph_limit: u32,
	pub graph_max_depth: u32,
	pub context_default_window_days: u32,
	pub context_limit: u32,
	pub context_confidence_floor: f32,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self {
			adapter_timeout_ms: 3_000,
			vector_top_k: 20,
			vector_min_score: None,
			graph_limit: 20,
			graph_max_depth: 2,
			context_default_window_days: 180,
			context_limit: 20,
			context_confidence_floor: 0.5,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rerank {
	pub exact_weight: f32,
	pub partial_weight: f32,
	/// Discount applied to substring matches before `partial_weight`.
	pub partial_discount: f32,
	pub position_weight: f32,
	pub density_weight: f32,
	pub raw_score_weight: f32,
	pub short_text_chars: u32,
	pub short_text_norm: f32,
	pub long_text_chars: u32,
	pub long_text_norm: f32,
	pub temporal_bonus: f32,
	pub relational_bonus: f32,
	pub min_confidence: f32,
	pub max_confidence: f32,
}
impl Default for Rerank {
	fn default() -> Self {
		Self {
			exact_weight: 0.4,
			partial_weight: 0.2,
			partial_discount: 0.5,
			position_weight: 0.2,
			density_weight: 0.1,
			raw_score_weight: 0.1,
			short_text_chars: 50,
			short_text_norm: 0.5,
			long_text_chars: 5_000,
			long_text_norm: 0.8,
			temporal_bonus: 1.2,
			relational_bonus: 1.1,
			min_confidence: 0.1,
			max_confidence: 1.0,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
pub struct Synthesis {
	pub primary_model: String,
	pub primary_max_tokens: u32,
	pub light_model: String,
	pub light_max_tokens: u32,
	#[serde(default = "default_max_evidence")]
	pub max_evidence: u32,
	#[serde(default = "default_evidence_snippet_chars")]
	pub evidence_snippet_chars: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub enabled: bool,
	/// One of "memory" or "postgres".
	pub backend: String,
	pub max_entries: u64,
	/// Period of the sweep that deletes expired entries.
	pub purge_interval_secs: u64,
	pub ttl_secs: CacheTtlSecs,
}
impl Default for Cache {
	fn default() -> Self {
		Self {
			enabled: true,
			backend: "memory".to_string(),
			max_entries: 10_000,
			purge_interval_secs: 300,
			ttl_secs: CacheTtlSecs::default(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheTtlSecs {
	pub factual: u64,
	pub analytical: u64,
	pub temporal: u64,
	pub personal: u64,
}
impl Default for CacheTtlSecs {
	fn default() -> Self {
		Self { factual: 86_400, analytical: 14_400, temporal: 3_600, personal: 1_800 }
	}
}

fn words(raw: &[&str]) -> Vec<String> {
	raw.iter().map(|word| word.to_string()).collect()
}

fn default_request_timeout_ms() -> u64 {
	30_000
}

fn default_text_field() -> String {
	"content".to_string()
}

fn default_max_evidence() -> u32 {
	8
}

fn default_evidence_snippet_chars() -> u32 {
	600
}
