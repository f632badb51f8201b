mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Cache, CacheTtlSecs, Classifier, Config, EmbeddingProviderConfig, LlmProviderConfig, Postgres,
	Providers, Qdrant, Query, Rerank, Retrieval, Service, Storage, Synthesis,
};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	parse(&raw).map_err(|err| match err {
		ParseFailure::Toml(source) => Error::ParseConfig { path: path.to_path_buf(), source },
		ParseFailure::Invalid(err) => err,
	})
}

pub fn from_toml_str(raw: &str) -> Result<Config> {
	parse(raw).map_err(|err| match err {
		ParseFailure::Toml(source) =>
			Error::ParseConfig { path: std::path::PathBuf::from("<inline>"), source },
		ParseFailure::Invalid(err) => err,
	})
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(validation("service.http_bind must be non-empty."));
	}
	if cfg.service.admin_bind.trim().is_empty() {
		return Err(validation("service.admin_bind must be non-empty."));
	}
	if cfg.service.request_timeout_ms == 0 {
		return Err(validation("service.request_timeout_ms must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(validation("providers.embedding.dimensions must be greater than zero."));
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(validation(
			"providers.embedding.dimensions must match storage.qdrant.vector_dim.",
		));
	}
	if cfg.storage.qdrant.text_field.trim().is_empty() {
		return Err(validation("storage.qdrant.text_field must be non-empty."));
	}

	for (label, key) in
		[("embedding", &cfg.providers.embedding.api_key), ("llm", &cfg.providers.llm.api_key)]
	{
		if key.trim().is_empty() {
			return Err(validation(format!("Provider {label} api_key must be non-empty.")));
		}
	}
	for (label, timeout_ms) in [
		("providers.embedding.timeout_ms", cfg.providers.embedding.timeout_ms),
		("providers.llm.timeout_ms", cfg.providers.llm.timeout_ms),
		("retrieval.adapter_timeout_ms", cfg.retrieval.adapter_timeout_ms),
	] {
		if timeout_ms == 0 {
			return Err(validation(format!("{label} must be greater than zero.")));
		}
	}

	validate_query(&cfg.query)?;
	validate_classifier(&cfg.classifier)?;
	validate_retrieval(&cfg.retrieval)?;
	validate_rerank(&cfg.rerank)?;
	validate_synthesis(&cfg.synthesis)?;
	validate_cache(&cfg.cache)?;

	Ok(())
}

enum ParseFailure {
	Toml(toml::de::Error),
	Invalid(Error),
}

fn parse(raw: &str) -> std::result::Result<Config, ParseFailure> {
	let mut cfg: Config = toml::from_str(raw).map_err(ParseFailure::Toml)?;

	normalize(&mut cfg);

	validate(&cfg).map_err(ParseFailure::Invalid)?;

	Ok(cfg)
}

fn validate_query(query: &Query) -> Result<()> {
	if query.max_query_chars == 0 {
		return Err(validation("query.max_query_chars must be greater than zero."));
	}
	if query.max_results_limit == 0 {
		return Err(validation("query.max_results_limit must be greater than zero."));
	}
	if query.default_max_results == 0 || query.default_max_results > query.max_results_limit {
		return Err(validation(
			"query.default_max_results must be in the range 1-query.max_results_limit.",
		));
	}
	if !query.min_confidence_threshold.is_finite()
		|| !(0.0..=1.0).contains(&query.min_confidence_threshold)
	{
		return Err(validation("query.min_confidence_threshold must be in the range 0.0-1.0."));
	}
	if !query.default_confidence_threshold.is_finite()
		|| query.default_confidence_threshold < query.min_confidence_threshold
		|| query.default_confidence_threshold > 1.0
	{
		return Err(validation(
			"query.default_confidence_threshold must be between query.min_confidence_threshold and 1.0.",
		));
	}

	Ok(())
}

fn validate_classifier(classifier: &Classifier) -> Result<()> {
	for (label, keywords) in [
		("classifier.temporal", &classifier.temporal),
		("classifier.relational", &classifier.relational),
		("classifier.factual", &classifier.factual),
		("classifier.complex", &classifier.complex),
	] {
		if keywords.is_empty() {
			return Err(validation(format!("{label} must contain at least one keyword.")));
		}
	}

	if classifier.medium_token_count >= classifier.complex_token_count {
		return Err(validation(
			"classifier.medium_token_count must be less than classifier.complex_token_count.",
		));
	}

	Ok(())
}

fn validate_retrieval(retrieval: &Retrieval) -> Result<()> {
	for (label, value) in [
		("retrieval.vector_top_k", retrieval.vector_top_k),
		("retrieval.graph_limit", retrieval.graph_limit),
		("retrieval.graph_max_depth", retrieval.graph_max_depth),
		("retrieval.context_default_window_days", retrieval.context_default_window_days),
		("retrieval.context_limit", retrieval.context_limit),
	] {
		if value == 0 {
			return Err(validation(format!("{label} must be greater than zero.")));
		}
	}

	if let Some(min_score) = retrieval.vector_min_score
		&& !min_score.is_finite()
	{
		return Err(validation("retrieval.vector_min_score must be a finite number."));
	}
	if !retrieval.context_confidence_floor.is_finite()
		|| !(0.0..=1.0).contains(&retrieval.context_confidence_floor)
	{
		return Err(validation("retrieval.context_confidence_floor must be in the range 0.0-1.0."));
	}

	Ok(())
}

fn validate_rerank(rerank: &Rerank) -> Result<()> {
	for (label, value) in [
		("rerank.exact_weight", rerank.exact_weight),
		("rerank.partial_weight", rerank.partial_weight),
		("rerank.partial_discount", rerank.partial_discount),
		("rerank.position_weight", rerank.position_weight),
		("rerank.density_weight", rerank.density_weight),
		("rerank.raw_score_weight", rerank.raw_score_weight),
		("rerank.short_text_norm", rerank.short_text_norm),
		("rerank.long_text_norm", rerank.long_text_norm),
		("rerank.temporal_bonus", rerank.temporal_bonus),
		("rerank.relational_bonus", rerank.relational_bonus),
	] {
		if !value.is_finite() {
			return Err(validation(format!("{label} must be a finite number.")));
		}
		if value < 0.0 {
			return Err(validation(format!("{label} must be zero or greater.")));
		}
	}

	if rerank.short_text_chars >= rerank.long_text_chars {
		return Err(validation("rerank.short_text_chars must be less than rerank.long_text_chars."));
	}
	if !rerank.min_confidence.is_finite()
		|| !rerank.max_confidence.is_finite()
		|| rerank.min_confidence < 0.0
		|| rerank.min_confidence > rerank.max_confidence
		|| rerank.max_confidence > 1.0
	{
		return Err(validation(
			"rerank.min_confidence and rerank.max_confidence must satisfy 0.0 <= min <= max <= 1.0.",
		));
	}

	Ok(())
}

fn validate_synthesis(synthesis: &Synthesis) -> Result<()> {
	for (label, model) in [
		("synthesis.primary_model", &synthesis.primary_model),
		("synthesis.light_model", &synthesis.light_model),
	] {
		if model.trim().is_empty() {
			return Err(validation(format!("{label} must be non-empty.")));
		}
	}
	for (label, value) in [
		("synthesis.primary_max_tokens", synthesis.primary_max_tokens),
		("synthesis.light_max_tokens", synthesis.light_max_tokens),
		("synthesis.max_evidence", synthesis.max_evidence),
		("synthesis.evidence_snippet_chars", synthesis.evidence_snippet_chars),
	] {
		if value == 0 {
			return Err(validation(format!("{label} must be greater than zero.")));
		}
	}

	Ok(())
}

fn validate_cache(cache: &Cache) -> Result<()> {
	if !matches!(cache.backend.as_str(), "memory" | "postgres") {
		return Err(validation("cache.backend must be one of memory or postgres."));
	}
	if cache.max_entries == 0 {
		return Err(validation("cache.max_entries must be greater than zero."));
	}
	if cache.purge_interval_secs == 0 {
		return Err(validation("cache.purge_interval_secs must be greater than zero."));
	}

	for (label, secs) in [
		("cache.ttl_secs.factual", cache.ttl_secs.factual),
		("cache.ttl_secs.analytical", cache.ttl_secs.analytical),
		("cache.ttl_secs.temporal", cache.ttl_secs.temporal),
		("cache.ttl_secs.personal", cache.ttl_secs.personal),
	] {
		if secs == 0 {
			return Err(validation(format!("{label} must be greater than zero.")));
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.cache.backend = cfg.cache.backend.trim().to_lowercase();

	for keywords in [
		&mut cfg.classifier.temporal,
		&mut cfg.classifier.relational,
		&mut cfg.classifier.factual,
		&mut cfg.classifier.complex,
	] {
		keywords.retain(|keyword| !keyword.trim().is_empty());

		for keyword in keywords.iter_mut() {
			*keyword = keyword.trim().to_lowercase();
		}
	}
}

fn validation(message: impl Into<String>) -> Error {
	Error::Validation { message: message.into() }
}
