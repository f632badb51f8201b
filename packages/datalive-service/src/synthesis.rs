use std::sync::Arc;

use serde_json::Value;

use datalive_config::LlmProviderConfig;
use datalive_domain::{Classification, Complexity, QueryType, RankedResult, text};

use crate::CompletionProvider;

/// Prefix of every answer produced without a successful model call.
pub const INSUFFICIENT_INFORMATION: &str = "INSUFFICIENT_INFORMATION:";

const SUMMARY_ITEMS: usize = 3;
const SUMMARY_SNIPPET_CHARS: usize = 200;
const SYSTEM_PROMPT: &str = "\
You answer questions strictly from the numbered evidence provided by the user message.
Rules:
- Use only facts stated in the evidence. Do not rely on prior knowledge.
- Cite every claim with the evidence number in square brackets, for example [2].
- If the evidence does not answer the question, say so plainly instead of guessing.
- Answer in the language the question is written in.
- Be concise.";

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
	pub answer: String,
	/// Model that produced the answer; `None` when every attempt failed.
	pub model: Option<String>,
	/// True when the first attempt failed and the light model was retried.
	pub retried: bool,
	pub aggregate_confidence: f32,
}
impl SynthesisOutcome {
	pub fn succeeded(&self) -> bool {
		self.model.is_some()
	}
}

pub struct Synthesizer {
	cfg: datalive_config::Synthesis,
	llm: LlmProviderConfig,
	completion: Arc<dyn CompletionProvider>,
}
impl Synthesizer {
	pub fn new(
		cfg: datalive_config::Synthesis,
		llm: LlmProviderConfig,
		completion: Arc<dyn CompletionProvider>,
	) -> Self {
		Self { cfg, llm, completion }
	}

	/// Never fails: when both the chosen model and the light retry fail, the answer becomes an
	/// explicit insufficient-information marker followed by an evidence summary.
	pub async fn synthesize(
		&self,
		query: &str,
		ranked: &[RankedResult],
		classification: &Classification,
	) -> SynthesisOutcome {
		let aggregate_confidence = aggregate_confidence(ranked, self.cfg.max_evidence as usize);
		let messages = build_messages(
			query,
			ranked,
			classification,
			self.cfg.max_evidence as usize,
			self.cfg.evidence_snippet_chars as usize,
		);
		let (model, max_tokens) = self.select_model(classification);

		match self.completion.complete(&self.llm, model, max_tokens, &messages).await {
			Ok(answer) => {
				return SynthesisOutcome {
					answer,
					model: Some(model.to_string()),
					retried: false,
					aggregate_confidence,
				};
			},
			Err(err) => {
				tracing::warn!(
					error = %err,
					model,
					fallback_model = self.cfg.light_model.as_str(),
					"Synthesis failed; retrying on the light model."
				);
			},
		}

		let light = self.cfg.light_model.as_str();

		match self.completion.complete(&self.llm, light, self.cfg.light_max_tokens, &messages).await
		{
			Ok(answer) => SynthesisOutcome {
				answer,
				model: Some(light.to_string()),
				retried: true,
				aggregate_confidence,
			},
			Err(err) => {
				tracing::error!(error = %err, model = light, "Synthesis fallback failed.");

				SynthesisOutcome {
					answer: insufficient_information(ranked),
					model: None,
					retried: true,
					aggregate_confidence,
				}
			},
		}
	}

	fn select_model(&self, classification: &Classification) -> (&str, u32) {
		let complex = classification.complexity == Complexity::Complex
			|| classification.query_type == QueryType::Complex;

		if complex {
			(self.cfg.primary_model.as_str(), self.cfg.primary_max_tokens)
		} else {
			(self.cfg.light_model.as_str(), self.cfg.light_max_tokens)
		}
	}
}

/// Mean confidence of the evidence that reaches the prompt.
pub fn aggregate_confidence(ranked: &[RankedResult], max_evidence: usize) -> f32 {
	let evidence = contributing(ranked, max_evidence);

	if evidence.is_empty() {
		return 0.0;
	}

	evidence.iter().map(|result| result.confidence).sum::<f32>() / evidence.len() as f32
}

/// The `max_evidence` most confident results, strongest first.
fn contributing(ranked: &[RankedResult], max_evidence: usize) -> Vec<&RankedResult> {
	let mut evidence: Vec<&RankedResult> = ranked.iter().collect();

	evidence.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
	evidence.truncate(max_evidence);

	evidence
}

/// Evidence is listed in descending confidence, numbered from 1 for citation.
pub(crate) fn build_messages(
	query: &str,
	ranked: &[RankedResult],
	classification: &Classification,
	max_evidence: usize,
	snippet_chars: usize,
) -> Vec<Value> {
	let evidence = contributing(ranked, max_evidence);
	let mut user = format!(
		"Question: {query}\nQuery type: {} | Complexity: {} | Strategy: {}\n\nEvidence:\n",
		classification.query_type.as_str(),
		classification.complexity.as_str(),
		classification.strategy.as_str(),
	);

	for (idx, result) in evidence.iter().enumerate() {
		user.push_str(&format!(
			"[{}] ({}, confidence {:.2}) {}\n",
			idx + 1,
			result.source.as_str(),
			result.confidence,
			text::truncate_chars(result.text.trim(), snippet_chars),
		));
	}

	vec![
		serde_json::json!({ "role": "system", "content": SYSTEM_PROMPT }),
		serde_json::json!({ "role": "user", "content": user }),
	]
}

fn insufficient_information(ranked: &[RankedResult]) -> String {
	if ranked.is_empty() {
		return format!("{INSUFFICIENT_INFORMATION} No supporting evidence was retrieved.");
	}

	let mut out = format!(
		"{INSUFFICIENT_INFORMATION} An answer could not be generated. Strongest evidence found:"
	);

	for (idx, result) in ranked.iter().take(SUMMARY_ITEMS).enumerate() {
		out.push_str(&format!(
			"\n[{}] ({}) {}",
			idx + 1,
			result.source.as_str(),
			text::truncate_chars(result.text.trim(), SUMMARY_SNIPPET_CHARS),
		));
	}

	out
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use datalive_domain::{CandidateMetadata, Classifier, SourceTag};

	use super::*;
	use crate::BoxFuture;

	struct ScriptedCompletion {
		failing_models: Vec<&'static str>,
		calls: Mutex<Vec<(String, u32)>>,
	}
	impl CompletionProvider for ScriptedCompletion {
		fn complete<'a>(
			&'a self,
			_cfg: &'a LlmProviderConfig,
			model: &'a str,
			max_tokens: u32,
			_messages: &'a [Value],
		) -> BoxFuture<'a, color_eyre::Result<String>> {
			self.calls
				.lock()
				.unwrap_or_else(|err| err.into_inner())
				.push((model.to_string(), max_tokens));

			let fail = self.failing_models.iter().any(|failing| *failing == model);

			Box::pin(async move {
				if fail {
					Err(color_eyre::eyre::eyre!("model {model} unavailable"))
				} else {
					Ok(format!("answer from {model} [1]"))
				}
			})
		}
	}

	fn synth_cfg() -> datalive_config::Synthesis {
		datalive_config::Synthesis {
			primary_model: "big".to_string(),
			primary_max_tokens: 2_000,
			light_model: "small".to_string(),
			light_max_tokens: 500,
			max_evidence: 2,
			evidence_snippet_chars: 10,
		}
	}

	fn llm_cfg() -> LlmProviderConfig {
		LlmProviderConfig {
			provider_id: "p".to_string(),
			api_base: "http://localhost".to_string(),
			api_key: "key".to_string(),
			path: "/".to_string(),
			temperature: 0.1,
			timeout_ms: 1_000,
			default_headers: Default::default(),
		}
	}

	fn ranked(text: &str, confidence: f32) -> RankedResult {
		RankedResult {
			source: SourceTag::Vector,
			text: text.to_string(),
			raw_score: confidence,
			rerank_score: confidence,
			confidence,
			metadata: CandidateMetadata::default(),
			match_stats: None,
		}
	}

	fn classify(query: &str) -> Classification {
		Classifier::new(&datalive_config::Classifier::default(), 10_000)
			.classify(query, None)
			.expect("classify")
	}

	fn synthesizer(failing_models: Vec<&'static str>) -> (Synthesizer, Arc<ScriptedCompletion>) {
		let completion = Arc::new(ScriptedCompletion { failing_models, calls: Mutex::new(vec![]) });

		(Synthesizer::new(synth_cfg(), llm_cfg(), completion.clone()), completion)
	}

	fn calls(completion: &ScriptedCompletion) -> Vec<(String, u32)> {
		completion.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	#[tokio::test]
	async fn complex_queries_use_primary_model() {
		let (synth, completion) = synthesizer(vec![]);
		let classification = classify("compare and analyze the ingestion strategy tradeoffs");
		let outcome = synth.synthesize("q", &[ranked("evidence", 0.9)], &classification).await;

		assert_eq!(outcome.model.as_deref(), Some("big"));
		assert_eq!(calls(&completion), vec![("big".to_string(), 2_000)]);
	}

	#[tokio::test]
	async fn failure_retries_once_on_light_model() {
		let (synth, completion) = synthesizer(vec!["big"]);
		let classification = classify("compare and analyze the ingestion strategy tradeoffs");
		let outcome = synth.synthesize("q", &[ranked("evidence", 0.9)], &classification).await;

		assert!(outcome.retried);
		assert_eq!(outcome.model.as_deref(), Some("small"));
		assert_eq!(calls(&completion).len(), 2);
	}

	#[tokio::test]
	async fn double_failure_yields_marker_with_summary() {
		let (synth, completion) = synthesizer(vec!["big", "small"]);
		let classification = classify("What is DataLive?");
		let evidence = [ranked("DataLive orchestrates retrieval.", 0.8), ranked("second", 0.6)];
		let outcome = synth.synthesize("What is DataLive?", &evidence, &classification).await;

		assert!(!outcome.succeeded());
		assert!(outcome.answer.starts_with(INSUFFICIENT_INFORMATION));
		assert!(outcome.answer.contains("DataLive orchestrates retrieval."));
		assert!((outcome.aggregate_confidence - 0.7).abs() < 1e-6);
		assert_eq!(calls(&completion), vec![
			("small".to_string(), 500),
			("small".to_string(), 500)
		]);
	}

	#[test]
	fn prompt_orders_truncates_and_caps_evidence() {
		let classification = classify("What is DataLive?");
		let evidence = [
			ranked("low confidence text", 0.3),
			ranked("high confidence text", 0.9),
			ranked("mid", 0.5),
		];
		let messages = build_messages("What is DataLive?", &evidence, &classification, 2, 10);
		let user = messages[1]["content"].as_str().expect("user content");

		assert!(user.contains("[1] (vector, confidence 0.90) high confi\n"));
		assert!(user.contains("[2] (vector, confidence 0.50) mid\n"));
		assert!(!user.contains("[3]"));
		assert!(user.contains("Query type: factual"));
	}

	#[test]
	fn aggregate_of_nothing_is_zero() {
		assert_eq!(aggregate_confidence(&[], 5), 0.0);
	}

	#[test]
	fn aggregate_averages_only_prompted_evidence() {
		let evidence = [ranked("low", 0.3), ranked("high", 0.9), ranked("mid", 0.5)];

		assert!((aggregate_confidence(&evidence, 2) - 0.7).abs() < 1e-6);
		assert!((aggregate_confidence(&evidence, 10) - (1.7 / 3.0)).abs() < 1e-6);
	}

	#[tokio::test]
	async fn outcome_confidence_ignores_evidence_past_the_prompt_cap() {
		let (synth, _) = synthesizer(vec![]);
		let classification = classify("What is DataLive?");
		let evidence = [ranked("a", 0.95), ranked("b", 0.85), ranked("c", 0.1)];
		let outcome = synth.synthesize("What is DataLive?", &evidence, &classification).await;

		assert!((outcome.aggregate_confidence - 0.9).abs() < 1e-6);
	}
}
