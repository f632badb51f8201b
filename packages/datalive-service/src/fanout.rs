use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::task::JoinSet;

use datalive_domain::{Candidate, SourceTag, Strategy};

use crate::{AdapterFailure, AdapterQuery, Adapters, Error, FailureKind, Result};

#[derive(Debug, Clone, Default)]
pub struct FanOutOutcome {
	/// Concatenated in the strategy's source order, raw scores untouched.
	pub candidates: Vec<Candidate>,
	pub failures: Vec<AdapterFailure>,
}
impl FanOutOutcome {
	pub fn degraded(&self) -> bool {
		!self.failures.is_empty()
	}
}

/// Dispatches the adapters a strategy selects as concurrent tasks, each bounded by its own
/// timeout. Dropping the returned future aborts every task still running.
#[derive(Clone)]
pub struct FanOut {
	adapters: Adapters,
	adapter_timeout: Duration,
}
impl FanOut {
	pub fn new(adapters: Adapters, adapter_timeout: Duration) -> Self {
		Self { adapters, adapter_timeout }
	}

	pub fn adapters(&self) -> &Adapters {
		&self.adapters
	}

	pub async fn fetch(
		&self,
		query: Arc<AdapterQuery>,
		strategy: Strategy,
	) -> Result<FanOutOutcome> {
		let sources = strategy.sources();
		let mut failures = Vec::new();
		let mut tasks = JoinSet::new();
		let mut dispatched = Vec::with_capacity(sources.len());

		for &source in sources {
			let Some(adapter) = self.adapters.get(source) else {
				failures.push(AdapterFailure {
					source,
					kind: FailureKind::Error,
					message: "No adapter registered for this source.".to_string(),
				});

				continue;
			};
			let query = query.clone();
			let timeout = self.adapter_timeout;

			dispatched.push(source);
			tasks.spawn(async move {
				let result = match tokio::time::timeout(timeout, adapter.fetch(&query)).await {
					Ok(Ok(candidates)) => Ok(candidates),
					Ok(Err(err)) => Err((FailureKind::Error, err.to_string())),
					Err(_) => Err((
						FailureKind::Timeout,
						format!("No response within {} ms.", timeout.as_millis()),
					)),
				};

				(source, result)
			});
		}

		let mut by_source: HashMap<SourceTag, Vec<Candidate>> = HashMap::new();
		let mut panics = Vec::new();

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((source, Ok(candidates))) => {
					by_source.insert(source, candidates);
				},
				Ok((source, Err((kind, message)))) => {
					tracing::warn!(
						source = source.as_str(),
						kind = ?kind,
						error = %message,
						"Adapter failed."
					);

					failures.push(AdapterFailure { source, kind, message });
				},
				Err(err) => panics.push(err.to_string()),
			}
		}

		// A panicked task cannot report its source; attribute panics to the sources that never
		// reported back.
		let unreported: Vec<SourceTag> = dispatched
			.into_iter()
			.filter(|source| {
				!by_source.contains_key(source) && !failures.iter().any(|f| f.source == *source)
			})
			.collect();

		for (source, message) in unreported.into_iter().zip(panics) {
			tracing::error!(source = source.as_str(), error = %message, "Adapter task panicked.");

			failures.push(AdapterFailure { source, kind: FailureKind::Panicked, message });
		}

		if by_source.is_empty() {
			return Err(Error::Retrieval {
				message: format!("All {} dispatched adapters failed.", sources.len()),
				failures,
			});
		}

		failures.sort_by_key(|failure| failure.source);

		let candidates = sources
			.iter()
			.filter_map(|source| by_source.remove(source))
			.flatten()
			.collect();

		Ok(FanOutOutcome { candidates, failures })
	}
}
