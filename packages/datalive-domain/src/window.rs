//! Lookback windows for context retrieval, derived from time words in the query.

const WINDOWS: &[(&[&str], u32)] = &[
	(&["ayer", "yesterday", "hoy", "today"], 1),
	(&["semana", "week"], 7),
	(&["mes", "month"], 30),
	(&["ano", "year"], 365),
];

/// Returns the narrowest window named by `tokens`, or `default_days` when none is named.
/// Tokens are expected to be folded (see [`crate::text::tokenize`]), so "año" arrives as "ano".
pub fn resolve_window_days(tokens: &[String], default_days: u32) -> u32 {
	WINDOWS
		.iter()
		.filter(|(words, _)| tokens.iter().any(|token| words.contains(&token.as_str())))
		.map(|(_, days)| *days)
		.min()
		.unwrap_or(default_days)
}
