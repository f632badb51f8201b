use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Tokens shorter than this many characters carry no signal for classification or reranking.
pub const MIN_TOKEN_CHARS: usize = 3;

/// Lowercases and strips diacritics so that "Cuándo" and "cuando" compare equal.
pub fn fold(text: &str) -> String {
	text.nfd().filter(|ch| !is_combining_mark(*ch)).flat_map(char::to_lowercase).collect()
}

/// Folds, splits on anything that is not alphanumeric, and drops short tokens. Order and
/// duplicates are preserved so callers can derive positions.
pub fn tokenize(text: &str) -> Vec<String> {
	let folded = fold(text);
	let mut normalized = String::with_capacity(folded.len());

	for ch in folded.chars() {
		if ch.is_alphanumeric() {
			normalized.push(ch);
		} else {
			normalized.push(' ');
		}
	}

	normalized
		.split_whitespace()
		.filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
		.map(str::to_string)
		.collect()
}

/// Like [`tokenize`] but keeps only the first occurrence of each token.
pub fn unique_tokens(text: &str) -> Vec<String> {
	let mut seen = std::collections::HashSet::new();

	tokenize(text).into_iter().filter(|token| seen.insert(token.clone())).collect()
}

/// Canonical form of a query for cache keys: trimmed, lowercased, whitespace collapsed.
pub fn normalize_query(query: &str) -> String {
	query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
	match text.char_indices().nth(max_chars) {
		Some((idx, _)) => &text[..idx],
		None => text,
	}
}
