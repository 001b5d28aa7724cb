/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Whitespace-token count used for request accounting when the provider
/// reports no usage.
pub fn estimate_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Flat per-token cost estimate in USD.
pub fn estimate_cost(tokens: u64) -> f64 {
    tokens as f64 * 0.000002
}
