//! Approximate token counting without a tokenizer model
//!
//! Chunk boundaries and job sizing both rely on this estimate. It does not
//! have to match any real tokenizer, but it must be deterministic and
//! monotonic in normalized text length.

/// Collapse whitespace runs to single spaces and trim
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Estimate the token count of a text span
///
/// Uses length/4 as the base character-to-token ratio, plus a small
/// correction for punctuation which common tokenizers tend to split into
/// separate sub-word tokens.
pub fn estimate_tokens(text: &str) -> usize {
    let normalized = normalize_whitespace(text);
    if normalized.is_empty() {
        return 0;
    }

    let chars = normalized.chars().count() as f64;
    let punctuation = normalized
        .chars()
        .filter(|c| c.is_ascii_punctuation())
        .count() as f64;

    (chars / 4.0 + punctuation * 0.1).ceil() as usize
}

/// Overlap size in estimated tokens for a target size and overlap percentage
pub fn overlap_tokens(target_tokens: usize, overlap_percent: f32) -> usize {
    (target_tokens as f64 * overlap_percent as f64 / 100.0).floor() as usize
}
