//! Approximate token counting.
//!
//! BPE tokenizers average about four bytes per token for source code and
//! English prose. Counts feed tier thresholds and cost estimates, both of
//! which tolerate this approximation.

const BYTES_PER_TOKEN: usize = 4;

/// Approximate token count of `text` (bytes / 4, rounded up).
pub fn count_tokens(text: &str) -> usize {
    text.len().div_ceil(BYTES_PER_TOKEN)
}
