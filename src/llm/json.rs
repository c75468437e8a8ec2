//! Code-fence handling for JSON in LLM responses.
//!
//! Providers often wrap JSON in a markdown code block. Only the fence is
//! removed; the contents must then parse as JSON on their own.

/// Return the contents of the first fenced code block, if it holds JSON.
pub fn strip_code_fence(text: &str) -> Option<String> {
    // Try ` ```json ` fenced block
    if let Some(start) = text.find("```json")
        && let Some(end) = text[start + 7..].find("```")
    {
        return Some(text[start + 7..start + 7 + end].trim().to_string());
    }

    // Try bare ` ``` ` fenced block
    if let Some(start) = text.find("```")
        && let Some(end) = text[start + 3..].find("```")
    {
        let inner = text[start + 3..start + 3 + end].trim();
        if inner.starts_with('{') || inner.starts_with('[') {
            return Some(inner.to_string());
        }
    }

    None
}

/// The response with any JSON code fence removed, otherwise trimmed.
pub fn unfenced_json(response: &str) -> String {
    strip_code_fence(response).unwrap_or_else(|| response.trim().to_string())
}
