//! Byte budgets for prompt sections and persisted excerpts.

/// Clip `text` to at most `max_bytes`, on a char boundary, with a marker.
pub fn clip(text: &str, max_bytes: usize) -> String {
    const MARKER: &str = "\n[truncated]";
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let keep = max_bytes.saturating_sub(MARKER.len());
    let mut end = keep.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = text[..end].to_string();
    out.push_str(MARKER);
    out
}

/// Last `max_bytes` of `text` (on a char boundary), used for output excerpts.
pub fn tail(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
