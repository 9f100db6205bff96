/// Cap applied to every tool output before it enters a transcript or the
/// tool-result cache.
pub const MAX_TOOL_OUTPUT: usize = 64 * 1024;

/// Truncate `content` to at most `max_bytes`, cutting on a char boundary
/// and appending a marker with the original size.
pub fn truncate_output(content: &str, max_bytes: usize) -> String {
    if content.len() <= max_bytes {
        return content.to_string();
    }

    let mut cut = max_bytes;
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }

    format!(
        "{}...\n[truncated: {} bytes total]",
        &content[..cut],
        content.len()
    )
}
