//! Size helpers for history content.
//!
//! Character-based token estimates (~3.2 chars/token for prose, ~2.8 for
//! JSON) used for loop logging, and UTF-8 safe truncation of tool results.

use super::types::{Message, Role};

const CHARS_PER_TOKEN: f64 = 3.2;
const JSON_CHARS_PER_TOKEN: f64 = 2.8;
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;
const TOOL_CALL_OVERHEAD_TOKENS: u32 = 10;

// ─── UTF-8 Safe Truncation ───────────────────────────────────────────────────

/// Truncate `s` to at most `max_bytes` bytes on a char boundary.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Cap a tool message body at `max_chars` bytes, keeping the head and
/// appending a truncation notice.
pub fn truncate_tool_content(content: &str, max_chars: usize, tool_name: &str) -> String {
    if content.len() <= max_chars {
        return content.to_string();
    }

    let head = truncate_utf8(content, max_chars);
    tracing::warn!(
        tool = %tool_name,
        original_len = content.len(),
        truncated_to = head.len(),
        "tool result truncated"
    );
    format!(
        "{head}\n\n[... truncated: showing first {} of {} chars]",
        head.len(),
        content.len()
    )
}

// ─── Estimates ───────────────────────────────────────────────────────────────

pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as f64 / CHARS_PER_TOKEN).ceil() as u32
}

pub fn estimate_json_tokens(json_text: &str) -> u32 {
    (json_text.len() as f64 / JSON_CHARS_PER_TOKEN).ceil() as u32
}

pub fn estimate_message_tokens(message: &Message) -> u32 {
    let content = if message.role == Role::Tool {
        estimate_json_tokens(&message.content)
    } else {
        estimate_tokens(&message.content)
    };
    let calls: u32 = message
        .tool_calls
        .iter()
        .map(|c| {
            TOOL_CALL_OVERHEAD_TOKENS
                + estimate_tokens(&c.name)
                + estimate_json_tokens(&c.arguments.to_string())
        })
        .sum();
    MESSAGE_OVERHEAD_TOKENS + content + calls
}

pub fn estimate_history_tokens(history: &[Message]) -> u32 {
    history.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_utf8_boundary() {
        let s = "café";
        // 'é' is two bytes starting at index 3.
        assert_eq!(truncate_utf8(s, 4), "caf");
        assert_eq!(truncate_utf8(s, 5), "café");
        assert_eq!(truncate_utf8(s, 0), "");
    }

    #[test]
    fn test_truncate_tool_content() {
        let short = truncate_tool_content("{\"ok\":true}", 100, "t");
        assert_eq!(short, "{\"ok\":true}");

        let long = "x".repeat(50);
        let cut = truncate_tool_content(&long, 10, "t");
        assert!(cut.starts_with("xxxxxxxxxx\n\n[... truncated"));
        assert!(cut.ends_with("showing first 10 of 50 chars]"));
    }

    #[test]
    fn test_estimates_grow_with_content() {
        let small = Message::user("hi");
        let big = Message::user("hello there, this is a longer message");
        assert!(estimate_message_tokens(&big) > estimate_message_tokens(&small));
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(
            estimate_history_tokens(&[small.clone(), small.clone()]),
            2 * estimate_message_tokens(&small)
        );
    }
}
