//! Recovery of JSON values from free-form model output.
//!
//! Models wrap JSON in prose, markdown fences and trailing commentary, and
//! make small syntax slips. [`StructuredOutputParser`] runs an ordered chain of
//! strategies, cheapest and least lossy first, and returns the first value
//! that parses. The order is part of the contract: each later strategy is
//! more aggressive than the ones before it.

use serde_json::Value;

use super::errors::ParseError;

// ─── Strategies ─────────────────────────────────────────────────────────────

/// One recovery strategy, in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Parse the text as-is.
    Verbatim,
    /// Interior of the first fenced code block.
    FencedBlock,
    /// First `{` through last `}`.
    GreedyObject,
    /// First `[` through last `]`.
    GreedyArray,
    /// Fences removed, leading and trailing prose trimmed.
    TrimmedEnvelope,
    /// As `TrimmedEnvelope`, then [`repair_json`].
    RepairedEnvelope,
    /// Depth-counted match of the first opener, then [`repair_json`].
    DepthScan,
}

/// The chain, in the order it is tried.
pub const STRATEGY_CHAIN: [Strategy; 7] = [
    Strategy::Verbatim,
    Strategy::FencedBlock,
    Strategy::GreedyObject,
    Strategy::GreedyArray,
    Strategy::TrimmedEnvelope,
    Strategy::RepairedEnvelope,
    Strategy::DepthScan,
];

impl Strategy {
    /// 1-based position in [`STRATEGY_CHAIN`].
    pub fn ordinal(&self) -> usize {
        STRATEGY_CHAIN
            .iter()
            .position(|s| s == self)
            .map_or(0, |p| p + 1)
    }

    fn attempt(&self, text: &str) -> Option<Value> {
        match self {
            Strategy::Verbatim => try_parse(text),
            Strategy::FencedBlock => fenced_block(text).and_then(try_parse),
            Strategy::GreedyObject => greedy_between(text, '{', '}').and_then(try_parse),
            Strategy::GreedyArray => greedy_between(text, '[', ']').and_then(try_parse),
            Strategy::TrimmedEnvelope => trimmed_envelope(&strip_fences(text)).and_then(try_parse),
            Strategy::RepairedEnvelope => trimmed_envelope(&strip_fences(text))
                .map(repair_json)
                .and_then(|s| try_parse(&s)),
            Strategy::DepthScan => {
                depth_scan(&strip_fences(text)).and_then(|s| try_parse(&repair_json(&s)))
            }
        }
    }
}

/// A recovered value and the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub value: Value,
    pub strategy: Strategy,
}

// ─── Parser ─────────────────────────────────────────────────────────────────

/// Stateless; cheap to copy into any component that needs it.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredOutputParser;

impl StructuredOutputParser {
    pub fn new() -> Self {
        Self
    }

    /// Recover a JSON value from `text`.
    ///
    /// Fails only when every strategy fails. The failure is logged at `warn`
    /// with the first 2000 characters of the input.
    pub fn parse(&self, text: &str) -> Result<ParsedOutput, ParseError> {
        self.parse_observed(text, &mut |_| {})
    }

    /// Like [`parse`](Self::parse), calling `observer` before each attempt.
    pub fn parse_observed(
        &self,
        text: &str,
        observer: &mut dyn FnMut(Strategy),
    ) -> Result<ParsedOutput, ParseError> {
        for strategy in STRATEGY_CHAIN {
            observer(strategy);
            if let Some(value) = strategy.attempt(text) {
                tracing::debug!(strategy = ?strategy, "structured output recovered");
                return Ok(ParsedOutput { value, strategy });
            }
        }

        let err = ParseError::new(
            format!("all {} strategies failed", STRATEGY_CHAIN.len()),
            text,
        );
        tracing::warn!(
            reason = %err.reason,
            raw_len = text.len(),
            raw_excerpt = %err.raw_excerpt,
            "structured output recovery failed"
        );
        Err(err)
    }
}

// ─── Extraction helpers ─────────────────────────────────────────────────────

fn try_parse(candidate: &str) -> Option<Value> {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Interior of the first ```` ``` ```` fence, with an optional `json` tag removed.
fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after = &text[open + 3..];
    let body = match after.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &after[4..],
        _ => after,
    };
    let close = body.find("```")?;
    Some(&body[..close])
}

fn greedy_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Remove every code-fence marker (and its `json` tag).
fn strip_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```JSON", "")
        .replace("```", "")
}

/// From the first `{`/`[` to the last occurrence of its closer.
fn trimmed_envelope(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Depth-counted extraction of the first JSON container.
///
/// Quoted strings (either quote style) are skipped. If the text ends before
/// the container closes, the missing closers are appended.
fn depth_scan(text: &str) -> Option<String> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let mut stack: Vec<char> = Vec::new();
    let mut in_string: Option<char> = None;
    let mut escape_next = false;

    for (offset, ch) in text[start..].char_indices() {
        if let Some(quote) = in_string {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => in_string = Some(ch),
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(ch) {
                    return None;
                }
                if stack.is_empty() {
                    let end = start + offset + ch.len_utf8();
                    return Some(text[start..end].to_string());
                }
            }
            _ => {}
        }
    }

    // Truncated output: close whatever is still open.
    let mut repaired = text[start..].trim_end().to_string();
    if let Some(quote) = in_string {
        repaired.push(quote);
    }
    while let Some(closer) = stack.pop() {
        repaired.push(closer);
    }
    Some(repaired)
}

// ─── Repair ─────────────────────────────────────────────────────────────────

/// Repair common JSON slips made by language models.
///
/// - trailing commas before `}` / `]` are removed
/// - bare object keys are quoted
/// - single-quoted strings become double-quoted
/// - newlines and tabs become spaces, other control characters are dropped
///
/// Double-quoted strings are copied through untouched apart from control
/// characters, so valid JSON keeps its structure and a second pass is a no-op.
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
            }
            ',' => {
                if !matches!(next_significant(&chars, i + 1), Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let is_key = next_significant(&chars, i) == Some(':')
                    && matches!(last_significant(&out), Some('{') | Some(','));
                if is_key {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
            }
            '\n' | '\r' | '\t' => {
                out.push(' ');
                i += 1;
            }
            c if c.is_control() => i += 1,
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Copy a quoted string starting at `start` as a double-quoted JSON string.
/// Returns the index just past the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push('"');
    let mut i = start + 1;

    while i < chars.len() {
        let ch = chars[i];
        if ch == '\\' {
            match chars.get(i + 1) {
                Some('\'') if quote == '\'' => out.push('\''),
                Some(next) => {
                    out.push('\\');
                    out.push(*next);
                }
                None => {}
            }
            i += 2;
            continue;
        }
        if ch == quote {
            out.push('"');
            return i + 1;
        }
        match ch {
            '"' => out.push_str("\\\""),
            '\n' | '\r' | '\t' => out.push(' '),
            c if c.is_control() => {}
            c => out.push(c),
        }
        i += 1;
    }

    // Unterminated string
    out.push('"');
    chars.len()
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '-'
}

fn next_significant(chars: &[char], from: usize) -> Option<char> {
    chars.iter().skip(from).copied().find(|c| !c.is_whitespace())
}

fn last_significant(out: &str) -> Option<char> {
    out.chars().rev().find(|c| !c.is_whitespace())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(text: &str) -> ParsedOutput {
        StructuredOutputParser::new().parse(text).unwrap()
    }

    #[test]
    fn test_verbatim() {
        let out = parse(r#"{"title": "Spring sale"}"#);
        assert_eq!(out.strategy, Strategy::Verbatim);
        assert_eq!(out.value["title"], "Spring sale");
    }

    #[test]
    fn test_fenced_block_with_prose() {
        let text = "Here is the outline:\n```json\n{\"sections\": [\"intro\", \"outro\"]}\n```\nLet me know!";
        let out = parse(text);
        assert_eq!(out.strategy, Strategy::FencedBlock);
        assert_eq!(out.value["sections"][1], "outro");
    }

    #[test]
    fn test_greedy_object_after_earlier_strategies() {
        let mut attempted = Vec::new();
        let out = StructuredOutputParser::new()
            .parse_observed("ok: {\"a\":1}", &mut |s| attempted.push(s))
            .unwrap();
        assert_eq!(out.strategy, Strategy::GreedyObject);
        assert_eq!(out.strategy.ordinal(), 3);
        assert_eq!(out.value, json!({"a": 1}));
        assert_eq!(
            attempted,
            vec![Strategy::Verbatim, Strategy::FencedBlock, Strategy::GreedyObject]
        );
    }

    #[test]
    fn test_greedy_array() {
        let out = parse("Keywords: [\"seo\", \"content\"] -- done");
        assert_eq!(out.strategy, Strategy::GreedyArray);
        assert_eq!(out.value, json!(["seo", "content"]));
    }

    #[test]
    fn test_trimmed_envelope_across_broken_fence() {
        let out = parse("```json\n{\"a\":1\n```\n}");
        assert_eq!(out.strategy, Strategy::TrimmedEnvelope);
        assert_eq!(out.value, json!({"a": 1}));
    }

    #[test]
    fn test_repaired_envelope() {
        let out = parse("Sure! {name: 'Jansen', tags: ['a', 'b'],}");
        assert_eq!(out.strategy, Strategy::RepairedEnvelope);
        assert_eq!(out.value, json!({"name": "Jansen", "tags": ["a", "b"]}));
    }

    #[test]
    fn test_depth_scan_picks_first_container() {
        let out = parse(r#"{"a":1} and {"b":2}"#);
        assert_eq!(out.strategy, Strategy::DepthScan);
        assert_eq!(out.value, json!({"a": 1}));
    }

    #[test]
    fn test_depth_scan_closes_truncated_output() {
        let out = parse(r#"Here you go: {"title": "Post", "tags": ["x""#);
        assert_eq!(out.strategy, Strategy::DepthScan);
        assert_eq!(out.value, json!({"title": "Post", "tags": ["x"]}));
    }

    #[test]
    fn test_total_failure_is_error() {
        let mut attempts = 0;
        let err = StructuredOutputParser::new()
            .parse_observed("no data here", &mut |_| attempts += 1)
            .unwrap_err();
        assert_eq!(attempts, STRATEGY_CHAIN.len());
        assert_eq!(err.raw_excerpt, "no data here");
    }

    #[test]
    fn test_repair_idempotent_on_valid_json() {
        let valid = r#"{"quote": "it's \"fine\"", "path": "a\\b", "n": [1, -2.5e3, true, null], "nested": {"k": "v: w"}}"#;
        let once = repair_json(valid);
        let twice = repair_json(&once);
        assert_eq!(once, twice);
        let original: Value = serde_json::from_str(valid).unwrap();
        let repaired: Value = serde_json::from_str(&once).unwrap();
        assert_eq!(original, repaired);
        assert_eq!(serde_json::from_str::<Value>(&twice).unwrap(), original);
    }

    #[test]
    fn test_repair_single_quotes_escape_inner_double_quotes() {
        let repaired = repair_json(r#"{'say': 'he said "hi"'}"#);
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["say"], "he said \"hi\"");
    }

    #[test]
    fn test_repair_strips_control_characters() {
        let repaired = repair_json("{\"a\":\t\"line1\nline2\u{0007}\"}");
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["a"], "line1 line2");
    }
}
