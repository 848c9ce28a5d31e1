//! Reassembly of streamed completions.
//!
//! Text tokens are appended to a single buffer and passed through to the
//! caller as they arrive. Tool-call fragments are collected into slots keyed
//! by their `index`; fragments may arrive in any index order, and a fragment
//! for an unseen index opens a new slot.
//!
//! Slot update rules:
//! - `name` is replaced whenever a fragment carries a non-empty name.
//! - `arguments` text is always appended.
//! - `id` is replaced whenever a fragment carries one.

use std::collections::BTreeMap;

use super::types::{ModelResponse, RawToolCall, StreamDelta};

/// Something the caller should act on after pushing a delta.
#[derive(Debug, Clone, PartialEq)]
pub enum ReassemblyEvent {
    /// Newly arrived visible text.
    TextDelta(String),
    /// The stream signalled completion with tool calls; ordered by index.
    ToolCallsFinalized(Vec<RawToolCall>),
}

#[derive(Debug, Default, Clone)]
struct ToolCallSlot {
    id: Option<String>,
    name: String,
    arguments: String,
}

/// Accumulates one streamed model response.
#[derive(Debug, Default)]
pub struct StreamReassembler {
    text: String,
    slots: BTreeMap<u32, ToolCallSlot>,
    finish_reason: Option<String>,
    finalized: bool,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta into the accumulated state.
    pub fn push(&mut self, delta: StreamDelta) -> Vec<ReassemblyEvent> {
        let mut events = Vec::new();

        if let Some(token) = delta.text.filter(|t| !t.is_empty()) {
            self.text.push_str(&token);
            events.push(ReassemblyEvent::TextDelta(token));
        }

        if !self.finalized {
            for fragment in delta.tool_calls {
                let slot = self.slots.entry(fragment.index).or_default();
                if let Some(name) = fragment.name.filter(|n| !n.is_empty()) {
                    slot.name = name;
                }
                if let Some(args) = fragment.arguments {
                    slot.arguments.push_str(&args);
                }
                if fragment.id.is_some() {
                    slot.id = fragment.id;
                }
            }
        }

        if let Some(reason) = delta.finish_reason {
            if reason == "tool_calls" && !self.finalized {
                self.finalized = true;
                events.push(ReassemblyEvent::ToolCallsFinalized(self.tool_calls()));
            }
            self.finish_reason = Some(reason);
        }

        events
    }

    /// Visible text received so far.
    pub fn accumulated_text(&self) -> &str {
        &self.text
    }

    /// Whether a `tool_calls` completion signal has been seen.
    pub fn tool_calls_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether any tool-call slot has been opened.
    pub fn has_pending_tool_calls(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Snapshot of the slots in index order. Nameless slots are dropped.
    fn tool_calls(&self) -> Vec<RawToolCall> {
        self.slots
            .iter()
            .filter_map(|(index, slot)| {
                if slot.name.is_empty() {
                    tracing::warn!(index, "dropping streamed tool call without a name");
                    return None;
                }
                Some(RawToolCall {
                    id: slot.id.clone(),
                    name: slot.name.clone(),
                    arguments: slot.arguments.clone(),
                })
            })
            .collect()
    }

    /// Close the stream and produce the complete response.
    ///
    /// A stream that ends without a `tool_calls` signal but with open slots
    /// is treated as a tool-call completion (some gateways only send
    /// `[DONE]`).
    pub fn finish(self) -> ModelResponse {
        let tool_calls = self.tool_calls();
        let finish_reason = if tool_calls.is_empty() {
            self.finish_reason
        } else {
            Some("tool_calls".to_string())
        };
        ModelResponse {
            text: if self.text.is_empty() {
                None
            } else {
                Some(self.text)
            },
            tool_calls,
            finish_reason,
        }
    }
}
