//! History helpers: wire conversion and the tool-pairing invariant.

use std::collections::HashSet;

use thiserror::Error;

use super::types::{Message, Role};
use crate::inference::types::{ChatMessage, FunctionCallResponse, ToolCallResponse};

/// A `tool` message that does not answer a call in the assistant message
/// directly before it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("tool message at index {index} ({tool_call_id}): {reason}")]
pub struct PairingViolation {
    pub index: usize,
    pub tool_call_id: String,
    pub reason: String,
}

/// Convert history to the endpoint's wire messages.
///
/// Tool-call arguments are sent as the parsed JSON, not the raw model text,
/// so a malformed call from an earlier turn cannot poison the next request.
pub fn to_wire(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|m| {
            let tool_calls = (!m.tool_calls.is_empty()).then(|| {
                m.tool_calls
                    .iter()
                    .map(|c| ToolCallResponse {
                        id: c.id.clone(),
                        r#type: "function".to_string(),
                        function: FunctionCallResponse {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect()
            });
            let content = if m.content.is_empty() && tool_calls.is_some() {
                None
            } else {
                Some(m.content.clone())
            };
            ChatMessage {
                role: m.role,
                content,
                tool_call_id: m.tool_call_id.clone(),
                tool_calls,
            }
        })
        .collect()
}

pub fn has_system_message(history: &[Message]) -> bool {
    history.iter().any(|m| m.role == Role::System)
}

/// Check that every `tool` message's id matches a call in the nearest
/// preceding assistant message, and that no call is answered twice.
pub fn check_tool_pairing(history: &[Message]) -> Result<(), PairingViolation> {
    let mut owner: Option<usize> = None;
    let mut answered: HashSet<&str> = HashSet::new();

    for (index, message) in history.iter().enumerate() {
        match message.role {
            Role::Assistant => {
                owner = Some(index);
                answered.clear();
            }
            Role::Tool => {
                let id = message.tool_call_id.as_deref().unwrap_or("");
                let violation = |reason: &str| PairingViolation {
                    index,
                    tool_call_id: id.to_string(),
                    reason: reason.to_string(),
                };

                let Some(owner_idx) = owner else {
                    return Err(violation("no preceding assistant message"));
                };
                if id.is_empty() {
                    return Err(violation("missing tool_call_id"));
                }
                if !history[owner_idx].tool_calls.iter().any(|c| c.id == id) {
                    return Err(violation("id not requested by the preceding assistant message"));
                }
                if !answered.insert(id) {
                    return Err(violation("call answered more than once"));
                }
            }
            Role::User | Role::System => {
                owner = None;
                answered.clear();
            }
        }
    }

    Ok(())
}
