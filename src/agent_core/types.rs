//! Run types for the agent core.
//!
//! Conversation messages, tool-call requests, run state, options, outcome and
//! the events emitted by a streaming run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::errors::{AgentError, ErrorKind};
use crate::inference::errors::ParseError;
use crate::inference::structured_output::{ParsedOutput, StructuredOutputParser};
use crate::inference::types::RawToolCall;
use crate::models::{Priority, RoutingConstraints, TaskType};
use crate::tools::types::ToolExecutionResult;

pub use crate::inference::types::Role;

// ─── Messages ────────────────────────────────────────────────────────────────

/// One turn in a conversation. History is append-only during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Empty for assistant messages that only carry tool calls.
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// Set only on `tool` messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCallRequest>,
    ) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(tool_name.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

// ─── Tool calls ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// One invocation the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Unique within a run; model-assigned or `call_<uuid>`.
    pub id: String,
    pub name: String,
    /// Argument text exactly as the model produced it.
    pub raw_arguments: String,
    /// Parsed arguments; `{}` when the raw text was not a JSON object.
    pub arguments: Value,
    pub status: ToolCallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolExecutionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, raw: RawToolCall, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: raw.name,
            raw_arguments: raw.arguments,
            arguments,
            status: ToolCallStatus::Pending,
            result: None,
            error_kind: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ToolCallStatus::Completed | ToolCallStatus::Failed)
    }
}

// ─── Run state ───────────────────────────────────────────────────────────────

/// Orchestrator state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    AwaitingModel,
    ToolCallsPending,
    Executing,
    Terminal,
    Failed,
}

/// Mutable state of one run. Owned by the orchestrator for the run's duration.
#[derive(Debug, Clone)]
pub struct RunState {
    pub history: Vec<Message>,
    pub turn_count: u32,
    pub phase: RunPhase,
    pub terminal: bool,
    pub last_error: Option<AgentError>,
}

impl RunState {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            turn_count: 0,
            phase: RunPhase::AwaitingModel,
            terminal: false,
            last_error: None,
        }
    }
}

// ─── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub task: TaskType,
    pub priority: Priority,
    pub constraints: RoutingConstraints,
    /// Overrides the configured turn budget.
    pub max_turns: Option<u32>,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            task: TaskType::Chat,
            priority: Priority::default(),
            constraints: RoutingConstraints::default(),
            max_turns: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    pub fn for_task(task: TaskType) -> Self {
        Self {
            task,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_constraints(mut self, constraints: RoutingConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Terminal,
    Failed,
}

/// Result of one run. History is preserved on failure.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub history: Vec<Message>,
    pub turn_count: u32,
    /// Model used for the last successful call, or the selected model if none succeeded.
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        self.status == RunStatus::Terminal
    }

    /// The final assistant answer of a terminal run.
    pub fn final_text(&self) -> Option<&str> {
        if !self.is_terminal() {
            return None;
        }
        self.history
            .last()
            .filter(|m| m.role == Role::Assistant && !m.has_tool_calls())
            .map(|m| m.content.as_str())
    }

    /// Recover structured data from the final answer.
    pub fn parse_final_json(&self) -> Result<ParsedOutput, ParseError> {
        match self.final_text() {
            Some(text) => StructuredOutputParser::new().parse(text),
            None => Err(ParseError::new("run produced no final answer", "")),
        }
    }
}

// ─── Streaming events ────────────────────────────────────────────────────────

/// Events emitted by [`AgentOrchestrator::run_streaming`](super::AgentOrchestrator::run_streaming).
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Visible assistant text, in arrival order.
    TextDelta(String),
    /// Every tool call of the current turn, complete and in model order.
    ToolCallsFinalized(Vec<ToolCallRequest>),
    ToolResult {
        call_id: String,
        name: String,
        result: ToolExecutionResult,
    },
    /// The model call failed and is being retried once. Text streamed since
    /// the turn started should be discarded.
    Retrying {
        failed_model: String,
        fallback_model: String,
        reason: String,
    },
    /// Always the last event.
    Finished(RunOutcome),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outcome(history: Vec<Message>, status: RunStatus) -> RunOutcome {
        RunOutcome {
            status,
            history,
            turn_count: 1,
            model_id: "gpt-4o".into(),
            error_kind: None,
            error: None,
        }
    }

    #[test]
    fn test_final_text_only_for_terminal() {
        let history = vec![Message::user("hi"), Message::assistant("hello")];
        assert_eq!(
            outcome(history.clone(), RunStatus::Terminal).final_text(),
            Some("hello")
        );
        assert_eq!(outcome(history, RunStatus::Failed).final_text(), None);
    }

    #[test]
    fn test_parse_final_json() {
        let history = vec![Message::assistant("Here you go: {\"title\": \"Zuurdesem\"}")];
        let parsed = outcome(history, RunStatus::Terminal).parse_final_json().unwrap();
        assert_eq!(parsed.value, json!({"title": "Zuurdesem"}));

        let empty = outcome(vec![Message::user("x")], RunStatus::Terminal);
        assert!(empty.parse_final_json().is_err());
    }

    #[test]
    fn test_message_serialization_skips_empty() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, json!({"role": "user", "content": "hi"}));

        let tool = serde_json::to_value(Message::tool_result("call_1", "get_clients", "{}")).unwrap();
        assert_eq!(tool["tool_call_id"], "call_1");
        assert_eq!(tool["tool_name"], "get_clients");
    }

    #[test]
    fn test_tool_call_request_lifecycle() {
        let raw = RawToolCall {
            id: None,
            name: "get_clients".into(),
            arguments: "{\"search\":\"Jansen\"}".into(),
        };
        let mut call = ToolCallRequest::new("call_1", raw, json!({"search": "Jansen"}));
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert!(!call.is_finished());
        call.status = ToolCallStatus::Failed;
        assert!(call.is_finished());
    }
}
