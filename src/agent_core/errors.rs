//! Agent error types and the run-level error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::errors::{InferenceError, ParseError};
use crate::tools::errors::ToolError;

/// Why something went wrong, as reported on a [`RunOutcome`](super::types::RunOutcome)
/// or a failed tool call.
///
/// Only `TransportError`, `TurnBudgetExceeded` and `Cancelled` end a run.
/// The others are recorded on the affected tool call and fed back to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransportError,
    ParseError,
    ToolError,
    TurnBudgetExceeded,
    UnknownTool,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransportError => "transport_error",
            ErrorKind::ParseError => "parse_error",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::TurnBudgetExceeded => "turn_budget_exceeded",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether this kind terminates a run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransportError | ErrorKind::TurnBudgetExceeded | ErrorKind::Cancelled
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&ParseError> for ErrorKind {
    fn from(_: &ParseError) -> Self {
        ErrorKind::ParseError
    }
}

impl From<&ToolError> for ErrorKind {
    fn from(e: &ToolError) -> Self {
        match e {
            ToolError::UnknownTool { .. } => ErrorKind::UnknownTool,
            _ => ErrorKind::ToolError,
        }
    }
}

/// Errors that terminate a run.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// The model endpoint failed, including the single fallback retry.
    #[error("model call to '{model}' failed: {reason}")]
    Transport { model: String, reason: String },

    /// The model kept requesting tools for the whole turn budget.
    #[error("turn budget of {max_turns} exhausted without a final answer")]
    TurnBudgetExceeded { max_turns: u32 },

    /// The caller cancelled the run.
    #[error("run cancelled")]
    Cancelled,
}

impl AgentError {
    pub fn transport(model: &str, err: &InferenceError) -> Self {
        AgentError::Transport {
            model: model.to_string(),
            reason: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Transport { .. } => ErrorKind::TransportError,
            AgentError::TurnBudgetExceeded { .. } => ErrorKind::TurnBudgetExceeded,
            AgentError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_fatal_kinds() {
        assert!(ErrorKind::TransportError.is_run_fatal());
        assert!(ErrorKind::TurnBudgetExceeded.is_run_fatal());
        assert!(!ErrorKind::ToolError.is_run_fatal());
        assert!(!ErrorKind::UnknownTool.is_run_fatal());
        assert!(!ErrorKind::ParseError.is_run_fatal());
    }

    #[test]
    fn test_tool_error_kind_mapping() {
        let unknown = ToolError::UnknownTool { name: "x".into() };
        assert_eq!(ErrorKind::from(&unknown), ErrorKind::UnknownTool);
        let timeout = ToolError::Timeout {
            tool: "x".into(),
            timeout_ms: 10,
        };
        assert_eq!(ErrorKind::from(&timeout), ErrorKind::ToolError);
    }

    #[test]
    fn test_agent_error_kind_and_serde() {
        let err = AgentError::TurnBudgetExceeded { max_turns: 3 };
        assert_eq!(err.kind(), ErrorKind::TurnBudgetExceeded);
        assert_eq!(
            serde_json::to_string(&err.kind()).unwrap(),
            "\"turn_budget_exceeded\""
        );
        let transport = AgentError::transport(
            "gpt-4o",
            &InferenceError::Timeout { duration_secs: 120 },
        );
        assert!(transport.to_string().starts_with("model call to 'gpt-4o' failed"));
    }
}
