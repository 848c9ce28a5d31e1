//! Tool error types.
//!
//! None of these end a run: the executor turns every one of them into a
//! failed [`ToolExecutionResult`](super::types::ToolExecutionResult) that is
//! fed back to the model.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ToolError {
    /// The model asked for a tool nobody registered.
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// A tool with this name is already registered.
    #[error("tool already registered: {name}")]
    DuplicateTool { name: String },

    /// Arguments failed the tool's declared schema.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The handler did not finish within the executor's timeout.
    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The handler panicked or was aborted.
    #[error("tool '{tool}' failed: {reason}")]
    Handler { tool: String, reason: String },

    /// The record store rejected an operation.
    #[error("record store error: {0}")]
    Store(#[from] StoreError),
}

impl ToolError {
    /// Short status line for the result envelope's `message`.
    pub fn summary(&self) -> &'static str {
        match self {
            ToolError::UnknownTool { .. } => "Unknown tool",
            ToolError::DuplicateTool { .. } => "Duplicate tool",
            ToolError::InvalidArguments { .. } => "Invalid arguments",
            ToolError::Timeout { .. } => "Timed out",
            ToolError::Handler { .. } => "Tool failed",
            ToolError::Store(_) => "Storage error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_message() {
        let err = ToolError::UnknownTool {
            name: "send_invoice".into(),
        };
        assert_eq!(err.to_string(), "Unknown tool: send_invoice");
        assert_eq!(err.summary(), "Unknown tool");
    }

    #[test]
    fn test_timeout_message() {
        let err = ToolError::Timeout {
            tool: "get_clients".into(),
            timeout_ms: 1500,
        };
        assert_eq!(err.to_string(), "tool 'get_clients' timed out after 1500ms");
    }
}
