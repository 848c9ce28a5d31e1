//! Agent core: the orchestration loop and its run types.
//!
//! Submodules:
//! - `orchestrator`: the multi-turn model/tool loop, streaming and not
//! - `types`: messages, tool-call requests, run state, options, outcome, events
//! - `history`: wire conversion and the tool-call pairing invariant
//! - `tokens`: size estimates and UTF-8 safe truncation
//! - `errors`: run-fatal errors and the error taxonomy

pub mod errors;
pub mod history;
pub mod orchestrator;
pub mod tokens;
pub mod types;

pub use errors::{AgentError, ErrorKind};
pub use history::{check_tool_pairing, PairingViolation};
pub use orchestrator::{AgentOrchestrator, RunEventStream};
pub use types::{
    Message, Role, RunEvent, RunOptions, RunOutcome, RunPhase, RunState, RunStatus,
    ToolCallRequest, ToolCallStatus,
};
