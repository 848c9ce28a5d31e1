//! Model endpoint access.
//!
//! - Wire types for OpenAI-compatible chat completions
//! - The [`ModelEndpoint`] trait and its HTTP implementation, [`GatewayClient`]
//! - SSE framing and reassembly of streamed tool calls
//! - Recovery of JSON values from free-form model output
//!
//! The gateway speaks the Chat Completions API, so switching hosted models is
//! a routing decision, not a code change.

pub mod client;
pub mod endpoint;
pub mod errors;
pub mod reassembler;
pub mod streaming;
pub mod structured_output;
pub mod types;

pub use client::GatewayClient;
pub use endpoint::{DeltaStream, ModelEndpoint};
pub use errors::{InferenceError, ParseError};
pub use reassembler::{ReassemblyEvent, StreamReassembler};
pub use structured_output::{ParsedOutput, Strategy, StructuredOutputParser};
pub use types::{
    ChatMessage, CompletionRequest, ModelResponse, RawToolCall, Role, StreamDelta,
    ToolCallFragment, ToolDefinition,
};
