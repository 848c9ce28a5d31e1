//! The model endpoint seam.
//!
//! The orchestrator only sees this trait. [`GatewayClient`](super::GatewayClient)
//! is the HTTP implementation; tests plug in scripted endpoints.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::errors::InferenceError;
use super::types::{CompletionRequest, ModelResponse, StreamDelta};

/// Stream of deltas from a streaming completion.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, InferenceError>> + Send>>;

/// A chat/completion endpoint with optional streaming and tool calling.
#[async_trait]
pub trait ModelEndpoint: Send + Sync {
    /// One non-streaming completion.
    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, InferenceError>;

    /// One streaming completion. Errors before the first delta are returned
    /// directly; later errors arrive as stream items.
    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<DeltaStream, InferenceError>;
}
