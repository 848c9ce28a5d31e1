//! Shared types for the model endpoint.
//!
//! The wire types mirror the OpenAI Chat Completions API used by the
//! gateway. [`CompletionRequest`], [`ModelResponse`] and [`StreamDelta`] are the
//! endpoint-neutral shapes the rest of the crate works with.

use serde::{Deserialize, Serialize};

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single message on the wire.
///
/// `content` is serialized as `""` rather than `null` for assistant messages
/// that only carry tool calls; several gateways reject `null` content on the
/// tool round-trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(s) => serializer.serialize_str(s),
        None => serializer.serialize_str(""),
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Tool definition sent in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// One call to the model endpoint, independent of transport.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// `None` when no tools are registered or the model cannot call tools.
    pub tools: Option<Vec<ToolDefinition>>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Build the wire body for this request.
    pub fn to_wire(&self, stream: bool) -> ChatCompletionRequest {
        let tool_choice = self.tools.as_ref().map(|_| "auto".to_string());
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: self.messages.clone(),
            tools: self.tools.clone(),
            tool_choice,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Tool call as carried on the wire (assistant messages and responses).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

/// Function call details in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

/// A tool call exactly as the model produced it.
///
/// `arguments` is the raw text and is not guaranteed to be valid JSON.
/// `id` is `None` when the model omitted it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// A complete (non-streaming or reassembled) model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<RawToolCall>,
    /// `"stop"`, `"tool_calls"`, `"length"`, or `None` if the endpoint sent none.
    pub finish_reason: Option<String>,
}

impl ModelResponse {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// One incremental update from a streaming response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamDelta {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub finish_reason: Option<String>,
}

impl StreamDelta {
    pub fn text(token: impl Into<String>) -> Self {
        Self {
            text: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn fragment(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Self::default()
        }
    }

    pub fn finish(reason: impl Into<String>) -> Self {
        Self {
            finish_reason: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// A partial tool call tagged with the slot index it belongs to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

// ─── Wire Response Types ─────────────────────────────────────────────────────

/// Non-streaming completion body.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseChoice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ResponseToolCall>>,
}

/// Response tool call; `id` is optional because some gateways omit it.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub function: FunctionCallResponse,
}

/// Raw SSE chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

/// A single choice within a streaming chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The incremental update within a chunk choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ChunkToolCall>>,
}

/// A tool call fragment within a streaming delta.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkToolCall {
    pub index: Option<u32>,
    pub id: Option<String>,
    pub function: Option<ChunkFunction>,
}

/// A function call fragment within a streaming tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct ChunkFunction {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tools: Option<Vec<ToolDefinition>>) -> CompletionRequest {
        CompletionRequest {
            model: "test".to_string(),
            messages: vec![],
            tools,
            temperature: 0.4,
            max_tokens: 1024,
        }
    }

    #[test]
    fn test_tool_choice_omitted_without_tools() {
        let json = serde_json::to_string(&request(None).to_wire(false)).unwrap();
        assert!(!json.contains("tool_choice"));
        assert!(!json.contains("\"tools\""));
    }

    #[test]
    fn test_tool_choice_auto_with_tools() {
        let tool = ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: "get_clients".to_string(),
                description: "List clients".to_string(),
                parameters: serde_json::json!({"type": "object", "properties": {}}),
            },
        };
        let wire = request(Some(vec![tool])).to_wire(true);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn test_null_content_serialized_as_empty_string() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_call_id: None,
            tool_calls: Some(vec![]),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "");
        assert_eq!(json["role"], "assistant");
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn test_response_tool_call_without_id() {
        let body = r#"{"choices":[{"message":{"content":null,"tool_calls":[
            {"type":"function","function":{"name":"get_clients","arguments":"{}"}}
        ]},"finish_reason":"tool_calls"}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        let call = &parsed.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert!(call.id.is_none());
        assert_eq!(call.function.name, "get_clients");
    }
}
