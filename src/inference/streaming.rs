//! SSE framing for OpenAI-compatible chat completions.
//!
//! Splits the HTTP body into server-sent events (`data: …\n\n`), decodes each
//! event into a [`StreamDelta`], and stops at `[DONE]`. No accumulation
//! happens here: the orchestrator feeds the deltas into a
//! [`StreamReassembler`](super::reassembler::StreamReassembler).

use std::fmt::Display;

use futures::stream::{self, Stream, StreamExt};

use super::errors::InferenceError;
use super::types::{
    ChatCompletionChunk, ChatCompletionResponse, ModelResponse, RawToolCall, StreamDelta,
    ToolCallFragment,
};

// ─── SSE event parser ────────────────────────────────────────────────────────

/// Outcome of decoding one SSE event.
#[derive(Debug, PartialEq)]
pub enum SseEvent {
    Delta(StreamDelta),
    /// `data: [DONE]`
    Done,
    /// Keep-alive, comment, or a chunk without choices.
    Empty,
}

/// Decode a byte stream of SSE events into deltas.
///
/// Generic over the byte source so tests can drive it without a socket;
/// production passes `reqwest::Response::bytes_stream()`.
pub fn parse_sse_stream<S, B, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<StreamDelta, InferenceError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    // (source, pending bytes, finished)
    stream::unfold(
        (byte_stream, Vec::<u8>::new(), false),
        |(mut byte_stream, mut buffer, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(event_end) = find_event_boundary(&buffer) {
                    let event: Vec<u8> = buffer.drain(..event_end + 2).collect();
                    let text = String::from_utf8_lossy(&event[..event_end]).into_owned();

                    match decode_sse_event(&text) {
                        Ok(SseEvent::Delta(delta)) => {
                            return Some((Ok(delta), (byte_stream, buffer, false)))
                        }
                        Ok(SseEvent::Done) => return None,
                        Ok(SseEvent::Empty) => continue,
                        Err(e) => return Some((Err(e), (byte_stream, buffer, true))),
                    }
                }

                match byte_stream.next().await {
                    Some(Ok(bytes)) => {
                        // Normalize CRLF framing so the boundary search only
                        // has to look for "\n\n".
                        buffer.extend(bytes.as_ref().iter().filter(|b| **b != b'\r'));
                    }
                    Some(Err(e)) => {
                        return Some((
                            Err(InferenceError::StreamError {
                                reason: format!("stream read error: {e}"),
                            }),
                            (byte_stream, buffer, true),
                        ));
                    }
                    None => {
                        // Stream ended without a trailing blank line.
                        let rest = String::from_utf8_lossy(&buffer).trim().to_string();
                        buffer.clear();
                        if rest.is_empty() {
                            return None;
                        }
                        return match decode_sse_event(&rest) {
                            Ok(SseEvent::Delta(delta)) => {
                                Some((Ok(delta), (byte_stream, buffer, true)))
                            }
                            Ok(_) => None,
                            Err(e) => Some((Err(e), (byte_stream, buffer, true))),
                        };
                    }
                }
            }
        },
    )
}

fn find_event_boundary(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Decode a single SSE event (may contain multiple `data:` lines).
pub fn decode_sse_event(event: &str) -> Result<SseEvent, InferenceError> {
    let mut data_content = String::new();

    for line in event.lines() {
        if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(SseEvent::Done);
            }
            data_content.push_str(data);
        }
    }

    if data_content.is_empty() {
        return Ok(SseEvent::Empty);
    }

    let chunk: ChatCompletionChunk =
        serde_json::from_str(&data_content).map_err(|e| InferenceError::StreamError {
            reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
        })?;

    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(SseEvent::Empty);
    };

    let fragments = choice
        .delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallFragment {
                index: tc.index.unwrap_or(0),
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    Ok(SseEvent::Delta(StreamDelta {
        text: choice.delta.content.filter(|c| !c.is_empty()),
        tool_calls: fragments,
        finish_reason: choice.finish_reason,
    }))
}

// ─── Non-streaming ───────────────────────────────────────────────────────────

/// Parse a non-streaming completion body.
///
/// Tool-call arguments are kept as raw text; validating them is the
/// orchestrator's job.
pub fn parse_non_streaming_response(body: &str) -> Result<ModelResponse, InferenceError> {
    let resp: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseError {
            reason: format!("failed to parse completion body: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::ResponseError {
            reason: "empty choices array".into(),
        })?;

    let tool_calls: Vec<RawToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| RawToolCall {
            id: tc.id.filter(|id| !id.is_empty()),
            name: tc.function.name,
            arguments: tc.function.arguments,
        })
        .collect();

    let finish_reason = if tool_calls.is_empty() {
        choice.finish_reason
    } else {
        Some("tool_calls".into())
    };

    Ok(ModelResponse {
        text: choice.message.content.filter(|c| !c.is_empty()),
        tool_calls,
        finish_reason,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────
