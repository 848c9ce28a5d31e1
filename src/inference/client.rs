//! OpenAI-compatible gateway client.
//!
//! Sends chat completion requests to the hosted-model gateway, either as one
//! JSON body or as an SSE stream. Model selection and fallback are decided
//! by the caller; this client only speaks HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::endpoint::{DeltaStream, ModelEndpoint};
use super::errors::InferenceError;
use super::streaming::{parse_non_streaming_response, parse_sse_stream};
use super::types::{CompletionRequest, ModelResponse};
use crate::config::GatewayConfig;

// ─── GatewayClient ───────────────────────────────────────────────────────────

/// HTTP client for the completion gateway.
pub struct GatewayClient {
    /// Non-streaming requests (`request_timeout_secs`).
    http: HttpClient,
    /// Streaming requests (`stream_timeout_secs`).
    http_stream: HttpClient,
    base_url: String,
    api_key: Option<String>,
    request_timeout_secs: u64,
    stream_timeout_secs: u64,
    connect_timeout: Duration,
}

impl GatewayClient {
    /// Build a client. Does NOT check connectivity; see [`health_check`](Self::health_check).
    pub fn from_config(config: &GatewayConfig) -> Result<Self, InferenceError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "gateway.base_url is empty".into(),
            });
        }

        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let build = |timeout_secs: u64| {
            HttpClient::builder()
                .connect_timeout(connect_timeout)
                .timeout(Duration::from_secs(timeout_secs))
                .build()
                .map_err(|e| InferenceError::ConfigError {
                    reason: format!("failed to build HTTP client: {e}"),
                })
        };

        Ok(Self {
            http: build(config.request_timeout_secs)?,
            http_stream: build(config.stream_timeout_secs)?,
            base_url,
            api_key: config.bearer_token().map(str::to_string),
            request_timeout_secs: config.request_timeout_secs,
            stream_timeout_secs: config.stream_timeout_secs,
            connect_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error, timeout_secs: u64) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: timeout_secs,
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, InferenceError> {
        let url = self.completions_url();
        let body = request.to_wire(stream);

        // Metadata only; the body can be huge.
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            max_tokens = body.max_tokens,
            stream,
            "=== LLM REQUEST ==="
        );

        let (client, timeout_secs) = if stream {
            (&self.http_stream, self.stream_timeout_secs)
        } else {
            (&self.http, self.request_timeout_secs)
        };

        let mut builder = self.authorize(client.post(&url)).json(&body);
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e, timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %body_text, "gateway returned error status");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        Ok(response)
    }

    // ─── Health Check ────────────────────────────────────────────────────

    /// Check whether the gateway answers `GET /models`.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        match self
            .authorize(self.http.get(&url))
            .timeout(self.connect_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "gateway health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl ModelEndpoint for GatewayClient {
    async fn complete(&self, request: CompletionRequest) -> Result<ModelResponse, InferenceError> {
        let response = self.send(&request, false).await?;
        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::StreamError {
                reason: format!("failed to read response body: {e}"),
            })?;
        parse_non_streaming_response(&body_text)
    }

    async fn complete_stream(
        &self,
        request: CompletionRequest,
    ) -> Result<DeltaStream, InferenceError> {
        let response = self.send(&request, true).await?;
        Ok(Box::pin(parse_sse_stream(response.bytes_stream())))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::{ChatMessage, Role};
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage {
                role: Role::User,
                content: Some("hi".to_string()),
                tool_call_id: None,
                tool_calls: None,
            }],
            tools: None,
            temperature: 0.2,
            max_tokens: 64,
        }
    }

    fn client_for(server: &MockServer, api_key: Option<&str>) -> GatewayClient {
        let config = GatewayConfig {
            base_url: format!("{}/v1/", server.uri()),
            api_key: api_key.map(str::to_string),
            ..GatewayConfig::default()
        };
        GatewayClient::from_config(&config).unwrap()
    }

    #[test]
    fn test_empty_base_url_rejected() {
        let config = GatewayConfig {
            base_url: String::new(),
            ..GatewayConfig::default()
        };
        assert!(matches!(
            GatewayClient::from_config(&config),
            Err(InferenceError::ConfigError { .. })
        ));
    }

    #[tokio::test]
    async fn test_complete_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "Hello"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("sk-test"));
        let resp = client.complete(request()).await.unwrap();
        assert_eq!(resp.text.as_deref(), Some("Hello"));
        assert!(!resp.has_tool_calls());
    }

    #[tokio::test]
    async fn test_complete_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(err, InferenceError::HttpError { status: 503, .. }));
        assert_eq!(err.error_body(), Some("overloaded"));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn test_complete_stream_yields_deltas() {
        let server = MockServer::start().await;
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"get_clients\",\"arguments\":\"\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, None);
        let deltas: Vec<_> = client
            .complete_stream(request())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(deltas.len(), 2);
        let last = deltas[1].as_ref().unwrap();
        assert_eq!(last.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        assert!(client_for(&server, None).health_check().await);

        let down = GatewayClient::from_config(&GatewayConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            ..GatewayConfig::default()
        })
        .unwrap();
        assert!(!down.health_check().await);
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_failed() {
        let config = GatewayConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            connect_timeout_secs: 1,
            ..GatewayConfig::default()
        };
        let client = GatewayClient::from_config(&config).unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(
            err,
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
        ));
        assert!(!client.health_check().await);
    }
}
