//! ToolExecutor: dispatches tool calls to their handlers.
//!
//! `execute` never returns an error. Unknown names, invalid arguments,
//! handler panics and timeouts all come back as a failed
//! [`ToolExecutionResult`] so the orchestrator can hand them to the model.
//!
//! Each call runs on its own tokio task. A panic inside a handler surfaces as
//! a `JoinError` instead of tearing down the run. A task that times out, or
//! whose caller stops waiting (run cancelled), is aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use super::cache::ResultCache;
use super::errors::ToolError;
use super::types::{Tool, ToolExecutionResult};

// ─── Handler trait ───────────────────────────────────────────────────────────

/// A callable tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Declaration offered to the model.
    fn definition(&self) -> Tool;

    /// Whether successful results may be served from the [`ResultCache`].
    fn cacheable(&self) -> bool {
        false
    }

    /// Tools whose cached results go stale when this one succeeds.
    fn invalidates(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, params: Value) -> ToolExecutionResult;
}

struct RegisteredHandler {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

// ─── ToolExecutor ────────────────────────────────────────────────────────────

pub struct ToolExecutor {
    handlers: HashMap<String, RegisteredHandler>,
    timeout: Duration,
    cache: Option<Arc<ResultCache>>,
}

impl ToolExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            timeout,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) -> Result<(), ToolError> {
        let tool = handler.definition();
        if self.handlers.contains_key(&tool.name) {
            return Err(ToolError::DuplicateTool { name: tool.name });
        }
        self.handlers
            .insert(tool.name.clone(), RegisteredHandler { tool, handler });
        Ok(())
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Execute one tool call. Always returns an envelope.
    pub async fn execute(&self, name: &str, params: Value) -> ToolExecutionResult {
        let start = Instant::now();

        let Some(entry) = self.handlers.get(name) else {
            tracing::warn!(tool = %name, "model requested unknown tool");
            return ToolExecutionResult::from_error(&ToolError::UnknownTool {
                name: name.to_string(),
            });
        };

        if let Err(e) = entry.tool.validate_arguments(&params) {
            tracing::warn!(tool = %name, error = %e, "tool arguments rejected");
            return ToolExecutionResult::from_error(&e);
        }

        let cacheable = entry.handler.cacheable();
        if cacheable {
            if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(name, &params)) {
                tracing::debug!(tool = %name, "tool result served from cache");
                return hit;
            }
        }

        let handler = Arc::clone(&entry.handler);
        let call_params = params.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { handler.execute(call_params).await }));

        let result = match tokio::time::timeout(self.timeout, &mut task.0).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                let reason = if join_err.is_panic() {
                    "handler panicked".to_string()
                } else {
                    "handler task was cancelled".to_string()
                };
                tracing::error!(tool = %name, reason = %reason, "tool handler crashed");
                ToolExecutionResult::from_error(&ToolError::Handler {
                    tool: name.to_string(),
                    reason,
                })
            }
            Err(_) => {
                task.0.abort();
                tracing::warn!(
                    tool = %name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "tool execution timed out"
                );
                ToolExecutionResult::from_error(&ToolError::Timeout {
                    tool: name.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        if let Some(cache) = &self.cache {
            if result.success {
                if cacheable {
                    cache.insert(name, &params, &result);
                } else {
                    cache.invalidate(entry.handler.invalidates());
                }
            }
        }

        tracing::info!(
            tool = %name,
            success = result.success,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "tool executed"
        );

        result
    }
}

struct AbortOnDrop<T>(tokio::task::JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::types::ToolParameter;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Echo {
        calls: AtomicUsize,
        cacheable: bool,
    }

    #[async_trait]
    impl ToolHandler for Echo {
        fn definition(&self) -> Tool {
            Tool::new("echo", "Echo the input")
                .with_param(ToolParameter::string("text", "Text to echo").required())
        }

        fn cacheable(&self) -> bool {
            self.cacheable
        }

        async fn execute(&self, params: Value) -> ToolExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolExecutionResult::ok(params["text"].clone(), "echoed")
        }
    }

    struct Writer;

    #[async_trait]
    impl ToolHandler for Writer {
        fn definition(&self) -> Tool {
            Tool::new("write", "Write something")
        }

        fn invalidates(&self) -> &'static [&'static str] {
            &["echo"]
        }

        async fn execute(&self, _params: Value) -> ToolExecutionResult {
            ToolExecutionResult::ok(json!(true), "written")
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolHandler for Panics {
        fn definition(&self) -> Tool {
            Tool::new("panics", "Always panics")
        }

        async fn execute(&self, _params: Value) -> ToolExecutionResult {
            panic!("handler exploded");
        }
    }

    struct Sleeps;

    #[async_trait]
    impl ToolHandler for Sleeps {
        fn definition(&self) -> Tool {
            Tool::new("sleeps", "Never finishes in time")
        }

        async fn execute(&self, _params: Value) -> ToolExecutionResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ToolExecutionResult::ok(json!(null), "late")
        }
    }

    fn echo(cacheable: bool) -> Arc<Echo> {
        Arc::new(Echo {
            calls: AtomicUsize::new(0),
            cacheable,
        })
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failure_envelope() {
        let executor = ToolExecutor::new(Duration::from_secs(1));
        let result = executor.execute("send_invoice", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool: send_invoice"));
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_handler_rejected() {
        let mut executor = ToolExecutor::new(Duration::from_secs(1));
        executor.register(echo(false)).unwrap();
        assert!(matches!(
            executor.register(echo(false)),
            Err(ToolError::DuplicateTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_arguments_skip_handler() {
        let handler = echo(false);
        let mut executor = ToolExecutor::new(Duration::from_secs(1));
        executor.register(handler.clone()).unwrap();

        let result = executor.execute("echo", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing required field: 'text'"));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_failure() {
        let mut executor = ToolExecutor::new(Duration::from_secs(1));
        executor.register(Arc::new(Panics)).unwrap();
        let result = executor.execute("panics", json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("handler panicked"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_failure() {
        let mut executor = ToolExecutor::new(Duration::from_millis(50));
        executor.register(Arc::new(Sleeps)).unwrap();
        let result = executor.execute("sleeps", json!({})).await;
        assert!(!result.success);
        assert_eq!(result.message, "Timed out");
    }

    #[tokio::test]
    async fn test_cacheable_results_reused() {
        let handler = echo(true);
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 16));
        let mut executor = ToolExecutor::new(Duration::from_secs(1)).with_cache(cache.clone());
        executor.register(handler.clone()).unwrap();

        let first = executor.execute("echo", json!({"text": "hi"})).await;
        let second = executor.execute("echo", json!({"text": "hi"})).await;
        assert_eq!(first, second);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);

        executor.register(Arc::new(Writer)).unwrap();
        assert!(executor.execute("write", json!({})).await.success);
        assert!(cache.is_empty());

        executor.execute("echo", json!({"text": "hi"})).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_cacheable_always_runs() {
        let handler = echo(false);
        let cache = Arc::new(ResultCache::new(Duration::from_secs(60), 16));
        let mut executor = ToolExecutor::new(Duration::from_secs(1)).with_cache(cache);
        executor.register(handler.clone()).unwrap();

        executor.execute("echo", json!({"text": "a"})).await;
        executor.execute("echo", json!({"text": "a"})).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }
}
