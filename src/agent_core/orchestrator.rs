//! AgentOrchestrator: the multi-turn tool-calling loop.
//!
//! ```text
//! AwaitingModel ──text──▶ Terminal
//!      │  ▲
//! tool calls│  └──────────── Executing ◀── ToolCallsPending
//!      ▼                                        ▲
//!  ToolCallsPending ────────────────────────────┘
//! ```
//!
//! Each turn sends the history plus tool schema to the routed model. A text
//! answer ends the run; tool calls are executed (concurrently when allowed),
//! their results appended in request order, and the loop continues.
//!
//! Failure policy:
//! - a model transport error or timeout is retried once on a fallback model;
//!   a second failure ends the run as `Failed(TransportError)`
//! - tool failures never end the run, they become `tool` messages
//! - malformed tool arguments degrade to `{}`
//! - the turn budget ends the run as `Failed(TurnBudgetExceeded)`
//! - cancellation is honoured before every model call and tool dispatch, and
//!   while waiting on either

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::errors::{AgentError, ErrorKind};
use super::history;
use super::tokens::{estimate_history_tokens, truncate_tool_content};
use super::types::{
    Message, RunEvent, RunOptions, RunOutcome, RunPhase, RunState, RunStatus, ToolCallRequest,
    ToolCallStatus,
};
use crate::config::AgentSettings;
use crate::inference::endpoint::ModelEndpoint;
use crate::inference::errors::InferenceError;
use crate::inference::reassembler::{ReassemblyEvent, StreamReassembler};
use crate::inference::structured_output::{Strategy, StructuredOutputParser};
use crate::inference::types::{CompletionRequest, ModelResponse, RawToolCall, ToolDefinition};
use crate::models::{ModelDescriptor, ModelRouter, TaskType};
use crate::tools::{ToolExecutionResult, ToolExecutor, ToolRegistry};

const EVENT_CHANNEL_CAPACITY: usize = 64;

type EventSink<'a> = Option<&'a mpsc::Sender<RunEvent>>;

async fn emit(events: EventSink<'_>, event: RunEvent) {
    if let Some(tx) = events {
        // A closed channel means the consumer is gone; its drop guard has
        // already cancelled the run.
        let _ = tx.send(event).await;
    }
}

fn new_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4().simple())
}

/// Why a single model call did not produce a response.
enum CallFailure {
    Cancelled,
    Inference(InferenceError),
}

// ─── Event stream ────────────────────────────────────────────────────────────

/// Stream of [`RunEvent`]s from [`AgentOrchestrator::run_streaming`].
///
/// Ends after [`RunEvent::Finished`]. Dropping it cancels the run.
pub struct RunEventStream {
    inner: ReceiverStream<RunEvent>,
    _cancel_on_drop: DropGuard,
}

impl Stream for RunEventStream {
    type Item = RunEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

// ─── AgentOrchestrator ───────────────────────────────────────────────────────

/// Drives runs. Cheap to clone; every run owns its own [`RunState`], so one
/// orchestrator serves any number of concurrent runs.
#[derive(Clone)]
pub struct AgentOrchestrator {
    endpoint: Arc<dyn ModelEndpoint>,
    router: Arc<ModelRouter>,
    registry: Arc<ToolRegistry>,
    executor: Arc<ToolExecutor>,
    parser: StructuredOutputParser,
    settings: Arc<AgentSettings>,
}

impl AgentOrchestrator {
    pub fn new(
        endpoint: Arc<dyn ModelEndpoint>,
        router: Arc<ModelRouter>,
        registry: Arc<ToolRegistry>,
        executor: Arc<ToolExecutor>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            endpoint,
            router,
            registry,
            executor,
            parser: StructuredOutputParser::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run to completion and return the outcome.
    pub async fn run(&self, history: Vec<Message>, options: RunOptions) -> RunOutcome {
        self.drive(history, options, None).await
    }

    /// Run on a background task, streaming events as they happen.
    ///
    /// Must be called from within a tokio runtime. The stream's last item is
    /// always [`RunEvent::Finished`].
    pub fn run_streaming(&self, history: Vec<Message>, mut options: RunOptions) -> RunEventStream {
        let run_token = options.cancel.child_token();
        options.cancel = run_token.clone();

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.drive(history, options, Some(&tx)).await;
            let _ = tx.send(RunEvent::Finished(outcome)).await;
        });

        RunEventStream {
            inner: ReceiverStream::new(rx),
            _cancel_on_drop: run_token.drop_guard(),
        }
    }

    // ─── Loop ────────────────────────────────────────────────────────────

    async fn drive(
        &self,
        history: Vec<Message>,
        options: RunOptions,
        events: EventSink<'_>,
    ) -> RunOutcome {
        let run_id = uuid::Uuid::new_v4();
        let max_turns = options.max_turns.unwrap_or(self.settings.max_turns);
        let mut state = RunState::new(self.prepare_history(history));
        let mut model_id = self
            .router
            .select_model(options.task, options.priority, &options.constraints)
            .id
            .clone();
        let mut seen_ids: HashSet<String> = state
            .history
            .iter()
            .flat_map(|m| m.tool_calls.iter().map(|c| c.id.clone()))
            .collect();

        tracing::info!(
            run_id = %run_id,
            task = %options.task,
            model = %model_id,
            max_turns = max_turns,
            tools = self.registry.len(),
            "=== AGENT RUN START ==="
        );

        loop {
            if options.cancel.is_cancelled() {
                return self.fail(state, AgentError::Cancelled, model_id);
            }
            if state.turn_count >= max_turns {
                tracing::warn!(
                    run_id = %run_id,
                    turns = state.turn_count,
                    "turn budget exhausted, ending run"
                );
                return self.fail(state, AgentError::TurnBudgetExceeded { max_turns }, model_id);
            }

            state.phase = RunPhase::AwaitingModel;
            state.turn_count += 1;

            tracing::info!(
                run_id = %run_id,
                turn = state.turn_count,
                message_count = state.history.len(),
                estimated_tokens = estimate_history_tokens(&state.history),
                "=== AGENT LOOP ROUND START ==="
            );

            let (response, used_model) = match self
                .call_with_fallback(&state.history, &model_id, options.task, &options.cancel, events)
                .await
            {
                Ok(ok) => ok,
                Err(e) => return self.fail(state, e, model_id),
            };
            model_id = used_model;

            tracing::info!(
                run_id = %run_id,
                turn = state.turn_count,
                model = %model_id,
                text_len = response.text.as_deref().map_or(0, str::len),
                tool_calls = response.tool_calls.len(),
                tool_names = ?response.tool_calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                finish_reason = ?response.finish_reason,
                "=== MODEL RESPONSE ==="
            );

            let ModelResponse {
                text, tool_calls, ..
            } = response;

            if tool_calls.is_empty() {
                state.history.push(Message::assistant(text.unwrap_or_default()));
                state.phase = RunPhase::Terminal;
                state.terminal = true;
                return self.finish(state, model_id);
            }

            state.phase = RunPhase::ToolCallsPending;
            let mut calls: Vec<ToolCallRequest> = tool_calls
                .into_iter()
                .map(|raw| self.prepare_call(raw, &mut seen_ids))
                .collect();
            emit(events, RunEvent::ToolCallsFinalized(calls.clone())).await;

            state.phase = RunPhase::Executing;
            let executed = self.execute_calls(&mut calls, &options.cancel, events).await;
            self.append_turn(&mut state, text.unwrap_or_default(), calls);

            if let Err(e) = executed {
                return self.fail(state, e, model_id);
            }
        }
    }

    fn prepare_history(&self, mut history: Vec<Message>) -> Vec<Message> {
        if let Err(violation) = history::check_tool_pairing(&history) {
            tracing::warn!(error = %violation, "caller history breaks tool-call pairing");
        }
        if !history::has_system_message(&history) {
            if let Some(prompt) = self.settings.system_prompt.as_deref() {
                if !prompt.trim().is_empty() {
                    history.insert(0, Message::system(prompt));
                }
            }
        }
        history
    }

    /// Assistant message with this turn's calls, then one `tool` message per
    /// finished call in request order.
    fn append_turn(&self, state: &mut RunState, text: String, calls: Vec<ToolCallRequest>) {
        let max_chars = self.settings.max_tool_result_chars;
        let tool_messages: Vec<Message> = calls
            .iter()
            .filter_map(|call| {
                call.result.as_ref().map(|result| {
                    let content =
                        truncate_tool_content(&result.to_model_content(), max_chars, &call.name);
                    Message::tool_result(&call.id, &call.name, content)
                })
            })
            .collect();
        state
            .history
            .push(Message::assistant_with_tool_calls(text, calls));
        state.history.extend(tool_messages);
    }

    fn finish(&self, state: RunState, model_id: String) -> RunOutcome {
        if let Err(violation) = history::check_tool_pairing(&state.history) {
            tracing::error!(error = %violation, "run history breaks tool-call pairing");
        }
        tracing::info!(
            turns = state.turn_count,
            messages = state.history.len(),
            model = %model_id,
            "=== AGENT RUN COMPLETE ==="
        );
        RunOutcome {
            status: RunStatus::Terminal,
            history: state.history,
            turn_count: state.turn_count,
            model_id,
            error_kind: None,
            error: None,
        }
    }

    fn fail(&self, mut state: RunState, error: AgentError, model_id: String) -> RunOutcome {
        let kind = error.kind();
        if kind == ErrorKind::Cancelled {
            tracing::info!(turns = state.turn_count, "run cancelled by caller");
        } else {
            tracing::warn!(
                turns = state.turn_count,
                error_kind = %kind,
                error = %error,
                "=== AGENT RUN FAILED ==="
            );
        }
        state.phase = RunPhase::Failed;
        let message = error.to_string();
        state.last_error = Some(error);
        RunOutcome {
            status: RunStatus::Failed,
            history: state.history,
            turn_count: state.turn_count,
            model_id,
            error_kind: Some(kind),
            error: Some(message),
        }
    }

    // ─── Model calls ─────────────────────────────────────────────────────

    /// Call `model_id`, retrying once on a fallback model after a retriable
    /// failure. Returns the response and the model that produced it.
    async fn call_with_fallback(
        &self,
        history: &[Message],
        model_id: &str,
        task: TaskType,
        cancel: &CancellationToken,
        events: EventSink<'_>,
    ) -> Result<(ModelResponse, String), AgentError> {
        let first_err = match self.call_model(history, model_id, cancel, events).await {
            Ok(response) => return Ok((response, model_id.to_string())),
            Err(CallFailure::Cancelled) => return Err(AgentError::Cancelled),
            Err(CallFailure::Inference(e)) => e,
        };

        if !first_err.is_retriable() {
            tracing::error!(model = %model_id, error = %first_err, "model call failed, not retriable");
            return Err(AgentError::transport(model_id, &first_err));
        }

        let fallback_id = self.fallback_model_id(task, model_id);
        tracing::warn!(
            model = %model_id,
            fallback = %fallback_id,
            error = %first_err,
            "model call failed, retrying once on fallback model"
        );
        emit(
            events,
            RunEvent::Retrying {
                failed_model: model_id.to_string(),
                fallback_model: fallback_id.clone(),
                reason: first_err.to_string(),
            },
        )
        .await;

        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        match self.call_model(history, &fallback_id, cancel, events).await {
            Ok(response) => Ok((response, fallback_id)),
            Err(CallFailure::Cancelled) => Err(AgentError::Cancelled),
            Err(CallFailure::Inference(e)) => {
                tracing::error!(model = %fallback_id, error = %e, "fallback model call failed");
                Err(AgentError::transport(&fallback_id, &e))
            }
        }
    }

    /// Configured fallback, else the router's; never the model that failed
    /// while an alternative exists.
    fn fallback_model_id(&self, task: TaskType, failed_id: &str) -> String {
        if let Some(configured) = self.settings.fallback_model.as_deref() {
            if configured != failed_id && self.router.resolve(configured).is_some() {
                return configured.to_string();
            }
        }
        self.router.fallback_model(task, failed_id).id.clone()
    }

    fn descriptor(&self, model_id: &str) -> Option<&ModelDescriptor> {
        self.router.resolve(model_id)
    }

    fn tool_schema(&self, model_id: &str) -> Option<Vec<ToolDefinition>> {
        let supports_tools = self
            .descriptor(model_id)
            .map_or(true, |m| m.supports_tool_calls);
        if !supports_tools || self.registry.is_empty() {
            return None;
        }
        Some(self.registry.to_calling_convention())
    }

    async fn call_model(
        &self,
        history: &[Message],
        model_id: &str,
        cancel: &CancellationToken,
        events: EventSink<'_>,
    ) -> Result<ModelResponse, CallFailure> {
        let request = CompletionRequest {
            model: model_id.to_string(),
            messages: history::to_wire(history),
            tools: self.tool_schema(model_id),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let timeout = self.settings.model_timeout();
        let streams = self
            .descriptor(model_id)
            .map_or(true, |m| m.supports_streaming);

        let call = async move {
            match events {
                Some(tx) if streams => self.stream_completion(request, tx).await,
                Some(tx) => {
                    let response = self.endpoint.complete(request).await?;
                    if let Some(text) = response.text.as_deref().filter(|t| !t.is_empty()) {
                        emit(Some(tx), RunEvent::TextDelta(text.to_string())).await;
                    }
                    Ok(response)
                }
                None => self.endpoint.complete(request).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallFailure::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(CallFailure::Inference(e)),
                Err(_) => Err(CallFailure::Inference(InferenceError::Timeout {
                    duration_secs: timeout.as_secs(),
                })),
            },
        }
    }

    async fn stream_completion(
        &self,
        request: CompletionRequest,
        events: &mpsc::Sender<RunEvent>,
    ) -> Result<ModelResponse, InferenceError> {
        let mut stream = self.endpoint.complete_stream(request).await?;
        let mut reassembler = StreamReassembler::new();

        while let Some(delta) = stream.next().await {
            for event in reassembler.push(delta?) {
                match event {
                    ReassemblyEvent::TextDelta(text) => {
                        emit(Some(events), RunEvent::TextDelta(text)).await;
                    }
                    // Announced once ids are assigned, see `drive`.
                    ReassemblyEvent::ToolCallsFinalized(_) => {}
                }
            }
        }

        Ok(reassembler.finish())
    }

    // ─── Tool calls ──────────────────────────────────────────────────────

    fn prepare_call(&self, raw: RawToolCall, seen_ids: &mut HashSet<String>) -> ToolCallRequest {
        let id = raw
            .id
            .clone()
            .filter(|id| !id.trim().is_empty() && !seen_ids.contains(id))
            .unwrap_or_else(new_call_id);
        seen_ids.insert(id.clone());
        let arguments = self.parse_arguments(&raw.name, &raw.arguments);
        ToolCallRequest::new(id, raw, arguments)
    }

    /// Parse raw argument text. Anything that is not a JSON object becomes `{}`.
    fn parse_arguments(&self, tool: &str, raw: &str) -> Value {
        if raw.trim().is_empty() {
            return json!({});
        }
        match self.parser.parse(raw) {
            Ok(parsed) if parsed.value.is_object() => {
                if parsed.strategy != Strategy::Verbatim {
                    tracing::debug!(
                        tool = %tool,
                        strategy = ?parsed.strategy,
                        "tool arguments recovered from malformed JSON"
                    );
                }
                parsed.value
            }
            Ok(parsed) => {
                tracing::warn!(tool = %tool, value = %parsed.value, "tool arguments are not an object, using {{}}");
                json!({})
            }
            Err(e) => {
                tracing::warn!(tool = %tool, error = %e, "malformed tool arguments, using {{}}");
                json!({})
            }
        }
    }

    /// Execute every call, recording results on the requests in place.
    ///
    /// With fan-out enabled, calls run concurrently and results are attached
    /// in request order. Returns `Cancelled` if the run was cancelled; calls
    /// finished before that keep their results.
    async fn execute_calls(
        &self,
        calls: &mut [ToolCallRequest],
        cancel: &CancellationToken,
        events: EventSink<'_>,
    ) -> Result<(), AgentError> {
        if self.settings.parallel_tool_calls && calls.len() > 1 {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            for call in calls.iter_mut() {
                call.status = ToolCallStatus::Executing;
            }
            tracing::info!(count = calls.len(), "dispatching tool calls concurrently");

            let mut pending: FuturesUnordered<_> = calls
                .iter()
                .enumerate()
                .map(|(index, call)| {
                    let name = call.name.clone();
                    let arguments = call.arguments.clone();
                    async move { (index, self.executor.execute(&name, arguments).await) }
                })
                .collect();

            let mut results: Vec<Option<ToolExecutionResult>> = vec![None; calls.len()];
            let mut cancelled = false;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        cancelled = true;
                        break;
                    }
                    next = pending.next() => match next {
                        Some((index, result)) => results[index] = Some(result),
                        None => break,
                    },
                }
            }
            // Unfinished handler tasks are aborted here.
            drop(pending);

            for (call, result) in calls.iter_mut().zip(results) {
                match result {
                    Some(result) => self.record_result(call, result, events).await,
                    None => call.status = ToolCallStatus::Pending,
                }
            }
            if cancelled {
                return Err(AgentError::Cancelled);
            }
            return Ok(());
        }

        for call in calls.iter_mut() {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            call.status = ToolCallStatus::Executing;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.executor.execute(&call.name, call.arguments.clone()) => Some(result),
            };
            let Some(result) = result else {
                call.status = ToolCallStatus::Pending;
                return Err(AgentError::Cancelled);
            };
            self.record_result(call, result, events).await;
        }
        Ok(())
    }

    async fn record_result(
        &self,
        call: &mut ToolCallRequest,
        result: ToolExecutionResult,
        events: EventSink<'_>,
    ) {
        if result.success {
            call.status = ToolCallStatus::Completed;
        } else {
            call.status = ToolCallStatus::Failed;
            let kind = if self.executor.has_handler(&call.name) {
                ErrorKind::ToolError
            } else {
                ErrorKind::UnknownTool
            };
            call.error_kind = Some(kind);
            tracing::warn!(
                tool = %call.name,
                call_id = %call.id,
                error_kind = %kind,
                error = result.error.as_deref().unwrap_or(""),
                "tool call failed, reporting back to model"
            );
        }

        emit(
            events,
            RunEvent::ToolResult {
                call_id: call.id.clone(),
                name: call.name.clone(),
                result: result.clone(),
            },
        )
        .await;
        call.result = Some(result);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
