//! `/chat` orchestrator (spec §4.7): validates the request, optionally runs web search,
//! builds the provider payload, opens the upstream stream, and drives
//! framer -> parser -> extractor -> downstream emitter.
//!
//! Structured as a `futures_util::stream::unfold` state machine rather than a spawned
//! task + channel, following `aiproxy_common::sse::streaming`'s "poll the byte stream in
//! a loop, feed the line parser, accumulate" shape — generalized here to yield each
//! produced `NormalizedEvent` immediately instead of waiting for the whole turn.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::time::timeout;
use tracing::Instrument;

use crate::config::Config;
use crate::error::ProxyError;
use crate::model::{
    now_iso, ApiMessage, CanonicalRequest, NormalizedEvent, Provider, StatusStage,
};
use crate::reasoning::{decide_mode, Extractor, GuidedMode};
use crate::search::{build_search_context_message, web_search};
use crate::sse::google::{parse_google_line, GoogleDelta};
use crate::sse::openai::{parse_openai_line, OpenAiDelta};
use crate::sse::LineFramer;
use crate::translate::{google::build_google_request, openai::build_openai_request, UpstreamRequest};

#[derive(Clone)]
pub struct AppState {
    pub client: Option<reqwest::Client>,
    pub config: Arc<Config>,
}

pub fn generate_request_id() -> String {
    hex_prefix(uuid::Uuid::new_v4().as_bytes(), 8)
}

fn generate_function_call_id() -> String {
    format!("gemini_fc_{}", hex_prefix(uuid::Uuid::new_v4().as_bytes(), 4))
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes[..len].iter().map(|b| format!("{b:02x}")).collect()
}

/// Entry point used by the `POST /chat` handler. Returns a byte stream ready to hand to
/// `axum::body::Body::from_stream`, or a pre-stream `ProxyError` for validation/pool
/// failures that never open a connection.
pub async fn handle_chat(
    app: AppState,
    req: CanonicalRequest,
) -> Result<impl Stream<Item = Result<Bytes, Infallible>>, ProxyError> {
    let request_id = generate_request_id();
    let span = tracing::info_span!("chat", request_id = %request_id);
    handle_chat_inner(app, req).instrument(span).await
}

async fn handle_chat_inner(
    app: AppState,
    mut req: CanonicalRequest,
) -> Result<impl Stream<Item = Result<Bytes, Infallible>>, ProxyError> {
    let Some(client) = app.client.clone() else {
        return Err(ProxyError::Configuration);
    };

    req.messages.retain(|m| !m.is_empty());
    if req.messages.is_empty() {
        return Err(ProxyError::Validation(
            "messages must contain at least one non-empty entry".to_string(),
        ));
    }

    let mode = decide_mode(req.provider, &req.model, req.force_custom_reasoning_prompt);
    tracing::info!(?mode, provider = ?req.provider, model = %req.model, "chat request accepted");

    let mut pending: VecDeque<NormalizedEvent> = VecDeque::new();
    let mut search_performed = false;

    if req.use_web_search == Some(true) {
        search_performed = true;
        let query = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .and_then(|m| m.content.clone())
            .unwrap_or_default();

        pending.push_back(NormalizedEvent::StatusUpdate {
            stage: StatusStage::WebIndexingStarted,
            timestamp: now_iso(),
        });

        let results = web_search(&client, &app.config, &query).await;
        if !results.is_empty() {
            pending.push_back(NormalizedEvent::WebSearchResults {
                results: results.clone(),
                timestamp: now_iso(),
            });
            let context = build_search_context_message(&query, &results);
            inject_search_message(&mut req.messages, req.provider, &req.model, context);
        }

        pending.push_back(NormalizedEvent::StatusUpdate {
            stage: StatusStage::WebAnalysisStarted,
            timestamp: now_iso(),
        });
    }

    let upstream = match req.provider {
        Provider::Openai => build_openai_request(
            &req,
            &app.config,
            mode,
            &app.config.thinking_process_separator,
        ),
        Provider::Google => build_google_request(&req, &app.config, mode),
    };

    let separator = app.config.thinking_process_separator.clone();
    let max_line_len = app.config.max_sse_line_length;
    let read_timeout = app.config.read_timeout;
    let provider = req.provider;

    let opened = open_upstream(&client, &upstream).await;

    let byte_stream: UpstreamByteStream = match opened {
        Ok(stream) => stream,
        Err(UpstreamOpenError::Rejected { status, message }) => {
            pending.push_back(NormalizedEvent::Error {
                message,
                timestamp: now_iso(),
                upstream_status: Some(status),
            });
            pending.push_back(NormalizedEvent::Finish {
                reason: "upstream_error".to_string(),
                timestamp: now_iso(),
            });
            return Ok(TurnStream::exhausted(pending));
        }
        Err(UpstreamOpenError::Network(err)) => {
            tracing::error!(%err, "failed to open upstream connection");
            pending.push_back(NormalizedEvent::Error {
                message: err,
                timestamp: now_iso(),
                upstream_status: None,
            });
            pending.push_back(NormalizedEvent::Finish {
                reason: "network_error".to_string(),
                timestamp: now_iso(),
            });
            return Ok(TurnStream::exhausted(pending));
        }
    };

    let state = TurnState {
        byte_stream,
        framer: LineFramer::new(max_line_len),
        extractor: Extractor::new(mode, separator),
        provider,
        mode,
        pending,
        finished: false,
        terminal_finish_emitted: false,
        first_chunk_seen: false,
        search_performed,
        read_timeout,
    };

    Ok(TurnStream::running(state))
}

/// Merges search context per spec §4.7 step 5: inserted before the last user message,
/// except DeepSeek-reasoner-like OpenAI models, which merge it into the leading system
/// message since those upstreams are known to ignore non-leading system turns.
fn inject_search_message(messages: &mut Vec<ApiMessage>, provider: Provider, model: &str, context: String) {
    let is_deepseek = provider == Provider::Openai && model.to_lowercase().contains("deepseek");

    if is_deepseek {
        if let Some(first) = messages.first_mut() {
            if first.role == "system" {
                let existing = first.content.take().unwrap_or_default();
                first.content = Some(format!("{context}\n\n{existing}"));
                return;
            }
        }
        messages.insert(0, ApiMessage::system(context));
        return;
    }

    let last_user_pos = messages.iter().rposition(|m| m.role == "user");
    match last_user_pos {
        Some(pos) => messages.insert(pos, ApiMessage::system(context)),
        None => messages.insert(0, ApiMessage::system(context)),
    }
}

type UpstreamByteStream = std::pin::Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

enum UpstreamOpenError {
    Rejected { status: u16, message: String },
    Network(String),
}

async fn open_upstream(
    client: &reqwest::Client,
    upstream: &UpstreamRequest,
) -> Result<UpstreamByteStream, UpstreamOpenError> {
    let mut builder = client.post(&upstream.url).json(&upstream.body);
    for (name, value) in &upstream.headers {
        builder = builder.header(*name, value);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| UpstreamOpenError::Network(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = extract_upstream_error_message(&body);
        return Err(UpstreamOpenError::Rejected { status, message });
    }

    Ok(Box::pin(response.bytes_stream()))
}

fn extract_upstream_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(str::to_string))
                .or_else(|| v.get("message").and_then(|m| m.as_str().map(str::to_string)))
        })
        .unwrap_or_else(|| body.to_string())
}

struct TurnState {
    byte_stream: UpstreamByteStream,
    framer: LineFramer,
    extractor: Extractor,
    provider: Provider,
    mode: GuidedMode,
    pending: VecDeque<NormalizedEvent>,
    finished: bool,
    terminal_finish_emitted: bool,
    first_chunk_seen: bool,
    search_performed: bool,
    read_timeout: std::time::Duration,
}

impl TurnState {
    fn process_line(&mut self, line: &[u8]) {
        let Ok(text) = std::str::from_utf8(line) else {
            tracing::warn!("SSE line was not valid UTF-8; dropping");
            return;
        };
        let Some(payload) = text.strip_prefix("data: ").or_else(|| text.strip_prefix("data:")) else {
            return;
        };
        let ts = now_iso();

        match self.provider {
            Provider::Openai => self.process_openai_payload(payload, &ts),
            Provider::Google => self.process_google_payload(payload, &ts),
        }
    }

    fn process_openai_payload(&mut self, payload: &str, ts: &str) {
        match parse_openai_line(payload) {
            Some(OpenAiDelta::Reasoning(text)) => {
                self.pending.extend(self.extractor.push_reasoning_native(&text, ts));
            }
            Some(OpenAiDelta::Content(text)) => {
                self.pending.extend(self.extractor.push_content(&text, ts));
            }
            Some(OpenAiDelta::ToolCallsChunk(data)) => {
                self.pending.extend(self.extractor.finalize_pre_signal(ts));
                self.pending.push_back(NormalizedEvent::ToolCallsChunk {
                    data,
                    timestamp: ts.to_string(),
                });
            }
            Some(OpenAiDelta::Finish(reason)) => {
                self.pending.extend(self.extractor.finalize(ts));
                self.pending.push_back(NormalizedEvent::Finish {
                    reason,
                    timestamp: ts.to_string(),
                });
                self.terminal_finish_emitted = true;
                self.finished = true;
            }
            Some(OpenAiDelta::Error(message)) => {
                self.pending.push_back(NormalizedEvent::Error {
                    message,
                    timestamp: ts.to_string(),
                    upstream_status: None,
                });
            }
            Some(OpenAiDelta::Done) => {
                if !self.terminal_finish_emitted {
                    self.pending.extend(self.extractor.finalize(ts));
                    self.pending.push_back(NormalizedEvent::Finish {
                        reason: "stop".to_string(),
                        timestamp: ts.to_string(),
                    });
                    self.terminal_finish_emitted = true;
                }
                self.finished = true;
            }
            None => {}
        }
    }

    fn process_google_payload(&mut self, payload: &str, ts: &str) {
        for delta in parse_google_line(payload) {
            match delta {
                GoogleDelta::Text(text) => {
                    if self.mode == GuidedMode::GoogleJsonSchema {
                        self.pending.extend(self.extractor.push_json_delta(&text, ts));
                    } else {
                        self.pending.extend(self.extractor.push_content(&text, ts));
                    }
                }
                GoogleDelta::FunctionCall { name, args } => {
                    self.pending.extend(self.extractor.finalize_pre_signal(ts));
                    self.pending.push_back(NormalizedEvent::GoogleFunctionCallRequest {
                        id: generate_function_call_id(),
                        name,
                        arguments_obj: args,
                        timestamp: ts.to_string(),
                    });
                }
                GoogleDelta::Finish(reason) => {
                    if self.mode == GuidedMode::GoogleJsonSchema {
                        self.pending.extend(self.extractor.finalize_json_schema(ts));
                    }
                    self.pending.extend(self.extractor.finalize(ts));
                    self.pending.push_back(NormalizedEvent::Finish {
                        reason,
                        timestamp: ts.to_string(),
                    });
                    self.terminal_finish_emitted = true;
                    self.finished = true;
                }
                GoogleDelta::Error(message) => {
                    self.pending.push_back(NormalizedEvent::Error {
                        message,
                        timestamp: ts.to_string(),
                        upstream_status: None,
                    });
                }
            }
        }
    }
}

/// Thin wrapper so callers get a plain `Stream<Item = Result<Bytes, Infallible>>`
/// regardless of whether the turn errored out before opening a connection (`exhausted`,
/// a fixed queue) or is actively pulling from upstream (`running`).
pub struct TurnStream {
    inner: std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, Infallible>> + Send>>,
}

impl TurnStream {
    fn exhausted(pending: VecDeque<NormalizedEvent>) -> Self {
        let items: Vec<_> = pending.into_iter().map(|e| Ok(Bytes::from(e.to_line()))).collect();
        Self {
            inner: Box::pin(futures_util::stream::iter(items)),
        }
    }

    fn running(state: TurnState) -> Self {
        let stream = futures_util::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.pending.pop_front() {
                    return Some((Ok(Bytes::from(event.to_line())), state));
                }
                if state.finished {
                    return None;
                }

                match timeout(state.read_timeout, state.byte_stream.next()).await {
                    Ok(Some(Ok(chunk))) => {
                        if !state.first_chunk_seen {
                            state.first_chunk_seen = true;
                            if state.search_performed {
                                state.pending.push_back(NormalizedEvent::StatusUpdate {
                                    stage: StatusStage::WebAnalysisComplete,
                                    timestamp: now_iso(),
                                });
                            }
                        }
                        let lines = state.framer.feed(&chunk);
                        for line in lines {
                            state.process_line(&line);
                        }
                        tokio::task::yield_now().await;
                    }
                    Ok(Some(Err(err))) => {
                        tracing::error!(%err, "upstream stream error");
                        let ts = now_iso();
                        state.pending.push_back(NormalizedEvent::Error {
                            message: err.to_string(),
                            timestamp: ts.clone(),
                            upstream_status: None,
                        });
                        state.pending.push_back(NormalizedEvent::Finish {
                            reason: "network_error".to_string(),
                            timestamp: ts,
                        });
                        state.terminal_finish_emitted = true;
                        state.finished = true;
                    }
                    Ok(None) => {
                        if let Some(line) = state.framer.flush() {
                            state.process_line(&line);
                        }
                        let ts = now_iso();
                        if !state.terminal_finish_emitted {
                            state.pending.extend(state.extractor.finalize(&ts));
                            state.pending.push_back(NormalizedEvent::Finish {
                                reason: "stop".to_string(),
                                timestamp: ts,
                            });
                            state.terminal_finish_emitted = true;
                        }
                        state.finished = true;
                    }
                    Err(_elapsed) => {
                        tracing::warn!("upstream read timed out");
                        let ts = now_iso();
                        state.pending.push_back(NormalizedEvent::Error {
                            message: "Upstream read timed out".to_string(),
                            timestamp: ts.clone(),
                            upstream_status: None,
                        });
                        state.pending.push_back(NormalizedEvent::Finish {
                            reason: "timeout_error".to_string(),
                            timestamp: ts,
                        });
                        state.terminal_finish_emitted = true;
                        state.finished = true;
                    }
                }
            }
        });
        Self {
            inner: Box::pin(stream),
        }
    }
}

impl Stream for TurnStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
