//! OpenAI-compatible chat-completions SSE delta parsing (spec §4.5 "OpenAI parser").
//!
//! Modeled on `aiproxy_common::sse::openai::parse_openai_chat_sse`'s shape: one `data:`
//! payload in, a small enum of what happened out. No state carried across calls — OpenAI
//! chat-completions deltas are self-describing per line.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum OpenAiDelta {
    Reasoning(String),
    Content(String),
    ToolCallsChunk(Value),
    Finish(String),
    Error(String),
    Done,
}

/// Parse one `data: <payload>` line's payload (the `data: ` prefix already stripped by
/// the caller). Returns `None` for lines carrying nothing actionable (e.g. a chunk with
/// an empty delta and no finish_reason).
pub fn parse_openai_line(payload: &str) -> Option<OpenAiDelta> {
    let payload = payload.trim();
    if payload.is_empty() {
        return None;
    }
    if payload == "[DONE]" {
        return Some(OpenAiDelta::Done);
    }

    let data: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(%payload, "unparseable OpenAI SSE payload");
            return None;
        }
    };

    if let Some(error) = data.get("error") {
        let msg = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown OpenAI error")
            .to_string();
        return Some(OpenAiDelta::Error(msg));
    }

    let choice = data.get("choices")?.get(0)?;
    let delta = choice.get("delta");

    if let Some(delta) = delta {
        // Some providers (DeepSeek-reasoner and compatible gateways) send a dedicated
        // reasoning_content field alongside content.
        if let Some(reasoning) = delta.get("reasoning_content").and_then(|r| r.as_str()) {
            if !reasoning.is_empty() {
                return Some(OpenAiDelta::Reasoning(reasoning.to_string()));
            }
        }
        if let Some(content) = delta.get("content").and_then(|c| c.as_str()) {
            if !content.is_empty() {
                return Some(OpenAiDelta::Content(content.to_string()));
            }
        }
        if let Some(tool_calls) = delta.get("tool_calls") {
            if tool_calls.is_array() {
                return Some(OpenAiDelta::ToolCallsChunk(tool_calls.clone()));
            }
        }
    }

    if let Some(finish) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        return Some(OpenAiDelta::Finish(finish.to_string()));
    }

    None
}
