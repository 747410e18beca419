//! Canonical request/response shapes for the `/chat` endpoint.
//!
//! Mirrors `ApiMessage`/`ChatRequest` from the source proxy's Pydantic models,
//! translated to serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Google,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ToolCallFunction {
    pub name: Option<String>,
    /// JSON-encoded arguments, never a nested object.
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    pub index: Option<usize>,
    pub id: Option<String>,
    #[serde(default = "default_function_type")]
    pub r#type: String,
    pub function: ToolCallFunction,
}

fn default_function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ApiMessage {
    /// A message is empty (and should be filtered) if it carries neither text nor tool calls.
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.tool_calls.is_none()
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            name: None,
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanonicalRequest {
    pub provider: Provider,
    pub model: String,
    pub api_key: String,
    #[serde(default)]
    pub api_address: Option<String>,
    pub messages: Vec<ApiMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default, alias = "useWebSearch")]
    pub use_web_search: Option<bool>,
    #[serde(default, alias = "force_google_reasoning_prompt")]
    pub force_custom_reasoning_prompt: Option<bool>,
    #[serde(default)]
    pub custom_model_parameters: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub custom_extra_body: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub index: usize,
    pub title: String,
    pub href: String,
    pub snippet: String,
}

/// Wire-format event emitted to the downstream caller, one JSON object per line.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum NormalizedEvent {
    #[serde(rename = "content")]
    Content { text: String, timestamp: String },
    #[serde(rename = "reasoning")]
    Reasoning { text: String, timestamp: String },
    #[serde(rename = "reasoning_finish")]
    ReasoningFinish { timestamp: String },
    #[serde(rename = "tool_calls_chunk")]
    ToolCallsChunk { data: Value, timestamp: String },
    #[serde(rename = "google_function_call_request")]
    GoogleFunctionCallRequest {
        id: String,
        name: String,
        arguments_obj: Value,
        timestamp: String,
    },
    #[serde(rename = "status_update")]
    StatusUpdate { stage: StatusStage, timestamp: String },
    #[serde(rename = "web_search_results")]
    WebSearchResults {
        results: Vec<SearchResult>,
        timestamp: String,
    },
    #[serde(rename = "finish")]
    Finish { reason: String, timestamp: String },
    #[serde(rename = "error")]
    Error {
        message: String,
        timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        upstream_status: Option<u16>,
    },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusStage {
    WebIndexingStarted,
    WebAnalysisStarted,
    WebAnalysisComplete,
}

impl NormalizedEvent {
    /// Serialize as a single LF-terminated JSON line, the proxy's wire format.
    pub fn to_line(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).expect("NormalizedEvent is always serializable");
        bytes.push(b'\n');
        bytes
    }
}

/// Current UTC time, ISO-8601 with millisecond precision — matches the source proxy's
/// `datetime.datetime.utcnow().isoformat() + "Z"` timestamps on every event.
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_message_empty_filter() {
        let empty = ApiMessage {
            role: "assistant".into(),
            content: None,
            name: None,
            tool_call_id: None,
            tool_calls: None,
        };
        assert!(empty.is_empty());

        let with_content = ApiMessage {
            content: Some("hi".into()),
            ..empty.clone()
        };
        assert!(!with_content.is_empty());
    }

    #[test]
    fn event_serializes_as_single_line() {
        let event = NormalizedEvent::Content {
            text: "hi".into(),
            timestamp: "2024-01-01T00:00:00.000Z".into(),
        };
        let line = event.to_line();
        assert!(line.ends_with(b"\n"));
        let s = String::from_utf8(line).unwrap();
        assert_eq!(s.matches('\n').count(), 1);
        let parsed: Value = serde_json::from_str(s.trim_end()).unwrap();
        assert_eq!(parsed["type"], "content");
        assert_eq!(parsed["text"], "hi");
    }

    #[test]
    fn timestamp_format_is_iso8601_utc() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), "2024-01-01T00:00:00.000Z".len());
    }
}
