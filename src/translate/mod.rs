//! Per-provider outbound request translation (spec §4.2).
//!
//! Each translator returns everything the orchestrator needs to open the upstream
//! stream: a URL, headers, and a JSON body. Field presence follows the "present-only"
//! idiom used throughout the example pack's provider clients (e.g.
//! `GeminiCompletion::generation_config`) — optional sampling knobs are inserted into a
//! `serde_json::Map` only when set, never emitted as `null`.

pub mod google;
pub mod openai;

use crate::model::ApiMessage;

pub struct UpstreamRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: serde_json::Value,
}

/// The KaTeX formatting directive merged into the outgoing system prompt (spec §4.2/§4.6).
pub const KATEX_DIRECTIVE: &str = "Format all mathematical expressions using KaTeX: wrap inline math in single dollar signs ($...$) and display math in double dollar signs ($$...$$).";

/// Merge the KaTeX directive into the message list's leading system message, or prepend
/// a new one if none exists. Operates on an owned copy so callers can reuse the
/// caller-supplied message list unmodified.
pub fn merge_katex_directive(messages: &mut Vec<ApiMessage>) {
    if let Some(first) = messages.first_mut() {
        if first.role == "system" {
            let existing = first.content.take().unwrap_or_default();
            first.content = Some(if existing.is_empty() {
                KATEX_DIRECTIVE.to_string()
            } else {
                format!("{existing}\n\n{KATEX_DIRECTIVE}")
            });
            return;
        }
    }
    messages.insert(0, ApiMessage::system(KATEX_DIRECTIVE));
}
