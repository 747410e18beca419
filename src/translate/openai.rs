//! OpenAI-compatible chat/completions request translation (spec §4.2 "OpenAI target").

use serde_json::{json, Map, Value};

use super::{merge_katex_directive, UpstreamRequest};
use crate::config::Config;
use crate::model::CanonicalRequest;
use crate::reasoning::GuidedMode;

/// Appended to the last user message to request the legacy separator-delimited format
/// (spec §4.5 "Legacy separator mode").
fn legacy_reasoning_instruction(separator: &str) -> String {
    format!(
        "\n\nFirst, think through the problem step by step. Then write the exact line \"{separator}\" on its own, followed by your final answer."
    )
}

pub fn build_openai_request(
    req: &CanonicalRequest,
    cfg: &Config,
    mode: GuidedMode,
    separator: &str,
) -> UpstreamRequest {
    let base = req
        .api_address
        .clone()
        .unwrap_or_else(|| cfg.default_openai_api_base_url.clone());
    let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));

    let mut messages = req.messages.clone();
    merge_katex_directive(&mut messages);

    if mode == GuidedMode::LegacySeparator {
        if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == "user") {
            let existing = last_user.content.take().unwrap_or_default();
            last_user.content = Some(format!("{existing}{}", legacy_reasoning_instruction(separator)));
        }
    }

    let mut body = Map::new();
    body.insert("model".to_string(), json!(req.model));
    body.insert("messages".to_string(), json!(messages));
    body.insert("stream".to_string(), json!(true));

    if let Some(t) = req.temperature {
        body.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = req.top_p {
        body.insert("top_p".to_string(), json!(p));
    }
    if let Some(m) = req.max_tokens {
        body.insert("max_tokens".to_string(), json!(m));
    }
    if let Some(tools) = &req.tools {
        body.insert("tools".to_string(), json!(tools));
    }
    if let Some(choice) = &req.tool_choice {
        body.insert("tool_choice".to_string(), choice.clone());
    }

    if let Some(extra) = &req.custom_model_parameters {
        for (k, v) in extra {
            body.insert(k.clone(), v.clone());
        }
    }
    if let Some(extra_body) = &req.custom_extra_body {
        let mut nested = Map::new();
        for (k, v) in extra_body {
            nested.insert(k.clone(), v.clone());
        }
        body.insert("extra_body".to_string(), Value::Object(nested));
    }

    UpstreamRequest {
        url,
        headers: vec![
            ("Content-Type", "application/json".to_string()),
            ("Authorization", format!("Bearer {}", req.api_key)),
        ],
        body: Value::Object(body),
    }
}
