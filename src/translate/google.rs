//! Gemini `streamGenerateContent` request translation (spec §4.2 "Google target").

use serde_json::{json, Map, Value};

use super::UpstreamRequest;
use crate::config::Config;
use crate::model::{ApiMessage, CanonicalRequest};
use crate::reasoning::GuidedMode;

const GOOGLE_GENERATE_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// System instruction prepended when JSON-schema reasoning mode is active, binding the
/// model to the `{reasoning, answer}` envelope the parser expects (spec §4.5).
const JSON_SCHEMA_INSTRUCTION: &str = "Respond with a single JSON object with exactly two string fields, \"reasoning\" and \"answer\". Put your step-by-step thinking in \"reasoning\" and your final answer in \"answer\". Do not include any text outside the JSON object.";

pub fn build_google_request(
    req: &CanonicalRequest,
    _cfg: &Config,
    mode: GuidedMode,
) -> UpstreamRequest {
    let url = format!(
        "{GOOGLE_GENERATE_BASE}/{}:streamGenerateContent?key={}&alt=sse",
        req.model, req.api_key
    );

    let mut messages = req.messages.clone();
    if mode == GuidedMode::GoogleJsonSchema {
        prepend_system_instruction(&mut messages, JSON_SCHEMA_INSTRUCTION);
    }

    let contents = translate_contents(&messages);

    let mut body = Map::new();
    body.insert("contents".to_string(), json!(contents));

    let declarations = req
        .tools
        .as_ref()
        .map(|tools| translate_tool_declarations(tools))
        .unwrap_or_default();
    if !declarations.is_empty() {
        body.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": declarations }]),
        );
    }
    if let Some(tool_choice) = &req.tool_choice {
        let names: Vec<String> = declarations
            .iter()
            .filter_map(|d| d.get("name").and_then(|n| n.as_str()).map(str::to_string))
            .collect();
        body.insert(
            "toolConfig".to_string(),
            map_tool_choice(Some(tool_choice), &names),
        );
    }

    let mut generation_config = Map::new();
    if let Some(t) = req.temperature {
        generation_config.insert("temperature".to_string(), json!(t));
    }
    if let Some(p) = req.top_p {
        generation_config.insert("topP".to_string(), json!(p));
    }
    if let Some(m) = req.max_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(m));
    }
    if mode == GuidedMode::GoogleJsonSchema {
        generation_config.insert("responseMimeType".to_string(), json!("application/json"));
        generation_config.insert(
            "responseSchema".to_string(),
            json!({
                "type": "OBJECT",
                "properties": {
                    "reasoning": {"type": "STRING"},
                    "answer": {"type": "STRING"},
                },
                "required": ["reasoning", "answer"],
            }),
        );
    }
    if !generation_config.is_empty() {
        body.insert("generationConfig".to_string(), Value::Object(generation_config));
    }

    if let Some(extra) = &req.custom_model_parameters {
        for (k, v) in extra {
            body.insert(k.clone(), v.clone());
        }
    }

    UpstreamRequest {
        url,
        headers: vec![("Content-Type", "application/json".to_string())],
        body: Value::Object(body),
    }
}

fn prepend_system_instruction(messages: &mut Vec<ApiMessage>, text: &str) {
    if let Some(first) = messages.first_mut() {
        if first.role == "system" {
            let existing = first.content.take().unwrap_or_default();
            first.content = Some(format!("{text}\n\n{existing}"));
            return;
        }
    }
    messages.insert(0, ApiMessage::system(text));
}

/// user -> `{role:user, parts:[{text}]}`; system -> a user-role block prefixed with
/// `[System Instruction or Context]` (Gemini v1beta streaming has no system role);
/// assistant -> `{role:model, parts:[...]}` with text and/or functionCall parts;
/// tool -> `{role:user, parts:[{functionResponse:{...}}]}`.
fn translate_contents(messages: &[ApiMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter(|m| !m.is_empty())
        .map(|m| match m.role.as_str() {
            "system" => json!({
                "role": "user",
                "parts": [{"text": format!("[System Instruction or Context]\n{}", m.content.clone().unwrap_or_default())}],
            }),
            "assistant" => {
                let mut parts = Vec::new();
                if let Some(text) = &m.content {
                    if !text.is_empty() {
                        parts.push(json!({"text": text}));
                    }
                }
                if let Some(tool_calls) = &m.tool_calls {
                    for call in tool_calls {
                        let name = call.function.name.clone().unwrap_or_default();
                        let args = call
                            .function
                            .arguments
                            .as_deref()
                            .and_then(|s| serde_json::from_str::<Value>(s).ok())
                            .unwrap_or_else(|| {
                                tracing::warn!(%name, "assistant tool_call arguments not valid JSON");
                                json!({})
                            });
                        parts.push(json!({"functionCall": {"name": name, "args": args}}));
                    }
                }
                json!({"role": "model", "parts": parts})
            }
            "tool" => {
                let name = m.name.clone().unwrap_or_default();
                let response = m
                    .content
                    .as_deref()
                    .and_then(|s| serde_json::from_str::<Value>(s).ok())
                    .unwrap_or_else(|| json!({"raw_response": m.content.clone().unwrap_or_default()}));
                json!({
                    "role": "user",
                    "parts": [{"functionResponse": {"name": name, "response": response}}],
                })
            }
            _ => json!({
                "role": "user",
                "parts": [{"text": m.content.clone().unwrap_or_default()}],
            }),
        })
        .collect()
}

/// Only `type:function` entries are translated; unnamed entries are dropped.
fn translate_tool_declarations(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("function"))
        .filter_map(|t| t.get("function"))
        .filter(|f| f.get("name").and_then(|n| n.as_str()).is_some())
        .cloned()
        .collect()
}

/// Tool-choice -> `toolConfig` mapping, spec §8 testable property 6.
fn map_tool_choice(tool_choice: Option<&Value>, declared_names: &[String]) -> Value {
    let mode_config = match tool_choice {
        Some(Value::String(s)) if s == "none" => json!({"mode": "NONE"}),
        Some(Value::String(s)) if s == "auto" => json!({"mode": "AUTO"}),
        Some(Value::String(s)) if s == "required" => {
            if declared_names.is_empty() {
                json!({"mode": "AUTO"})
            } else {
                json!({"mode": "ANY"})
            }
        }
        Some(Value::Object(obj)) if obj.get("type").and_then(|v| v.as_str()) == Some("function") => {
            let name = obj
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(|n| n.as_str());
            match name {
                Some(n) if declared_names.iter().any(|d| d == n) => {
                    json!({"mode": "ANY", "allowedFunctionNames": [n]})
                }
                _ => {
                    tracing::warn!(?name, "tool_choice names an undeclared function; falling back to AUTO");
                    json!({"mode": "AUTO"})
                }
            }
        }
        _ => {
            tracing::warn!(?tool_choice, "invalid tool_choice shape; falling back to AUTO");
            json!({"mode": "AUTO"})
        }
    };
    json!({"functionCallingConfig": mode_config})
}
