//! Gemini `streamGenerateContent` SSE delta parsing (spec §4.5 "Google parser").
//!
//! Grounded in `aiproxy_common::sse::gemini::parse_gemini_sse`, trimmed down to what
//! this proxy needs: candidate text is incremental (each chunk's text is new, not
//! cumulative), function calls arrive complete in one part, and a `finishReason`
//! terminates the turn. The thoughtSignature / multi-block bookkeeping the teacher
//! carries for its tool-use protocol has no counterpart here and is dropped.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum GoogleDelta {
    Text(String),
    FunctionCall { name: String, args: Value },
    Finish(String),
    Error(String),
}

/// Parse one `data: <payload>` line's payload. A single chunk can carry several parts,
/// hence the `Vec` return — mirrors `parse_gemini_sse`'s signature.
pub fn parse_google_line(payload: &str) -> Vec<GoogleDelta> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Vec::new();
    }

    let data: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => {
            tracing::warn!(%payload, "unparseable Google SSE payload");
            return Vec::new();
        }
    };

    let mut deltas = Vec::new();

    if let Some(error) = data.get("error") {
        let msg = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown Google error")
            .to_string();
        deltas.push(GoogleDelta::Error(msg));
        return deltas;
    }

    let candidates = match data.get("candidates").and_then(|c| c.as_array()) {
        Some(c) => c,
        None => return deltas,
    };

    for candidate in candidates {
        if let Some(parts) = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array())
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                    if !text.is_empty() {
                        deltas.push(GoogleDelta::Text(text.to_string()));
                    }
                }
                if let Some(fc) = part.get("functionCall") {
                    let name = fc.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string();
                    if !name.is_empty() {
                        let args = fc.get("args").cloned().unwrap_or_else(|| serde_json::json!({}));
                        deltas.push(GoogleDelta::FunctionCall { name, args });
                    }
                }
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(|f| f.as_str()) {
            if matches!(reason, "SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST") {
                tracing::warn!(%reason, "Gemini content blocked");
            }
            deltas.push(GoogleDelta::Finish(reason.to_string()));
        }
    }

    deltas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_part() {
        let line = r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#;
        assert_eq!(parse_google_line(line), vec![GoogleDelta::Text("hi".into())]);
    }

    #[test]
    fn parses_multiple_parts_in_one_chunk() {
        let line = r#"{"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(
            parse_google_line(line),
            vec![
                GoogleDelta::Text("a".into()),
                GoogleDelta::Text("b".into()),
                GoogleDelta::Finish("STOP".into()),
            ]
        );
    }

    #[test]
    fn parses_function_call_part() {
        let line = r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_weather","args":{"city":"nyc"}}}]}}]}"#;
        match &parse_google_line(line)[0] {
            GoogleDelta::FunctionCall { name, args } => {
                assert_eq!(name, "get_weather");
                assert_eq!(args["city"], "nyc");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn parses_finish_reason_alone() {
        let line = r#"{"candidates":[{"finishReason":"MAX_TOKENS"}]}"#;
        assert_eq!(
            parse_google_line(line),
            vec![GoogleDelta::Finish("MAX_TOKENS".into())]
        );
    }

    #[test]
    fn parses_error_payload() {
        let line = r#"{"error":{"message":"quota exceeded"}}"#;
        assert_eq!(
            parse_google_line(line),
            vec![GoogleDelta::Error("quota exceeded".into())]
        );
    }

    #[test]
    fn ignores_empty_candidate() {
        let line = r#"{"candidates":[{}]}"#;
        assert!(parse_google_line(line).is_empty());
    }

    #[test]
    fn parses_every_candidate_not_just_the_first() {
        let line = r#"{"candidates":[
            {"content":{"parts":[{"text":"a"}]}},
            {"content":{"parts":[{"text":"b"}]},"finishReason":"STOP"}
        ]}"#;
        assert_eq!(
            parse_google_line(line),
            vec![
                GoogleDelta::Text("a".into()),
                GoogleDelta::Text("b".into()),
                GoogleDelta::Finish("STOP".into()),
            ]
        );
    }
}
