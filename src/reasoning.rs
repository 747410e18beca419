//! Diff-emit accumulation (spec §4.2/§9) and the guided-reasoning extraction state
//! machine (spec §4.5/§4.7).
//!
//! The accumulator models "(raw_accumulator, yielded_len)" as described in spec §9's
//! re-architecture note, except `yielded_len` is tracked against the *processed*
//! (sanitized) string rather than the raw one, since sanitization can shrink the raw
//! text (trimmed whitespace, stripped `<script>` spans).

use crate::model::{NormalizedEvent, Provider};
use crate::sanitize::sanitize;

/// Tracks one output channel's raw text and how much of its sanitized form has already
/// been emitted. Re-sanitizes the full raw accumulator on every step per spec §4.5's
/// diff-emit rule, since sanitization is not distributive over concatenation.
#[derive(Debug, Default)]
pub struct DiffChannel {
    raw: String,
    last_emitted: String,
}

impl DiffChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `delta` to the raw accumulator and return the newly-visible suffix, if any.
    pub fn accumulate(&mut self, delta: &str) -> Option<String> {
        self.raw.push_str(delta);
        self.diff()
    }

    /// Replace the raw accumulator wholesale (used when the caller already owns the full
    /// current text, e.g. a withheld-suffix prefix or a parsed JSON field value) and
    /// return the newly-visible suffix, if any.
    pub fn sync(&mut self, full_raw: &str) -> Option<String> {
        full_raw.clone_into(&mut self.raw);
        self.diff()
    }

    fn diff(&mut self) -> Option<String> {
        let processed = sanitize(&self.raw);
        if processed.len() <= self.last_emitted.len() {
            return None;
        }
        let suffix = if let Some(stripped) = processed.strip_prefix(self.last_emitted.as_str()) {
            stripped.to_string()
        } else {
            // Sanitization broke the monotonic-prefix assumption (shouldn't happen in
            // practice); fall back to emitting the full processed text rather than
            // silently dropping content.
            processed.clone()
        };
        self.last_emitted = processed;
        if suffix.is_empty() {
            None
        } else {
            Some(suffix)
        }
    }

    pub fn has_emitted(&self) -> bool {
        !self.last_emitted.is_empty()
    }
}

/// Which guided-reasoning technique (if any) governs this turn, decided once from
/// provider + model + `force_custom_reasoning_prompt` (spec §4.7 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidedMode {
    Normal,
    LegacySeparator,
    GoogleJsonSchema,
}

/// Gemini "pro"/"thinking" model family check backing the JSON-schema mode trigger.
pub fn is_gemini_thinking_variant(model: &str) -> bool {
    let lower = model.to_lowercase();
    lower.contains("pro") || lower.contains("thinking")
}

pub fn decide_mode(provider: Provider, model: &str, force: Option<bool>) -> GuidedMode {
    if force == Some(true) {
        return GuidedMode::LegacySeparator;
    }
    if provider == Provider::Google && is_gemini_thinking_variant(model) && force != Some(false) {
        return GuidedMode::GoogleJsonSchema;
    }
    GuidedMode::Normal
}

/// State machine S0(pre) -> S1(reasoning) -> S2(content) -> T(terminal), spec §4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Pre,
    Reasoning,
    Content,
    Terminal,
}

/// Drives one request's reasoning/content split across however many upstream deltas
/// arrive, regardless of provider or mode.
pub struct Extractor {
    mode: GuidedMode,
    state: TurnState,
    reasoning: DiffChannel,
    content: DiffChannel,

    // Legacy separator mode.
    separator: String,
    raw_stream: String,
    separator_found: bool,

    // Google JSON-schema mode.
    json_buffer: String,
    ever_parsed: bool,
}

impl Extractor {
    pub fn new(mode: GuidedMode, separator: impl Into<String>) -> Self {
        Self {
            mode,
            state: TurnState::Pre,
            reasoning: DiffChannel::new(),
            content: DiffChannel::new(),
            separator: separator.into(),
            raw_stream: String::new(),
            separator_found: false,
            json_buffer: String::new(),
            ever_parsed: false,
        }
    }

    fn reasoning_finish_if_needed(&mut self, events: &mut Vec<NormalizedEvent>, timestamp: &str) {
        if self.state == TurnState::Reasoning {
            events.push(NormalizedEvent::ReasoningFinish {
                timestamp: timestamp.to_string(),
            });
        }
        if self.state != TurnState::Terminal {
            self.state = TurnState::Content;
        }
    }

    /// Emit `reasoning_finish` if due, without marking the turn terminal. Called before
    /// any non-text signal (tool-call chunk, Google function-call request) that must not
    /// precede the reasoning/content boundary per spec §4.7.
    pub fn finalize_pre_signal(&mut self, timestamp: &str) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        self.reasoning_finish_if_needed(&mut events, timestamp);
        events
    }

    /// Feed a native `reasoning_content` delta (OpenAI normal-mode upstreams only).
    /// Dropped once content has started, matching spec §4.7's "any further
    /// reasoning_content deltas after entering S2 are logged and dropped".
    pub fn push_reasoning_native(&mut self, delta: &str, timestamp: &str) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        if self.state == TurnState::Content || self.state == TurnState::Terminal {
            tracing::warn!("reasoning_content delta after content started; dropping");
            return events;
        }
        if let Some(text) = self.reasoning.accumulate(delta) {
            if self.state == TurnState::Pre {
                self.state = TurnState::Reasoning;
            }
            events.push(NormalizedEvent::Reasoning {
                text,
                timestamp: timestamp.to_string(),
            });
        }
        events
    }

    /// Feed a plain content/text delta. Behavior depends on `self.mode`.
    pub fn push_content(&mut self, delta: &str, timestamp: &str) -> Vec<NormalizedEvent> {
        match self.mode {
            GuidedMode::Normal => self.push_content_normal(delta, timestamp),
            GuidedMode::LegacySeparator => self.push_content_legacy(delta, timestamp),
            GuidedMode::GoogleJsonSchema => {
                // Raw text deltas are not used in JSON-schema mode; see push_json_delta.
                let _ = (delta, timestamp);
                Vec::new()
            }
        }
    }

    fn push_content_normal(&mut self, delta: &str, timestamp: &str) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        self.reasoning_finish_if_needed(&mut events, timestamp);
        if let Some(text) = self.content.accumulate(delta) {
            events.push(NormalizedEvent::Content {
                text,
                timestamp: timestamp.to_string(),
            });
        }
        events
    }

    fn push_content_legacy(&mut self, delta: &str, timestamp: &str) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();

        if self.separator_found {
            // Elide any further separator occurrences once in the answer region.
            let cleaned = delta.replace(&self.separator, "");
            if let Some(text) = self.content.accumulate(&cleaned) {
                events.push(NormalizedEvent::Content {
                    text,
                    timestamp: timestamp.to_string(),
                });
            }
            return events;
        }

        self.raw_stream.push_str(delta);

        if let Some(pos) = self.raw_stream.find(&self.separator) {
            self.separator_found = true;
            let reasoning_part = self.raw_stream[..pos].to_string();
            let content_part = self.raw_stream[pos + self.separator.len()..].to_string();

            if let Some(text) = self.reasoning.sync(&reasoning_part) {
                if self.state == TurnState::Pre {
                    self.state = TurnState::Reasoning;
                }
                events.push(NormalizedEvent::Reasoning {
                    text,
                    timestamp: timestamp.to_string(),
                });
            }
            self.reasoning_finish_if_needed(&mut events, timestamp);

            let cleaned = content_part.replace(&self.separator, "");
            if let Some(text) = self.content.accumulate(&cleaned) {
                events.push(NormalizedEvent::Content {
                    text,
                    timestamp: timestamp.to_string(),
                });
            }
            self.raw_stream.clear();
        } else {
            // Withhold a trailing window the size of the separator minus one byte, in
            // case the sentinel is split across this delta and the next.
            let withhold = self.separator.len().saturating_sub(1);
            let safe_len = self.raw_stream.len().saturating_sub(withhold);
            let safe_prefix = safe_char_boundary_prefix(&self.raw_stream, safe_len);
            if let Some(text) = self.reasoning.sync(safe_prefix) {
                if self.state == TurnState::Pre {
                    self.state = TurnState::Reasoning;
                }
                events.push(NormalizedEvent::Reasoning {
                    text,
                    timestamp: timestamp.to_string(),
                });
            }
        }

        events
    }

    /// Feed a raw JSON text fragment (Google JSON-schema mode only).
    pub fn push_json_delta(&mut self, delta: &str, timestamp: &str) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        self.json_buffer.push_str(delta);

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&self.json_buffer) {
            self.ever_parsed = true;
            let reasoning_text = value
                .get("reasoning")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let answer_text = value.get("answer").and_then(|v| v.as_str());

            if let Some(text) = self.reasoning.sync(&reasoning_text) {
                if self.state == TurnState::Pre {
                    self.state = TurnState::Reasoning;
                }
                events.push(NormalizedEvent::Reasoning {
                    text,
                    timestamp: timestamp.to_string(),
                });
            }

            if let Some(answer) = answer_text {
                self.reasoning_finish_if_needed(&mut events, timestamp);
                if let Some(text) = self.content.sync(answer) {
                    events.push(NormalizedEvent::Content {
                        text,
                        timestamp: timestamp.to_string(),
                    });
                }
            }
        } else if let Some(partial) = extract_partial_string_field(&self.json_buffer, "reasoning")
        {
            if let Some(text) = self.reasoning.sync(&partial) {
                if self.state == TurnState::Pre {
                    self.state = TurnState::Reasoning;
                }
                events.push(NormalizedEvent::Reasoning {
                    text,
                    timestamp: timestamp.to_string(),
                });
            }
        }

        events
    }

    /// Called when the upstream reports a terminal `finishReason`/`finish_reason` in
    /// JSON-schema mode: flush a raw fallback if the buffer never became valid JSON.
    pub fn finalize_json_schema(&mut self, timestamp: &str) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        if self.mode == GuidedMode::GoogleJsonSchema
            && !self.ever_parsed
            && !self.json_buffer.trim().is_empty()
        {
            self.reasoning_finish_if_needed(&mut events, timestamp);
            if let Some(text) = self.content.accumulate(&self.json_buffer.clone()) {
                events.push(NormalizedEvent::Content {
                    text,
                    timestamp: timestamp.to_string(),
                });
            }
        }
        events
    }

    /// Emit any trailing `reasoning_finish` that is due but wasn't yet emitted (e.g. the
    /// upstream closed mid-reasoning with no content ever produced).
    pub fn finalize(&mut self, timestamp: &str) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        if self.state == TurnState::Reasoning {
            self.reasoning_finish_if_needed(&mut events, timestamp);
        }
        self.state = TurnState::Terminal;
        events
    }
}

fn safe_char_boundary_prefix(s: &str, mut byte_len: usize) -> &str {
    while byte_len > 0 && !s.is_char_boundary(byte_len) {
        byte_len -= 1;
    }
    &s[..byte_len]
}

/// Tolerant extraction of a JSON string field's value from a possibly-truncated buffer:
/// finds `"field"\s*:\s*"`, then decodes JSON string escapes up to either an unescaped
/// closing quote or the end of input (a dangling, not-yet-resolved escape is trimmed).
fn extract_partial_string_field(buffer: &str, field: &str) -> Option<String> {
    let key_pattern = format!("\"{field}\"");
    let key_pos = buffer.find(&key_pattern)?;
    let after_key = &buffer[key_pos + key_pattern.len()..];
    let colon_pos = after_key.find(':')?;
    let after_colon = after_key[colon_pos + 1..].trim_start();
    let after_quote = after_colon.strip_prefix('"')?;

    let mut result = String::new();
    let mut chars = after_quote.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => return Some(result),
            '\\' => match chars.next() {
                Some('n') => result.push('\n'),
                Some('t') => result.push('\t'),
                Some('r') => result.push('\r'),
                Some('"') => result.push('"'),
                Some('\\') => result.push('\\'),
                Some('/') => result.push('/'),
                Some(other) => result.push(other),
                None => break, // dangling escape at buffer end; stop before it
            },
            other => result.push(other),
        }
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_channel_emits_only_new_suffix() {
        let mut ch = DiffChannel::new();
        assert_eq!(ch.accumulate("hel").as_deref(), Some("hel"));
        assert_eq!(ch.accumulate("lo").as_deref(), Some("lo"));
        assert_eq!(ch.accumulate("").as_deref(), None);
    }

    #[test]
    fn diff_channel_sanitizes_across_boundary() {
        let mut ch = DiffChannel::new();
        // "<br" split across two deltas should still collapse into one newline, not leak
        // a literal "<br" fragment.
        assert_eq!(ch.accumulate("a<b").as_deref(), Some("a<b"));
        assert_eq!(ch.accumulate("r>b").as_deref(), Some("\nb"));
    }

    #[test]
    fn extractor_normal_mode_reasoning_then_content() {
        let mut ex = Extractor::new(GuidedMode::Normal, "--- FINAL ANSWER ---");
        let mut all = Vec::new();
        all.extend(ex.push_reasoning_native("think", "t1"));
        all.extend(ex.push_content("ans", "t2"));
        assert!(matches!(all[0], NormalizedEvent::Reasoning { .. }));
        assert!(matches!(all[1], NormalizedEvent::ReasoningFinish { .. }));
        assert!(matches!(all[2], NormalizedEvent::Content { .. }));
    }

    #[test]
    fn extractor_normal_mode_no_reasoning_no_boundary_event() {
        let mut ex = Extractor::new(GuidedMode::Normal, "--- FINAL ANSWER ---");
        let events = ex.push_content("hello", "t1");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], NormalizedEvent::Content { .. }));
    }

    #[test]
    fn extractor_legacy_separator_splits_reasoning_and_content() {
        let mut ex = Extractor::new(GuidedMode::LegacySeparator, "---SEP---");
        let mut all = Vec::new();
        all.extend(ex.push_content("thinking hard", "t1"));
        all.extend(ex.push_content("---SEP---final answer", "t2"));

        let texts: Vec<_> = all
            .iter()
            .map(|e| match e {
                NormalizedEvent::Reasoning { text, .. } => format!("R:{text}"),
                NormalizedEvent::ReasoningFinish { .. } => "RF".to_string(),
                NormalizedEvent::Content { text, .. } => format!("C:{text}"),
                _ => "?".to_string(),
            })
            .collect();

        assert_eq!(texts, vec!["R:thinking hard", "RF", "C:final answer"]);
    }

    #[test]
    fn extractor_legacy_separator_split_across_deltas() {
        let mut ex = Extractor::new(GuidedMode::LegacySeparator, "---SEP---");
        let mut all = Vec::new();
        all.extend(ex.push_content("reasoning text ---SE", "t1"));
        all.extend(ex.push_content("P--- answer text", "t2"));

        let combined_reasoning: String = all
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::Reasoning { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        let combined_content: String = all
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::Content { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(combined_reasoning, "reasoning text");
        assert_eq!(combined_content, "answer text");
    }

    #[test]
    fn extractor_legacy_separator_elides_repeats() {
        let mut ex = Extractor::new(GuidedMode::LegacySeparator, "---SEP---");
        ex.push_content("r---SEP---a---SEP---b", "t1");
        let events = ex.push_content("", "t2");
        let _ = events;
        // Answer region must not contain the separator text even if repeated.
        let mut ex2 = Extractor::new(GuidedMode::LegacySeparator, "---SEP---");
        let all = ex2.push_content("r---SEP---a---SEP---b", "t1");
        let content: String = all
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::Content { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(content, "ab");
    }

    #[test]
    fn decide_mode_precedence() {
        assert_eq!(
            decide_mode(Provider::Openai, "gpt-4o", Some(true)),
            GuidedMode::LegacySeparator
        );
        assert_eq!(
            decide_mode(Provider::Google, "gemini-2.5-pro", None),
            GuidedMode::GoogleJsonSchema
        );
        assert_eq!(
            decide_mode(Provider::Google, "gemini-2.5-pro", Some(false)),
            GuidedMode::Normal
        );
        assert_eq!(
            decide_mode(Provider::Google, "gemini-2.5-flash", None),
            GuidedMode::Normal
        );
        assert_eq!(
            decide_mode(Provider::Openai, "gpt-4o", None),
            GuidedMode::Normal
        );
    }

    #[test]
    fn json_schema_mode_spans_chunks_scenario_s3() {
        let mut ex = Extractor::new(GuidedMode::GoogleJsonSchema, "--- FINAL ANSWER ---");
        let mut all = Vec::new();
        all.extend(ex.push_json_delta(r#"{"reasoning":"becau"#, "t1"));
        all.extend(ex.push_json_delta(r#"se 2+2","answer":"4"}"#, "t2"));
        all.extend(ex.finalize_json_schema("t3"));

        let kinds: Vec<String> = all
            .iter()
            .map(|e| match e {
                NormalizedEvent::Reasoning { text, .. } => format!("reasoning:{text}"),
                NormalizedEvent::ReasoningFinish { .. } => "reasoning_finish".to_string(),
                NormalizedEvent::Content { text, .. } => format!("content:{text}"),
                _ => "?".to_string(),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "reasoning:because 2+2".to_string(),
                "reasoning_finish".to_string(),
                "content:4".to_string(),
            ]
        );
    }

    #[test]
    fn json_schema_mode_fallback_on_unparseable_buffer_at_finish() {
        let mut ex = Extractor::new(GuidedMode::GoogleJsonSchema, "--- FINAL ANSWER ---");
        ex.push_json_delta(r#"{"reasoning":"unterminated"#, "t1");
        let events = ex.finalize_json_schema("t2");
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], NormalizedEvent::Content { text, .. } if text.contains("unterminated")));
    }

    #[test]
    fn extract_partial_string_field_handles_dangling_escape() {
        let buf = r#"{"reasoning":"a\"#;
        let partial = extract_partial_string_field(buf, "reasoning").unwrap();
        assert_eq!(partial, "a");
    }
}
