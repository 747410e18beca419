//! Output sanitization applied to every `reasoning`/`content` delta before emission
//! (spec §4.6). Implemented with `regex`, already part of the teacher's dependency stack.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"<script\b[^>]*>.*?</script>")
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .expect("static regex is valid")
    })
}

fn style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"<style\b[^>]*>.*?</style>")
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .expect("static regex is valid")
    })
}

fn br_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"<br\s*/?>")
            .case_insensitive(true)
            .build()
            .expect("static regex is valid")
    })
}

fn close_p_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        RegexBuilder::new(r"</p>")
            .case_insensitive(true)
            .build()
            .expect("static regex is valid")
    })
}

fn excess_newlines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex is valid"))
}

/// Normalize a cumulative text buffer the way the proxy's output channel does:
/// strip `<script>`/`<style>` spans, turn `<br>`/`</p>` into newlines, collapse long
/// runs of blank lines, trim each line, and trim the whole string's edges.
pub fn sanitize(input: &str) -> String {
    let no_script = script_re().replace_all(input, "");
    let no_style = style_re().replace_all(&no_script, "");
    let with_breaks = br_re().replace_all(&no_style, "\n");
    let with_paragraphs = close_p_re().replace_all(&with_breaks, "\n");
    let collapsed = excess_newlines_re().replace_all(&with_paragraphs, "\n\n");

    let trimmed_lines: String = collapsed
        .lines()
        .map(|line| line.trim())
        .collect::<Vec<_>>()
        .join("\n");

    trimmed_lines.trim_matches('\n').to_string()
}
