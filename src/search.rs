//! Web-search collaborator (spec §4.3), grounded in the source's
//! `perform_web_search_google` function. No Google API client SDK exists in this crate's
//! dependency stack, so the Custom Search v1 REST endpoint is called directly with the
//! already-pooled `reqwest::Client` — the same "plain HTTP call to a REST API" pattern
//! `aiproxy-common`'s upstream calls use, just pointed at a different host.

use serde_json::Value;

use crate::config::Config;
use crate::model::SearchResult;

const CUSTOM_SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";

/// Runs the search, truncating snippets to `cfg.search_snippet_max_length`. Never fails
/// the enclosing request: any error is logged and an empty list returned.
pub async fn web_search(client: &reqwest::Client, cfg: &Config, query: &str) -> Vec<SearchResult> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let (Some(api_key), Some(cse_id)) = (&cfg.google_api_key, &cfg.google_cse_id) else {
        return Vec::new();
    };

    let response = client
        .get(CUSTOM_SEARCH_URL)
        .query(&[
            ("key", api_key.as_str()),
            ("cx", cse_id.as_str()),
            ("q", query),
            ("num", &cfg.search_result_count.to_string()),
        ])
        .send()
        .await;

    let response = match response {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!(%err, "web search request failed");
            return Vec::new();
        }
    };

    if !response.status().is_success() {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        let message = body
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .unwrap_or("unknown search error");
        tracing::warn!(%status, %message, "web search upstream error");
        return Vec::new();
    }

    let body: Value = match response.json().await {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(%err, "web search response was not valid JSON");
            return Vec::new();
        }
    };

    let items = body.get("items").and_then(|v| v.as_array());
    let Some(items) = items else {
        return Vec::new();
    };

    items
        .iter()
        .take(cfg.search_result_count)
        .enumerate()
        .map(|(i, item)| {
            let title = item.get("title").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let href = item.get("link").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let snippet = item.get("snippet").and_then(|v| v.as_str()).unwrap_or("");
            SearchResult {
                index: i + 1,
                title,
                href,
                snippet: truncate_snippet(snippet, cfg.search_snippet_max_length),
            }
        })
        .collect()
}

fn truncate_snippet(snippet: &str, max_len: usize) -> String {
    if snippet.chars().count() <= max_len {
        return snippet.to_string();
    }
    let truncated: String = snippet.chars().take(max_len).collect();
    format!("{truncated}...")
}

/// Builds the synthetic system message carrying search context (spec §4.7 step 5 and
/// `original_source`'s exact template).
pub fn build_search_context_message(query: &str, results: &[SearchResult]) -> String {
    let mut out = format!(
        "You are an AI assistant. Please use the following web search results to inform your answer to the user's query: '{query}'. Search Results:\n\n"
    );
    let blocks: Vec<String> = results
        .iter()
        .map(|r| {
            format!(
                "{}. Title: {}\n   Snippet: {}\n   Source URL (for your reference, do not output directly): {}",
                r.index, r.title, r.snippet, r.href
            )
        })
        .collect();
    out.push_str(&blocks.join("\n\n"));
    out
}
