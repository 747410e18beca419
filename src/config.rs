//! Process-wide configuration, read once at startup from the environment.
//!
//! No external config crate — direct `std::env::var` reads with parse-and-default,
//! the same style `braintrust::config::load_config` uses.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_timeout: Duration,
    pub read_timeout: Duration,
    pub max_connections: usize,
    pub default_openai_api_base_url: String,
    pub google_api_key: Option<String>,
    pub google_cse_id: Option<String>,
    pub search_result_count: usize,
    pub search_snippet_max_length: usize,
    pub max_sse_line_length: usize,
    pub thinking_process_separator: String,
    pub host: String,
    pub port: u16,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Config {
    pub fn from_env() -> Self {
        let search_result_count: usize = env_or("SEARCH_RESULT_COUNT", 5).min(10);

        Self {
            api_timeout: Duration::from_secs(env_or("API_TIMEOUT", 300)),
            read_timeout: Duration::from_secs(env_or("READ_TIMEOUT", 60)),
            max_connections: env_or("MAX_CONNECTIONS", 200),
            default_openai_api_base_url: env_string_or(
                "DEFAULT_OPENAI_API_BASE_URL",
                "https://api.openai.com",
            ),
            google_api_key: std::env::var("GOOGLE_API_KEY").ok().filter(|s| !s.is_empty()),
            google_cse_id: std::env::var("GOOGLE_CSE_ID").ok().filter(|s| !s.is_empty()),
            search_result_count,
            search_snippet_max_length: env_or("SEARCH_SNIPPET_MAX_LENGTH", 200),
            max_sse_line_length: env_or("MAX_SSE_LINE_LENGTH", 1024 * 1024),
            thinking_process_separator: env_string_or(
                "THINKING_PROCESS_SEPARATOR",
                "--- FINAL ANSWER ---",
            ),
            host: env_string_or("HOST", "0.0.0.0"),
            port: env_or("PORT", 8000),
        }
    }

    /// Build the single pooled upstream HTTP client per spec §4.4.
    ///
    /// `reqwest` negotiates HTTP/2 automatically via ALPN when the upstream supports it —
    /// no explicit opt-in needed. `pool_max_idle_per_host` is the closest available knob to
    /// the source's `httpx.Limits(max_connections=...)` connection cap.
    pub fn build_http_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(self.api_timeout)
            .read_timeout(self.read_timeout)
            .pool_max_idle_per_host(self.max_connections)
            .redirect(reqwest::redirect::Policy::limited(10))
            .no_proxy()
            .build()
    }
}
