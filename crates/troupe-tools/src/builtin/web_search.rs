// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::params::require_str;
use crate::{Tool, ToolError};

const RESULT_CAP: usize = 5;
const DEFAULT_RESULTS: usize = 3;

/// DuckDuckGo HTML search.  Returns title/snippet/url triples for real-time
/// information gathering by the product and researcher roles.
pub struct WebSearchTool {
    client: reqwest::Client,
    link_re: Regex,
    snippet_re: Regex,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            link_re: Regex::new(
                r#"(?s)<a[^>]*class="[^"]*result__a[^"]*"[^>]*href="(?P<href>[^"]+)"[^>]*>(?P<title>.*?)</a>"#,
            )
            .expect("static regex"),
            snippet_re: Regex::new(
                r#"(?s)<a[^>]*class="[^"]*result__snippet[^"]*"[^>]*>(?P<snippet>.*?)</a>"#,
            )
            .expect("static regex"),
        }
    }

    /// Extract up to `max_results` results from a DuckDuckGo HTML page.
    fn parse_results(&self, html: &str, max_results: usize) -> Vec<Value> {
        let mut results = Vec::new();
        for block in html.split(r#"<div class="result__body">"#).skip(1) {
            if results.len() >= max_results {
                break;
            }
            let Some(link) = self.link_re.captures(block) else {
                continue;
            };
            let title = clean_html(&link["title"]);
            let href = link["href"].to_string();
            let snippet = self
                .snippet_re
                .captures(block)
                .map(|c| clean_html(&c["snippet"]))
                .unwrap_or_default();
            results.push(json!({
                "title": if title.is_empty() { "(untitled)".to_string() } else { title },
                "snippet": snippet,
                "url": href,
            }));
        }
        results
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Query DuckDuckGo and return external results with title, snippet and link."
    }

    async fn run(&self, params: &Value) -> Result<Value, ToolError> {
        let query = require_str(params, "query")?;
        let max_results = params
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_RESULTS)
            .clamp(1, RESULT_CAP);

        let response = self
            .client
            .get("https://duckduckgo.com/html/")
            .query(&[("q", query.as_str())])
            .header(
                "User-Agent",
                "Mozilla/5.0 (compatible; TroupeAgent/1.0; +https://example.com)",
            )
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .send()
            .await
            .map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        if !response.status().is_success() {
            return Err(ToolError::failed(
                self.name(),
                format!("request failed with status {}", response.status()),
            ));
        }
        let html = response
            .text()
            .await
            .map_err(|e| ToolError::failed(self.name(), e.to_string()))?;
        let results = self.parse_results(&html, max_results);
        if results.is_empty() {
            return Err(ToolError::failed(self.name(), "no search results found"));
        }
        Ok(json!({"query": query, "results": results}))
    }
}

/// Strip tags and decode the handful of entities DuckDuckGo emits.
fn clean_html(raw: &str) -> String {
    let mut text = String::with_capacity(raw.len());
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
