//! DuckDuckGo web search over the HTML endpoint.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{FlowError, Result};
use crate::tool::{Tool, ToolSpec, ValueType};

use super::{get_checked, http_client, http_failure};

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub href: String,
    pub body: String,
}

pub struct WebSearchTool {
    client: reqwest::Client,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(max_results: usize, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            max_results: max_results.max(1),
        })
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "web_search",
            "Performs a DuckDuckGo web search for your query, then returns the top results.",
        )
        .input("query", ValueType::String, "The search query to perform.")
        .optional_input(
            "max_results",
            ValueType::Integer,
            "How many results to return.",
        )
        .output(ValueType::String)
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::argument("web_search", "missing `query`"))?;
        let max_results = input
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.max_results);

        let url = format!("{SEARCH_URL}?q={}", urlencoding::encode(query));
        tracing::debug!(%query, "searching duckduckgo");
        let html = get_checked(&self.client, "web_search", &url)
            .await?
            .text()
            .await
            .map_err(|err| http_failure("web_search", err))?;

        let results = parse_search_results(&html, max_results);
        if results.is_empty() {
            return Err(FlowError::tool_failure(
                "web_search",
                "No results found! Try a less restrictive/shorter query.",
            ));
        }
        Ok(json!(format_results(&results)))
    }
}

fn format_results(results: &[SearchResult]) -> String {
    let entries: Vec<String> = results
        .iter()
        .map(|r| format!("[{}]({})\n{}", r.title, r.href, r.body))
        .collect();
    format!("## Search Results\n\n{}", entries.join("\n\n"))
}

fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
            .expect("static regex")
    })
}

fn snippet_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#).expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

/// Extract up to `max_results` results from a DuckDuckGo HTML page.
pub fn parse_search_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let links: Vec<_> = link_re().captures_iter(html).collect();
    let snippets: Vec<String> = snippet_re()
        .captures_iter(html)
        .map(|caps| clean_text(&caps[1]))
        .collect();

    links
        .iter()
        .enumerate()
        .filter_map(|(i, caps)| {
            let href = resolve_href(&caps[1]);
            let title = clean_text(&caps[2]);
            if !href.starts_with("http") || title.is_empty() {
                return None;
            }
            Some(SearchResult {
                title,
                href,
                body: snippets.get(i).cloned().unwrap_or_default(),
            })
        })
        .take(max_results)
        .collect()
}

/// Result links go through a `/l/?uddg=<target>` redirect.
fn resolve_href(raw: &str) -> String {
    let raw = html_decode(raw);
    let target = raw
        .split(['?', '&'])
        .find_map(|part| part.strip_prefix("uddg="))
        .and_then(|target| urlencoding::decode(target).ok())
        .map(|target| target.into_owned());
    target.unwrap_or(raw)
}

fn clean_text(fragment: &str) -> String {
    html_decode(tag_re().replace_all(fragment, "").trim())
}

fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<div class="result">
  <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fparty&amp;rut=abc">Luxury <b>Superhero</b> Party Ideas</a>
  <a class="result__snippet" href="//duckduckgo.com/l/?uddg=x">Decorations &amp; catering for <b>Gotham</b> nights.</a>
</div>
<div class="result">
  <a rel="nofollow" class="result__a" href="https://example.org/masquerade">Villain Masquerade</a>
  <a class="result__snippet" href="https://example.org/masquerade">Masks, music and mystery.</a>
</div>
"#;

    #[test]
    fn test_parse_results() {
        let results = parse_search_results(PAGE, 5);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Luxury Superhero Party Ideas");
        assert_eq!(results[0].href, "https://example.com/party");
        assert_eq!(results[0].body, "Decorations & catering for Gotham nights.");
        assert_eq!(results[1].href, "https://example.org/masquerade");
    }

    #[test]
    fn test_max_results() {
        assert_eq!(parse_search_results(PAGE, 1).len(), 1);
        assert!(parse_search_results("<html></html>", 5).is_empty());
    }

    #[test]
    fn test_format_results() {
        let text = format_results(&parse_search_results(PAGE, 1));
        assert!(text.starts_with("## Search Results"));
        assert!(text.contains("[Luxury Superhero Party Ideas](https://example.com/party)"));
    }
}
