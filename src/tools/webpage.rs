//! Fetch a webpage and hand its readable text to the model.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use crate::error::{FlowError, Result};
use crate::tool::{Tool, ToolSpec, ValueType};

use super::{get_checked, http_client, http_failure};

pub struct VisitWebpageTool {
    client: reqwest::Client,
    max_chars: usize,
}

impl VisitWebpageTool {
    pub fn new(max_chars: usize, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            max_chars,
        })
    }
}

#[async_trait]
impl Tool for VisitWebpageTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "visit_webpage",
            "Visits a webpage at the given url and reads its content as text.",
        )
        .input("url", ValueType::String, "The url of the webpage to visit.")
        .output(ValueType::String)
    }

    async fn call(&self, input: Value) -> Result<Value> {
        let url = input
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| FlowError::argument("visit_webpage", "missing `url`"))?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FlowError::argument(
                "visit_webpage",
                format!("`{url}` is not an http(s) url"),
            ));
        }

        tracing::debug!(%url, "visiting webpage");
        let body = get_checked(&self.client, "visit_webpage", url)
            .await?
            .text()
            .await
            .map_err(|err| http_failure("visit_webpage", err))?;

        Ok(json!(truncate_content(&html_to_text(&body), self.max_chars)))
    }
}

fn strip_blocks_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript|head)[^>]*>.*?</(script|style|noscript|head)>")
            .expect("static regex")
    })
}

fn break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<(br|/p|/div|/h[1-6]|/li|/tr|/section|/article)[^>]*>")
            .expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

/// Reduce an HTML document to its visible text, one block per line.
pub fn html_to_text(html: &str) -> String {
    let text = strip_blocks_re().replace_all(html, "");
    let text = break_re().replace_all(&text, "\n");
    let text = tag_re().replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    blank_lines_re()
        .replace_all(lines.join("\n").trim(), "\n\n")
        .into_owned()
}

/// Keep the head and tail of `content` when it exceeds `max_chars`.
pub fn truncate_content(content: &str, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }
    let half = max_chars / 2;
    let head: String = content.chars().take(half).collect();
    let tail: String = content.chars().skip(total - half).collect();
    format!(
        "{head}\n..._This content has been truncated to stay below {max_chars} characters_...\n{tail}"
    )
}
