//! Built-in tools.
//!
//! - Calculator: integer arithmetic and division
//! - DuckDuckGo: web search
//! - Webpage: fetch a page as plain text
//! - Party: menu, catering and theme lookups
//! - Image: fetch images and describe them with a vision model

pub mod calculator;
pub mod duckduckgo;
pub mod image;
pub mod party;
pub mod webpage;

use std::sync::Arc;
use std::time::Duration;

use crate::config::ToolsConfig;
use crate::error::{FlowError, Result};
use crate::llm::LanguageModel;
use crate::tool::ToolRegistry;

pub use calculator::calculator_toolkit;
pub use duckduckgo::{parse_search_results, SearchResult, WebSearchTool};
pub use image::{fetch_image, sniff_mime_type, DescribeImageTool};
pub use party::party_toolkit;
pub use webpage::{html_to_text, truncate_content, VisitWebpageTool};

pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

/// Calculator, web search, webpage and party tools in one registry.
pub fn standard_toolkit(config: &ToolsConfig) -> Result<ToolRegistry> {
    let mut registry = calculator_toolkit()?;
    registry.register(WebSearchTool::new(
        config.search_max_results,
        Duration::from_secs(config.http_timeout_secs),
    )?)?;
    registry.register(VisitWebpageTool::new(
        config.webpage_max_chars,
        Duration::from_secs(config.http_timeout_secs),
    )?)?;
    registry.merge(party_toolkit()?)?;
    Ok(registry)
}

/// [`standard_toolkit`] plus `describe_image`, backed by `vision_model`.
pub fn full_toolkit(
    config: &ToolsConfig,
    vision_model: Arc<dyn LanguageModel>,
) -> Result<ToolRegistry> {
    let mut registry = standard_toolkit(config)?;
    registry.register(DescribeImageTool::new(
        vision_model,
        Duration::from_secs(config.http_timeout_secs),
    )?)?;
    Ok(registry)
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(|err| FlowError::Configuration(format!("failed to build HTTP client: {err}")))
}

/// Classify an HTTP failure: throttling, server errors and dropped
/// connections are worth one more try.
pub(crate) fn http_failure(tool: &str, err: reqwest::Error) -> FlowError {
    let retryable_status = err
        .status()
        .map(|status| status.as_u16() == 429 || status.is_server_error())
        .unwrap_or(false);
    if err.is_timeout() || err.is_connect() || retryable_status {
        FlowError::transient_tool_failure(tool, err)
    } else {
        FlowError::tool_failure(tool, err)
    }
}

/// GET `url`, failing on non-success statuses.
pub(crate) async fn get_checked(
    client: &reqwest::Client,
    tool: &str,
    url: &str,
) -> Result<reqwest::Response> {
    client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| http_failure(tool, err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_toolkit_registers_everything() {
        let registry = standard_toolkit(&ToolsConfig::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "add",
                "catering_service",
                "divide",
                "multiply",
                "subtract",
                "suggest_menu",
                "superhero_party_theme",
                "visit_webpage",
                "web_search",
            ]
        );
    }
}
