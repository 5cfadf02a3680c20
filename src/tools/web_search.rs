//! Web search tool using the DuckDuckGo Instant Answer API (no API key)

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_SEARCH_URL: &str = "https://api.duckduckgo.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RELATED_TOPICS: usize = 3;

#[derive(Debug, Deserialize)]
struct Args {
    query: String,
}

// Instant Answer response; every field may be empty
#[derive(Debug, Default, Deserialize)]
struct InstantAnswer {
    #[serde(rename = "Abstract", default)]
    abstract_text: String,
    #[serde(rename = "Definition", default)]
    definition: String,
    /// A string for most queries, an object for calculators and the like
    #[serde(rename = "Answer", default)]
    answer: serde_json::Value,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<serde_json::Value>,
}

/// Pick the most specific part of the response: abstract, definition,
/// answer, then related topics
fn format_answer(query: &str, data: &InstantAnswer) -> String {
    if !data.abstract_text.is_empty() {
        return format!("Search result for '{}':\n{}", query, data.abstract_text);
    }
    if !data.definition.is_empty() {
        return format!("Definition of '{}':\n{}", query, data.definition);
    }
    if let Some(answer) = data.answer.as_str().filter(|a| !a.is_empty()) {
        return format!("Answer for '{}': {}", query, answer);
    }

    let topics: Vec<&str> = data
        .related_topics
        .iter()
        .filter_map(|t| t.get("Text").and_then(|v| v.as_str()))
        .filter(|t| !t.is_empty())
        .take(MAX_RELATED_TOPICS)
        .collect();
    if !topics.is_empty() {
        return format!("Search results for '{}':\n{}", query, topics.join("\n\n"));
    }

    format!(
        "No detailed results found for '{}'. Try a more specific search term.",
        query
    )
}

pub struct WebSearchTool {
    client: Client,
    search_url: String,
}

impl WebSearchTool {
    pub fn new(search_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            search_url: search_url.into(),
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_URL)
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "search_web"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "search_web".to_string(),
            description: "Search the web using DuckDuckGo Instant Answer API.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn execute(&self, args_value: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let args: Args = match serde_json::from_value(args_value) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let response = match self
            .client
            .get(&self.search_url)
            .query(&[
                ("q", args.query.as_str()),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return ToolResult::error("Search timeout. Please try again."),
            Err(e) if e.is_connect() => {
                return ToolResult::error(
                    "Unable to connect to search service. Check your internet connection.",
                )
            }
            Err(e) => return ToolResult::error(format!("Search error: {}", e)),
        };

        if !response.status().is_success() {
            return ToolResult::error(format!(
                "Search service unavailable (status {})",
                response.status().as_u16()
            ));
        }

        // DuckDuckGo answers with a javascript content type, so parse by hand
        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Search error: {}", e)),
        };
        let data: InstantAnswer = match serde_json::from_str(&body) {
            Ok(d) => d,
            Err(e) => return ToolResult::error(format!("Failed to parse response: {}", e)),
        };

        ToolResult::success(format_answer(&args.query, &data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> InstantAnswer {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_abstract_preferred() {
        let data = parse(r#"{"Abstract": "Rust is a language.", "Definition": "ignored", "Answer": ""}"#);
        assert_eq!(
            format_answer("rust", &data),
            "Search result for 'rust':\nRust is a language."
        );
    }

    #[test]
    fn test_answer_object_ignored() {
        let data = parse(r#"{"Abstract": "", "Answer": {"from": "calculator"}, "RelatedTopics": []}"#);
        assert!(format_answer("2+2", &data).starts_with("No detailed results"));
    }

    #[test]
    fn test_related_topics_fallback() {
        let data = parse(
            r#"{"RelatedTopics": [
                {"Text": "First topic", "FirstURL": "https://a"},
                {"Name": "Group", "Topics": []},
                {"Text": "Second topic"},
                {"Text": "Third topic"},
                {"Text": "Fourth topic"}
            ]}"#,
        );
        let out = format_answer("paris", &data);
        assert!(out.starts_with("Search results for 'paris':\nFirst topic"));
        assert!(out.contains("Third topic"));
        assert!(!out.contains("Fourth topic"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_error_result() {
        let tool = WebSearchTool::new("http://127.0.0.1:9/");
        let result = tool
            .execute(json!({"query": "rust"}), &crate::tool::testing::test_context())
            .await;
        assert!(result.is_error);
    }
}
