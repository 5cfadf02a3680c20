//! Recent company news from the Yahoo Finance search endpoint

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_NEWS_URL: &str = "https://query1.finance.yahoo.com/v1/finance/search";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ARTICLES: usize = 4;
// The endpoint rejects requests without a browser-like agent
const USER_AGENT: &str = "Mozilla/5.0 (compatible; pierre)";

#[derive(Debug, Deserialize)]
struct Args {
    ticker: String,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    news: Vec<Article>,
}

#[derive(Debug, Default, Deserialize)]
struct Article {
    #[serde(default)]
    title: String,
    #[serde(default)]
    publisher: String,
    #[serde(default)]
    link: String,
}

fn format_news(ticker: &str, articles: &[Article]) -> String {
    if articles.is_empty() {
        return format!("No news articles found for {}.", ticker);
    }

    let mut out = format!("Latest news for {}:\n", ticker);
    for (i, article) in articles.iter().take(MAX_ARTICLES).enumerate() {
        let title = if article.title.is_empty() { "No title" } else { &article.title };
        out.push_str(&format!("\n{}. {}\n", i + 1, title));
        if !article.publisher.is_empty() {
            out.push_str(&format!("   publisher: {}\n", article.publisher));
        }
        if !article.link.is_empty() {
            out.push_str(&format!("   link: {}\n", article.link));
        }
    }
    out
}

pub struct FinanceNewsTool {
    client: Client,
    news_url: String,
}

impl FinanceNewsTool {
    pub fn new(news_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            news_url: news_url.into(),
        }
    }
}

impl Default for FinanceNewsTool {
    fn default() -> Self {
        Self::new(DEFAULT_NEWS_URL)
    }
}

#[async_trait]
impl Tool for FinanceNewsTool {
    fn name(&self) -> &str {
        "yahoo_finance_news"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "yahoo_finance_news".to_string(),
            description: "Fetches the last 4 news articles about a company from Yahoo Finance. \
                Use for queries like \"What's the latest news about Apple?\" or \"Get me news about TSLA\"."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "ticker": {
                        "type": "string",
                        "description": "The stock ticker symbol (e.g. AAPL, GOOGL, TSLA)"
                    }
                },
                "required": ["ticker"]
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
        let ticker = args.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return ToolResult::error("Ticker must not be empty");
        }

        let count = MAX_ARTICLES.to_string();
        let response = match self
            .client
            .get(&self.news_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .query(&[
                ("q", ticker.as_str()),
                ("quotesCount", "0"),
                ("newsCount", count.as_str()),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ToolResult::error(format!("Error fetching news for {}: {}", ticker, e))
            }
        };

        if !response.status().is_success() {
            return ToolResult::error(format!(
                "Error fetching news for {}: status {}",
                ticker,
                response.status().as_u16()
            ));
        }

        match response.json::<SearchResponse>().await {
            Ok(data) => ToolResult::success(format_news(&ticker, &data.news)),
            Err(e) => ToolResult::error(format!("Error fetching news for {}: {}", ticker, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> SearchResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn test_format_keeps_four_articles() {
        let data = parse(
            r#"{"count": 5, "quotes": [], "news": [
                {"title": "One", "publisher": "Reuters", "link": "https://a"},
                {"title": "Two", "publisher": "Bloomberg"},
                {"title": "Three"},
                {"publisher": "AP"},
                {"title": "Five"}
            ]}"#,
        );
        let out = format_news("AAPL", &data.news);
        assert!(out.starts_with("Latest news for AAPL:\n\n1. One\n   publisher: Reuters\n   link: https://a\n"));
        assert!(out.contains("4. No title\n   publisher: AP\n"));
        assert!(!out.contains("Five"));
    }

    #[test]
    fn test_no_news() {
        let data = parse(r#"{"quotes": []}"#);
        assert_eq!(format_news("ZZZZ", &data.news), "No news articles found for ZZZZ.");
    }

    #[tokio::test]
    async fn test_empty_ticker_rejected() {
        let result = FinanceNewsTool::default()
            .execute(json!({"ticker": "  "}), &crate::tool::testing::test_context())
            .await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_error_result() {
        let tool = FinanceNewsTool::new("http://127.0.0.1:9/");
        let result = tool
            .execute(json!({"ticker": "tsla"}), &crate::tool::testing::test_context())
            .await;
        assert!(result.is_error);
        assert!(result.output.starts_with("Error fetching news for TSLA"), "{}", result.output);
    }
}
