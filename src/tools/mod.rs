//! Compiled-in tools and the catalog manifests bind them through
//!
//! A manifest entry `builtin: <key>` asks the catalog for a fresh instance,
//! so reloading a manifest always yields new tool objects.

mod exit;
mod finance_news;
mod read_file;
pub mod reload;
mod run_command;
pub mod shell;
mod system_info;
mod time;
mod web_search;

pub use exit::ExitTool;
pub use finance_news::{FinanceNewsTool, DEFAULT_NEWS_URL};
pub use read_file::ReadFileTool;
pub use reload::{ReloadLinks, ReloadToolsTool, RELOAD_SOURCE_ID};
pub use run_command::RunCommandTool;
pub use system_info::SystemInfoTool;
pub use time::GetTimeTool;
pub use web_search::{WebSearchTool, DEFAULT_SEARCH_URL};

use crate::tool::Tool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const KEYS: &[&str] = &[
    "get_time",
    "get_system_info",
    "read_file",
    "run_command",
    "search_web",
    "yahoo_finance_news",
    "exit_pierre",
];

/// Factory for compiled-in tools, keyed by tool name
#[derive(Clone)]
pub struct Builtins {
    shutdown: CancellationToken,
    search_url: String,
    news_url: String,
}

impl Builtins {
    pub fn new(shutdown: CancellationToken, search_url: impl Into<String>) -> Self {
        Self {
            shutdown,
            search_url: search_url.into(),
            news_url: DEFAULT_NEWS_URL.to_string(),
        }
    }

    pub fn with_news_url(mut self, news_url: impl Into<String>) -> Self {
        self.news_url = news_url.into();
        self
    }

    pub fn keys() -> &'static [&'static str] {
        KEYS
    }

    /// Build a new instance of the tool registered under `key`
    pub fn create(&self, key: &str) -> Option<Arc<dyn Tool>> {
        let tool: Arc<dyn Tool> = match key {
            "get_time" => Arc::new(GetTimeTool),
            "get_system_info" => Arc::new(SystemInfoTool),
            "read_file" => Arc::new(ReadFileTool),
            "run_command" => Arc::new(RunCommandTool),
            "search_web" => Arc::new(WebSearchTool::new(self.search_url.clone())),
            "yahoo_finance_news" => Arc::new(FinanceNewsTool::new(self.news_url.clone())),
            "exit_pierre" => Arc::new(ExitTool::new(self.shutdown.clone())),
            _ => return None,
        };
        Some(tool)
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new(CancellationToken::new(), DEFAULT_SEARCH_URL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_key_builds_a_tool_of_that_name() {
        let builtins = Builtins::default();
        for key in Builtins::keys() {
            let tool = builtins.create(key).unwrap();
            assert_eq!(tool.name(), *key);
            assert_eq!(tool.definition().name, *key);
        }
    }

    #[test]
    fn test_unknown_key() {
        assert!(Builtins::default().create("launch_rockets").is_none());
    }

    #[test]
    fn test_instances_are_fresh() {
        let builtins = Builtins::default();
        let a = builtins.create("get_time").unwrap();
        let b = builtins.create("get_time").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_exit_shares_shutdown_token() {
        let shutdown = CancellationToken::new();
        let builtins = Builtins::new(shutdown.clone(), DEFAULT_SEARCH_URL);
        assert!(builtins.create("exit_pierre").unwrap().return_direct());
        assert!(!shutdown.is_cancelled());
    }
}
