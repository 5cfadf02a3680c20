//! Local time tool

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;

pub struct GetTimeTool;

#[async_trait]
impl Tool for GetTimeTool {
    fn name(&self) -> &str {
        "get_time"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::no_args("get_time", "Returns the local time")
    }

    async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let now = chrono::Local::now();
        ToolResult::success(format!(
            "The current time is {} in local timezone.",
            now.format("%I:%M %p")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::test_context;

    #[tokio::test]
    async fn test_get_time_format() {
        let result = GetTimeTool.execute(serde_json::json!({}), &test_context()).await;
        assert!(!result.is_error);
        assert!(result.output.starts_with("The current time is "));
        assert!(result.output.contains("AM") || result.output.contains("PM"));
    }
}
