//! Shutdown tool

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Asks the interaction loop to stop once the current turn is answered
pub struct ExitTool {
    shutdown: CancellationToken,
}

impl ExitTool {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }
}

#[async_trait]
impl Tool for ExitTool {
    fn name(&self) -> &str {
        "exit_pierre"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::no_args(
            "exit_pierre",
            r#"Exits the AI application.

Example queries:
- "Exit Pierre"
- "Shut down the AI"
- "Terminate the program""#,
        )
    }

    fn return_direct(&self) -> bool {
        true
    }

    async fn execute(&self, _args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        tracing::info!("Exiting Pierre");
        self.shutdown.cancel();
        ToolResult::success("Goodbye!")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::test_context;

    #[tokio::test]
    async fn test_exit_trips_shutdown() {
        let shutdown = CancellationToken::new();
        let tool = ExitTool::new(shutdown.clone());
        let result = tool.execute(serde_json::json!({}), &test_context()).await;

        assert_eq!(result, ToolResult::success("Goodbye!"));
        assert!(shutdown.is_cancelled());
        assert!(tool.return_direct());
    }
}
