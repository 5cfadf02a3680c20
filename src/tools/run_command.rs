//! Run command tool - executes a command line and captures its output

use super::shell;
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Deserialize)]
struct Args {
    #[serde(alias = "command")]
    commands: String,
    #[serde(default)]
    timeout: Option<u64>,
}

pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "run_command".to_string(),
            description: r#"Runs shell commands and returns their combined output.

commands can be a single command ("ls -la") or several commands on separate lines, which run one after the other.

Example queries:
- "Run ls -la"
- "Run npm install"
- "Execute: cd /tmp, then ls, then pwd"

Never run commands that could harm the system or delete user data without explicit confirmation."#
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "commands": {
                        "type": "string",
                        "description": "The command(s) to run"
                    },
                    "timeout": {
                        "type": "integer",
                        "description": "Timeout in seconds (default 60, max 600)"
                    }
                },
                "required": ["commands"]
            }),
        }
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let commands = args.commands.trim();
        if commands.is_empty() {
            return ToolResult::error("Error: No command provided.");
        }

        let timeout = Duration::from_secs(
            args.timeout
                .unwrap_or(DEFAULT_TIMEOUT_SECS)
                .clamp(1, MAX_TIMEOUT_SECS),
        );
        tracing::info!(commands, timeout_secs = timeout.as_secs(), "Running command");

        let result = shell::run(commands, timeout, ctx).await;
        if !result.is_error && result.output.trim().is_empty() {
            return ToolResult::success("Command completed with no output.");
        }
        result
    }
}
