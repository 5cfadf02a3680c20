//! Shell execution shared by `run_command` and command-template tools

use crate::tool::{ToolContext, ToolResult};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const MAX_OUTPUT_LENGTH: usize = 30_000;

/// Run a command line through `sh -c` in the context's working directory.
///
/// Non-zero exit, timeout and cancellation all come back as error results.
pub async fn run(command: &str, timeout: Duration, ctx: &ToolContext) -> ToolResult {
    if ctx.is_cancelled() {
        return ToolResult::error("Cancelled");
    }

    let child = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&ctx.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return ToolResult::error(format!("Failed to spawn command: {}", e)),
    };

    let output = tokio::select! {
        biased;

        _ = ctx.cancellation.cancelled() => {
            return ToolResult::error("Command was cancelled");
        }

        _ = tokio::time::sleep(timeout) => {
            return ToolResult::error(format!(
                "Command timed out after {}s",
                timeout.as_secs_f32()
            ));
        }

        result = child.wait_with_output() => {
            match result {
                Ok(output) => output,
                Err(e) => return ToolResult::error(format!("Failed to execute command: {}", e)),
            }
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let exit_code = output.status.code().unwrap_or(-1);

    let mut combined = stdout.to_string();
    if !stderr.is_empty() {
        if !combined.is_empty() {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }

    if combined.len() > MAX_OUTPUT_LENGTH {
        let mut cut = MAX_OUTPUT_LENGTH;
        while !combined.is_char_boundary(cut) {
            cut -= 1;
        }
        combined.truncate(cut);
        combined.push_str("\n\n(Output truncated due to length limit)");
    }

    if exit_code == 0 {
        ToolResult::success(combined)
    } else {
        ToolResult::error(format!("Command exited with code {}\n{}", exit_code, combined))
    }
}
