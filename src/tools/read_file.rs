//! Read file tool - returns a text file's contents

use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};

const DEFAULT_LINE_LIMIT: usize = 2000;
const MAX_LINE_LENGTH: usize = 2000;
const BINARY_CHECK_SIZE: usize = 8192;

#[derive(Debug, Deserialize)]
struct Args {
    #[serde(alias = "path", alias = "filePath")]
    filename: String,
    /// Line offset (1-indexed)
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct ReadFileTool;

/// Resolve `~` and relative paths against the home and working directories
fn resolve_path(path: &str, working_dir: &Path) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    let requested = PathBuf::from(path);
    if requested.is_absolute() {
        requested
    } else {
        working_dir.join(requested)
    }
}

fn is_binary_file(path: &Path) -> std::io::Result<bool> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut buffer = vec![0u8; BINARY_CHECK_SIZE];
    let bytes_read = file.read(&mut buffer)?;
    Ok(buffer[..bytes_read].contains(&0))
}

fn truncate_line(line: &str) -> &str {
    if line.len() <= MAX_LINE_LENGTH {
        return line;
    }
    let mut cut = MAX_LINE_LENGTH;
    while !line.is_char_boundary(cut) {
        cut -= 1;
    }
    &line[..cut]
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "read_file".to_string(),
            description: r#"Reads and returns the contents of a specified file.

Usage:
- filename may be absolute, start with ~/, or be relative to the working directory
- By default up to 2000 lines are returned; use offset and limit for long files
- If the file is not found, use run_command (for example `pwd` or `find . -name <file>`) to locate it, then retry with the corrected path

Example queries:
- "Read the contents of /path/to/file.txt"
- "Show me what's inside ~/notes.md""#
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "filename": {
                        "type": "string",
                        "description": "The path to the file to read"
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Line number to start reading from (1-indexed, optional)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of lines to read (optional, default 2000)"
                    }
                },
                "required": ["filename"]
            }),
        }
    }

    async fn execute(&self, args: serde_json::Value, ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        if ctx.is_cancelled() {
            return ToolResult::error("Cancelled");
        }

        let path = resolve_path(&args.filename, &ctx.working_dir);

        if path.is_dir() {
            return ToolResult::error(format!("Error reading file: {} is a directory", args.filename));
        }

        if let Ok(true) = is_binary_file(&path) {
            return ToolResult::error(format!("Binary file cannot be read as text: {}", args.filename));
        }

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Error reading file {}: {}", args.filename, e)),
        };

        if content.is_empty() {
            return ToolResult::success("Warning: File exists but has empty contents");
        }

        let offset = args.offset.unwrap_or(1).saturating_sub(1);
        let limit = args.limit.unwrap_or(DEFAULT_LINE_LIMIT);
        let total_lines = content.lines().count();

        let mut output = content
            .lines()
            .skip(offset)
            .take(limit)
            .map(truncate_line)
            .collect::<Vec<_>>()
            .join("\n");

        let shown_end = (offset + limit).min(total_lines);
        if shown_end < total_lines {
            output.push_str(&format!(
                "\n\n(Showing lines {}-{} of {}. Use offset to read more.)",
                offset + 1,
                shown_end,
                total_lines
            ));
        }

        ToolResult::success(output)
    }
}
