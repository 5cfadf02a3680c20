//! Interaction loop
//!
//! Reads user input from a `Frontend`, serves it on the agent session and
//! hands the reply back. The keyboard frontend uses rustyline; a speech
//! frontend would implement the same trait.

use crate::assistant::Assistant;
use crate::events::TurnResult;
use crate::telemetry::{ReloadTrigger, TelemetryStore};
use async_trait::async_trait;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// Where user input comes from and replies go to
#[async_trait(?Send)]
pub trait Frontend {
    /// Next user input, or `None` when the user is done
    async fn listen(&mut self) -> anyhow::Result<Option<String>>;

    async fn respond(&mut self, text: &str) -> anyhow::Result<()>;
}

/// Line-editing keyboard frontend with persistent history
pub struct KeyboardFrontend {
    editor: DefaultEditor,
    prompt: String,
    history_path: Option<PathBuf>,
}

impl KeyboardFrontend {
    pub fn new(prompt: impl Into<String>, history_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut editor = DefaultEditor::new()?;
        if let Some(path) = &history_path {
            let _ = editor.load_history(path);
        }
        Ok(Self {
            editor,
            prompt: prompt.into(),
            history_path,
        })
    }
}

#[async_trait(?Send)]
impl Frontend for KeyboardFrontend {
    async fn listen(&mut self) -> anyhow::Result<Option<String>> {
        let line = tokio::task::block_in_place(|| self.editor.readline(&self.prompt));
        match line {
            Ok(line) => {
                if !line.trim().is_empty() {
                    self.editor.add_history_entry(line.as_str())?;
                }
                Ok(Some(line))
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn respond(&mut self, text: &str) -> anyhow::Result<()> {
        println!("\n{}\n", text);
        Ok(())
    }
}

impl Drop for KeyboardFrontend {
    fn drop(&mut self) {
        if let Some(path) = &self.history_path {
            if let Err(e) = self.editor.save_history(path) {
                warn!(error = %e, path = %path.display(), "Failed to save history");
            }
        }
    }
}

const HELP: &str = "Commands:
  /tools          - List loaded tools
  /reload [name]  - Reload all tools, or one source or tool
  /stats          - Show tool usage and reload statistics
  /help           - Show this help
  /quit, /exit    - Exit";

enum Command {
    Reply(String),
    Quit,
}

pub struct InteractionLoop<'a> {
    assistant: &'a Assistant,
    telemetry: Option<Arc<TelemetryStore>>,
}

impl<'a> InteractionLoop<'a> {
    pub fn new(assistant: &'a Assistant, telemetry: Option<Arc<TelemetryStore>>) -> Self {
        Self {
            assistant,
            telemetry,
        }
    }

    /// Serve inputs until the frontend runs dry or shutdown is requested.
    ///
    /// Turn failures are logged and reported to the user; the loop goes on.
    pub async fn run<F: Frontend + ?Sized>(&self, frontend: &mut F) -> anyhow::Result<()> {
        let shutdown = self.assistant.shutdown().clone();

        while !shutdown.is_cancelled() {
            let Some(input) = frontend.listen().await? else {
                break;
            };
            let input = input.trim();
            if input.is_empty() {
                continue;
            }

            if input.starts_with('/') {
                match self.command(input) {
                    Command::Reply(text) => frontend.respond(&text).await?,
                    Command::Quit => break,
                }
                continue;
            }

            let reply = self.turn(input).await;
            frontend.respond(&reply).await?;
        }

        info!("Interaction loop finished");
        Ok(())
    }

    /// Serve one input and return the text for the user
    pub async fn turn(&self, input: &str) -> String {
        let start = Instant::now();
        match self.assistant.session().execute(input).await {
            Ok(result) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                self.record(input, &result, duration_ms);
                result.output
            }
            Err(e) => {
                error!(error = %e, "Critical error in interaction loop");
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_error(input, &e.to_string(), start.elapsed().as_millis() as u64);
                }
                format!("Sorry, I ran into a problem: {}", e)
            }
        }
    }

    fn record(&self, input: &str, result: &TurnResult, duration_ms: u64) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };
        telemetry.record_turn(input, result, duration_ms);

        let session = self.assistant.session();
        for call in result.tool_calls.iter().filter(|c| c.name == "reload_tools") {
            let identifier = call
                .arguments
                .get("identifier")
                .and_then(|v| v.as_str())
                .unwrap_or("all");
            if identifier.eq_ignore_ascii_case("list") {
                continue;
            }
            telemetry.record_reload(
                ReloadTrigger::Tool,
                identifier,
                session.tool_names().len(),
                session.generation(),
                call.is_error.then_some(call.output.as_str()),
            );
        }
    }

    fn command(&self, line: &str) -> Command {
        let mut parts = line.splitn(2, ' ');
        let cmd = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

        match cmd {
            "/quit" | "/exit" => Command::Quit,
            "/help" => Command::Reply(HELP.to_string()),
            "/tools" => Command::Reply(self.assistant.registry().read().summary()),
            "/reload" => Command::Reply(self.reload(arg)),
            "/stats" => Command::Reply(self.stats()),
            _ => Command::Reply(format!("Unknown command: {}\n\n{}", cmd, HELP)),
        }
    }

    fn reload(&self, identifier: Option<&str>) -> String {
        let session = self.assistant.session();
        let (status, error) = match identifier {
            None => {
                let names = self.assistant.reload_all();
                (format!("Reloaded {} tools: {}", names.len(), names.join(", ")), None)
            }
            Some(identifier) => {
                let outcome = self.assistant.registry().write().reload_one(identifier);
                session.rebuild_from_registry();
                match outcome {
                    Ok(outcome) => (
                        format!(
                            "Reloaded {}: {} ({} tools total)",
                            outcome.source_id,
                            outcome.tools.join(", "),
                            outcome.total
                        ),
                        None,
                    ),
                    Err(e) => {
                        let reason = e.to_string();
                        (format!("Failed to reload tools: {}", reason), Some(reason))
                    }
                }
            }
        };

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_reload(
                ReloadTrigger::Cli,
                identifier.unwrap_or("all"),
                session.tool_names().len(),
                session.generation(),
                error.as_deref(),
            );
        }
        status
    }

    fn stats(&self) -> String {
        let Some(telemetry) = &self.telemetry else {
            return "Telemetry is disabled.".to_string();
        };

        let mut out = String::new();
        match telemetry.tool_stats() {
            Ok(tools) if tools.is_empty() => out.push_str("No tool calls recorded."),
            Ok(tools) => {
                out.push_str("Tool Usage:");
                for t in tools {
                    out.push_str(&format!(
                        "\n  {:20} | {:5} calls | {:6.1}ms avg | {} errors",
                        t.tool_name, t.call_count, t.avg_duration_ms, t.error_count
                    ));
                }
            }
            Err(e) => out.push_str(&format!("Error: {}", e)),
        }
        match telemetry.reload_stats() {
            Ok(reloads) => out.push_str(&format!("\n{}", reloads)),
            Err(e) => out.push_str(&format!("\nError: {}", e)),
        }
        out
    }
}
