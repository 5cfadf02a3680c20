//! The `reload_tools` control surface
//!
//! Registered as a static source so it survives a full reload. It reaches
//! the registry and the session through weak links bound by the
//! composition root after both exist; nothing here keeps them alive.

use crate::error::RegistryError;
use crate::registry::{ReloadOutcome, SharedRegistry, ToolRegistry};
use crate::session::AgentSession;
use crate::source::{SourceState, StaticSource};
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, OnceLock, Weak};
use tracing::info;

pub const RELOAD_SOURCE_ID: &str = "reload_tools";

#[derive(Debug, Deserialize)]
struct Args {
    #[serde(default = "default_identifier")]
    identifier: String,
}

fn default_identifier() -> String {
    "all".to_string()
}

/// Late-bound handles to the registry and session
#[derive(Clone, Default)]
pub struct ReloadLinks {
    registry: Arc<OnceLock<Weak<RwLock<ToolRegistry>>>>,
    session: Arc<OnceLock<Weak<AgentSession>>>,
}

impl ReloadLinks {
    pub fn bind_registry(&self, registry: &SharedRegistry) {
        let _ = self.registry.set(Arc::downgrade(registry));
    }

    pub fn bind_session(&self, session: &Arc<AgentSession>) {
        let _ = self.session.set(Arc::downgrade(session));
    }

    fn registry(&self) -> Option<SharedRegistry> {
        self.registry.get().and_then(Weak::upgrade)
    }

    fn session(&self) -> Option<Arc<AgentSession>> {
        self.session.get().and_then(Weak::upgrade)
    }

    /// Static source contributing the `reload_tools` tool
    pub fn source(&self) -> StaticSource {
        let links = self.clone();
        StaticSource::new(RELOAD_SOURCE_ID, move || {
            Ok(vec![Arc::new(ReloadToolsTool::new(links.clone())) as Arc<dyn Tool>])
        })
    }
}

pub struct ReloadToolsTool {
    links: ReloadLinks,
}

impl ReloadToolsTool {
    pub fn new(links: ReloadLinks) -> Self {
        Self { links }
    }

    /// Rebind the session to the registry's current state
    fn rebuild(&self, registry: &SharedRegistry) {
        if let Some(session) = self.links.session() {
            let snapshot = registry.read().snapshot();
            session.rebuild(snapshot);
        }
    }

    fn reload_all(&self, registry: &SharedRegistry) -> String {
        info!("Reloading all tools");
        let (names, failed) = {
            let mut registry = registry.write();
            let names = registry.reload_all();
            let failed: Vec<String> = registry
                .sources()
                .into_iter()
                .filter_map(|(id, state)| match state {
                    SourceState::Failed(reason) => Some(format!("{} ({})", id, reason)),
                    _ => None,
                })
                .collect();
            (names, failed)
        };
        self.rebuild(registry);

        let mut status = format!(
            "Successfully reloaded all tools! {} tools loaded: {}",
            names.len(),
            names.join(", ")
        );
        if !failed.is_empty() {
            status.push_str(&format!("\nFailed sources: {}", failed.join("; ")));
        }
        status
    }

    fn reload_one(&self, registry: &SharedRegistry, identifier: &str) -> Result<String, RegistryError> {
        info!(identifier, "Reloading tool source");
        let outcome = registry.write().reload_one(identifier);
        // Rebuild on failure too: under the retract policy the set changed
        self.rebuild(registry);
        Ok(describe(&outcome?))
    }
}

fn describe(outcome: &ReloadOutcome) -> String {
    let target = match &outcome.tool {
        Some(tool) => format!("tool '{}' (source {})", tool, outcome.source_id),
        None => format!("source '{}'", outcome.source_id),
    };
    format!(
        "Successfully reloaded {}\nReloaded {} tool(s): {}\nTotal tools loaded: {}",
        target,
        outcome.tools.len(),
        outcome.tools.join(", "),
        outcome.total
    )
}

#[async_trait]
impl Tool for ReloadToolsTool {
    fn name(&self) -> &str {
        "reload_tools"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "reload_tools".to_string(),
            description: r#"Reloads tool sources without restarting the application.

identifier can be:
- "all" to reload all tools
- "list" to list all current tools without reloading
- a source name (e.g. "time", "matrix") to reload that tools file
- a tool name (e.g. "get_time") to reload the source containing that tool

Example queries:
- "Reload all tools"
- "Reload get_time"
- "List all tools""#
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "identifier": {
                        "type": "string",
                        "description": "\"all\", \"list\", a source name or a tool name (default \"all\")"
                    }
                },
                "required": []
            }),
        }
    }

    async fn execute(&self, args: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
        let args: Args = match serde_json::from_value(args) {
            Ok(a) => a,
            Err(e) => return ToolResult::error(format!("Invalid arguments: {}", e)),
        };

        let Some(registry) = self.links.registry() else {
            return ToolResult::error("Failed to reload tools: tool registry is not available");
        };

        let identifier = args.identifier.trim();
        match identifier.to_lowercase().as_str() {
            "all" | "" => ToolResult::success(self.reload_all(&registry)),
            "list" => ToolResult::success(registry.read().summary()),
            _ => match self.reload_one(&registry, identifier) {
                Ok(status) => ToolResult::success(status),
                Err(e) => {
                    tracing::error!(identifier, error = %e, "Failed to reload tools");
                    ToolResult::error(format!("Failed to reload tools: {}", e))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ReloadPolicy;
    use crate::session::testing::{call, prompt, text, ScriptedModel};
    use crate::session::AgentLimits;
    use crate::source::SourceLoader;
    use crate::tool::testing::test_context;
    use crate::tools::Builtins;
    use std::path::Path;
    use tempfile::TempDir;

    const TIME: &str = "tools:\n  - builtin: get_time\n";
    const TIME_WITH_CITY: &str = r#"
tools:
  - builtin: get_time
  - name: get_time_city
    description: Returns the current time in a timezone.
    command: echo "city time"
"#;

    struct Fixture {
        _temp: TempDir,
        registry: SharedRegistry,
        links: ReloadLinks,
    }

    fn fixture(files: &[(&str, &str)]) -> Fixture {
        let temp = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(temp.path().join(name), content).unwrap();
        }
        let links = ReloadLinks::default();
        let mut loader = SourceLoader::new(temp.path(), Arc::new(Builtins::default()));
        loader.add_static(Arc::new(links.source()));
        let registry = ToolRegistry::new(loader, ReloadPolicy::default()).into_shared();
        links.bind_registry(&registry);
        registry.write().load_all(false);
        Fixture {
            _temp: temp,
            registry,
            links,
        }
    }

    fn dir(f: &Fixture) -> &Path {
        f._temp.path()
    }

    async fn reload(f: &Fixture, identifier: &str) -> ToolResult {
        ReloadToolsTool::new(f.links.clone())
            .execute(json!({ "identifier": identifier }), &test_context())
            .await
    }

    #[tokio::test]
    async fn test_reload_all_status() {
        let f = fixture(&[("time.yaml", TIME)]);
        let result = reload(&f, "ALL").await;
        assert_eq!(
            result,
            ToolResult::success("Successfully reloaded all tools! 2 tools loaded: reload_tools, get_time")
        );
    }

    #[tokio::test]
    async fn test_list_is_read_only() {
        let f = fixture(&[("time.yaml", TIME)]);
        let generation = f.registry.read().generation();

        let first = reload(&f, "list").await;
        let second = reload(&f, "List").await;

        assert_eq!(first, second);
        assert!(first.output.contains("  • get_time (from time): "));
        assert_eq!(f.registry.read().generation(), generation);
    }

    #[tokio::test]
    async fn test_reload_by_tool_name() {
        let f = fixture(&[("time.yaml", TIME_WITH_CITY)]);
        let result = reload(&f, "get_time_city").await;
        assert_eq!(
            result.output,
            "Successfully reloaded tool 'get_time_city' (source time)\n\
             Reloaded 2 tool(s): get_time, get_time_city\n\
             Total tools loaded: 3"
        );
    }

    #[tokio::test]
    async fn test_unknown_identifier_reported_as_text() {
        let f = fixture(&[("time.yaml", TIME)]);
        let result = reload(&f, "nonexistent").await;
        assert!(result.is_error);
        assert_eq!(
            result.output,
            "Failed to reload tools: unknown tool source 'nonexistent'"
        );
    }

    #[tokio::test]
    async fn test_broken_source_reported_as_text() {
        let f = fixture(&[("time.yaml", TIME)]);
        std::fs::write(dir(&f).join("time.yaml"), "tools: [").unwrap();
        let result = reload(&f, "time").await;
        assert!(result.is_error);
        assert!(result.output.starts_with("Failed to reload tools: invalid manifest"));
        assert!(f.registry.read().get("get_time").is_some());
    }

    #[tokio::test]
    async fn test_unbound_links() {
        let result = ReloadToolsTool::new(ReloadLinks::default())
            .execute(json!({}), &test_context())
            .await;
        assert!(result.is_error);
    }

    /// reload_tools("all") from inside a turn; the next turn sees the new set
    #[tokio::test]
    async fn test_snapshot_consistency_after_reload_all() {
        let f = fixture(&[("time.yaml", TIME)]);
        let model = ScriptedModel::new(|n, request, tools| match n {
            0 => {
                assert!(!tools.iter().any(|t| t == "get_time_city"));
                Ok(call("reload_tools", r#"{"identifier": "all"}"#))
            }
            1 => {
                assert!(request.contains("Successfully reloaded all tools!"));
                Ok(text("Reloaded."))
            }
            2 => {
                assert!(tools.iter().any(|t| t == "get_time_city"));
                Ok(call("get_time_city", "{}"))
            }
            _ => Ok(text("done")),
        });
        let snapshot = f.registry.read().snapshot();
        let session = Arc::new(
            AgentSession::new(model, prompt(), AgentLimits::default(), snapshot)
                .with_registry(f.registry.clone()),
        );
        f.links.bind_session(&session);

        std::fs::write(dir(&f).join("time.yaml"), TIME_WITH_CITY).unwrap();
        assert_eq!(session.execute("reload").await.unwrap().output, "Reloaded.");
        assert!(session.tool_names().contains(&"get_time_city".to_string()));

        let result = session.execute("time in tokyo").await.unwrap();
        assert_eq!(result.tool_calls[0].output.trim(), "city time");
        assert!(!result.tool_calls[0].is_error);
    }

    /// A manifest deleted before reload_tools("all") takes its tools with it
    #[tokio::test]
    async fn test_removed_tool_unavailable_after_reload_all() {
        const CITY: &str = r#"
tools:
  - name: get_time_city
    description: Returns the current time in a timezone.
    command: echo "city time"
"#;
        let f = fixture(&[("time.yaml", TIME), ("city.yaml", CITY)]);
        let model = ScriptedModel::new(|n, request, tools| match n {
            0 => {
                assert!(tools.iter().any(|t| t == "get_time_city"));
                Ok(call("reload_tools", r#"{"identifier": "all"}"#))
            }
            1 => {
                assert!(request.contains("2 tools loaded: reload_tools, get_time"));
                Ok(text("Reloaded."))
            }
            2 => {
                assert!(!tools.iter().any(|t| t == "get_time_city"));
                Ok(call("get_time_city", "{}"))
            }
            _ => Ok(text("That tool is gone.")),
        });
        let snapshot = f.registry.read().snapshot();
        let session = Arc::new(
            AgentSession::new(model, prompt(), AgentLimits::default(), snapshot)
                .with_registry(f.registry.clone()),
        );
        f.links.bind_session(&session);

        std::fs::remove_file(dir(&f).join("city.yaml")).unwrap();
        assert_eq!(session.execute("reload").await.unwrap().output, "Reloaded.");
        assert!(!session.tool_names().contains(&"get_time_city".to_string()));
        assert!(f.registry.read().get("get_time_city").is_none());

        let result = session.execute("time in tokyo").await.unwrap();
        assert_eq!(result.output, "That tool is gone.");
        assert!(result.tool_calls[0].is_error);
        assert!(
            result.tool_calls[0].output.starts_with("Unknown tool: get_time_city"),
            "{}",
            result.tool_calls[0].output
        );
    }
}
