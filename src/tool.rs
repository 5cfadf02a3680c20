//! Tool contract and the immutable tool snapshot handed to the agent
//!
//! Tools implement the `Tool` trait and are contributed by a `ToolSource`.
//! The live, mutable bookkeeping lives in `crate::registry::ToolRegistry`;
//! this module only defines what a tool is and the frozen `ToolSet` an
//! executable agent is bound to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Prefix marking a tool as private; such tools are never registered.
pub const PRIVATE_PREFIX: char = '_';

/// Tool definition for the LLM (matches OpenAI function format)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDefinition {
    /// Definition for a tool that takes no arguments
    pub fn no_args(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        }
    }
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            output: message.into(),
            is_error: true,
        }
    }
}

/// Context passed to tools during execution
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub cancellation: CancellationToken,
}

impl ToolContext {
    pub fn new(working_dir: PathBuf, cancellation: CancellationToken) -> Self {
        Self {
            working_dir,
            cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// A named, described, invocable capability exposed to the agent
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used for dispatch, unique within a registry)
    fn name(&self) -> &str;

    /// Get the tool definition for the LLM
    fn definition(&self) -> ToolDefinition;

    /// When true, a successful result ends the turn and is returned verbatim
    fn return_direct(&self) -> bool {
        false
    }

    /// Execute the tool with given arguments
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult;
}

pub fn is_private(name: &str) -> bool {
    name.starts_with(PRIVATE_PREFIX)
}

/// Truncate a string with ellipsis, respecting char boundaries
pub fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

/// Frozen, ordered list of tools an executable agent is bound to.
///
/// Cloning is cheap; the tool objects are shared. A `ToolSet` never changes
/// after construction, so an in-flight turn keeps seeing exactly the tools
/// it started with even if the registry is reloaded underneath it.
#[derive(Clone)]
pub struct ToolSet {
    tools: Arc<[Arc<dyn Tool>]>,
    generation: u64,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>, generation: u64) -> Self {
        Self {
            tools: tools.into(),
            generation,
        }
    }

    /// Registry generation this snapshot was taken at
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// List all tool names in snapshot order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Get all tool definitions (for LLM)
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Convert to OpenAI ChatCompletionTool format
    pub fn to_openai_tools(&self) -> Vec<async_openai::types::ChatCompletionTool> {
        self.tools
            .iter()
            .map(|t| {
                let def = t.definition();
                async_openai::types::ChatCompletionTool {
                    r#type: async_openai::types::ChatCompletionToolType::Function,
                    function: async_openai::types::FunctionObject {
                        name: def.name,
                        description: Some(def.description),
                        parameters: Some(def.parameters),
                        strict: None,
                    },
                }
            })
            .collect()
    }

    /// Execute a tool by name
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        match self.get(name) {
            Some(tool) => tool.execute(args, ctx).await,
            None => ToolResult::error(format!(
                "Unknown tool: {}. Available tools: {}",
                name,
                self.names().join(", ")
            )),
        }
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new(Vec::new(), 0)
    }
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fixed-output tool for tests
    pub struct EchoTool {
        pub name: String,
        pub output: String,
        pub return_direct: bool,
        pub calls: Arc<AtomicUsize>,
    }

    impl EchoTool {
        pub fn new(name: &str, output: &str) -> Self {
            Self {
                name: name.to_string(),
                output: output.to_string(),
                return_direct: false,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn direct(mut self) -> Self {
            self.return_direct = true;
            self
        }

        pub fn shared(self) -> Arc<dyn Tool> {
            Arc::new(self)
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn definition(&self) -> ToolDefinition {
            ToolDefinition::no_args(&self.name, format!("Echoes {}", self.output))
        }

        fn return_direct(&self) -> bool {
            self.return_direct
        }

        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ToolResult::success(self.output.clone())
        }
    }

    pub fn test_context() -> ToolContext {
        ToolContext::new(std::env::temp_dir(), CancellationToken::new())
    }
}
