//! Tool manifest files
//!
//! A manifest is a YAML file in the tools directory that declares the tools
//! one source contributes. Entries either bind a compiled-in tool from the
//! builtin catalog or declare a command-template tool:
//!
//! ```yaml
//! tools:
//!   - builtin: get_time
//!   - name: get_time_city
//!     description: Returns the current time in a given timezone.
//!     parameters:
//!       type: object
//!       properties:
//!         timezone: { type: string }
//!       required: [timezone]
//!     command: 'TZ={{timezone}} date "+%I:%M %p"'
//! ```
//!
//! Template values are shell-quoted; use `{{{raw}}}` to splice a value
//! unquoted.

use crate::error::SourceError;
use crate::tool::{Tool, ToolContext, ToolDefinition, ToolResult};
use crate::tools::{shell, Builtins};
use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
const TEMPLATE_NAME: &str = "command";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolManifest {
    #[serde(default)]
    pub tools: Vec<ManifestEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    /// Catalog key of a compiled-in tool
    #[serde(default)]
    pub builtin: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema for the arguments
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub return_direct: bool,
    /// Handlebars command template, run through `sh -c`
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ToolManifest {
    /// Read and parse a manifest file
    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path).map_err(|e| SourceError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, SourceError> {
        // An empty file is a valid manifest exporting nothing
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| SourceError::Manifest {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

impl ManifestEntry {
    /// Instantiate the tool this entry describes
    pub fn build(&self, path: &Path, builtins: &Builtins) -> Result<Arc<dyn Tool>, SourceError> {
        let invalid = |reason: &str| SourceError::Manifest {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        match (&self.builtin, &self.command) {
            (Some(key), None) => {
                if self.name.is_some() || self.description.is_some() || self.parameters.is_some() {
                    return Err(invalid("builtin entries cannot override name, description or parameters"));
                }
                builtins.create(key).ok_or_else(|| SourceError::UnknownBuiltin {
                    key: key.clone(),
                    path: path.display().to_string(),
                })
            }
            (None, Some(command)) => {
                let name = self
                    .name
                    .as_deref()
                    .filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| invalid("command entries need a name"))?;
                let description = self
                    .description
                    .as_deref()
                    .ok_or_else(|| invalid(&format!("tool '{}' needs a description", name)))?;
                let parameters = self.parameters.clone().unwrap_or_else(|| {
                    json!({ "type": "object", "properties": {}, "required": [] })
                });
                let timeout = Duration::from_secs(
                    self.timeout_secs.unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
                );
                let tool = CommandTool::new(
                    ToolDefinition {
                        name: name.to_string(),
                        description: description.to_string(),
                        parameters,
                    },
                    command,
                    self.return_direct,
                    timeout,
                )
                .map_err(|e| invalid(&format!("bad command template for '{}': {}", name, e)))?;
                Ok(Arc::new(tool))
            }
            (Some(_), Some(_)) => Err(invalid("an entry cannot be both builtin and command")),
            (None, None) => Err(invalid("each entry needs either 'builtin' or 'command'")),
        }
    }
}

/// Single-quote a value for POSIX shells
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'\''"#))
}

/// A tool whose body is a shell command rendered from its arguments
pub struct CommandTool {
    definition: ToolDefinition,
    handlebars: Handlebars<'static>,
    return_direct: bool,
    timeout: Duration,
}

impl CommandTool {
    pub fn new(
        definition: ToolDefinition,
        template: &str,
        return_direct: bool,
        timeout: Duration,
    ) -> Result<Self, handlebars::TemplateError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(shell_quote);
        handlebars.register_template_string(TEMPLATE_NAME, template)?;
        Ok(Self {
            definition,
            handlebars,
            return_direct,
            timeout,
        })
    }

    fn render(&self, args: &Value) -> Result<String, String> {
        let data = match args {
            Value::Object(_) => args.clone(),
            Value::Null => json!({}),
            _ => return Err("Arguments must be a JSON object".to_string()),
        };
        self.handlebars
            .render(TEMPLATE_NAME, &data)
            .map_err(|e| format!("Invalid arguments for {}: {}", self.definition.name, e))
    }
}

#[async_trait]
impl Tool for CommandTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    fn return_direct(&self) -> bool {
        self.return_direct
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult {
        let command = match self.render(&args) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(e),
        };
        tracing::debug!(tool = %self.definition.name, command = %command, "Running command tool");
        shell::run(&command, self.timeout, ctx).await
    }
}
