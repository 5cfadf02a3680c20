//! Pierre - a voice-first assistant whose tools hot-reload
//!
//! This crate provides:
//! - A tool registry that loads tools from manifest files and reloads them
//!   without a restart
//! - An agent session that rebinds to the registry after every reload
//! - An OpenAI-compatible provider client (Ollama, OpenAI, OpenRouter)
//! - A keyboard interaction loop and SQLite telemetry

pub mod assistant;
pub mod config;
pub mod error;
pub mod events;
pub mod interaction;
pub mod manifest;
pub mod message;
pub mod provider;
pub mod registry;
pub mod session;
pub mod source;
pub mod telemetry;
pub mod templates;
pub mod tool;
pub mod tools;

pub use assistant::Assistant;
pub use config::Config;
pub use error::{ProviderError, RegistryError, SessionError, SourceError};
pub use events::{TurnCompleteReason, TurnResult};
pub use interaction::{Frontend, InteractionLoop, KeyboardFrontend};
pub use provider::{ProviderClient, ProviderConfig};
pub use registry::{ReloadOutcome, ReloadPolicy, SharedRegistry, ToolRegistry};
pub use session::{AgentLimits, AgentSession, ExecutableAgent, LanguageModel};
pub use source::{ManifestSource, SourceLoader, SourceState, StaticSource, ToolSource};
pub use telemetry::TelemetryStore;
pub use tool::{Tool, ToolContext, ToolDefinition, ToolResult, ToolSet};
