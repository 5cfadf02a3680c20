//! Tool registry - the hot-reload engine
//!
//! Owns the live tool table plus the bookkeeping that ties every tool to the
//! source that contributed it. Sources can be loaded, reloaded one at a time
//! (by source id or by the name of any tool they export) or all at once.
//!
//! Invariants kept across every operation:
//! - a tool name maps to exactly one source (last load wins on collisions)
//! - reloading a source retracts its previous set before installing the new one
//! - reloading a source never touches tools owned by other sources
//!
//! The agent never reads the registry directly; it is bound to a frozen
//! `ToolSet` taken with [`ToolRegistry::snapshot`].

use crate::error::RegistryError;
use crate::source::{SourceLoader, SourceState};
use crate::tool::{is_private, truncate, Tool, ToolSet};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SUMMARY_DESCRIPTION_LEN: usize = 60;

/// Registry handle shared between the composition root, the reload tool and
/// the directory watcher. One writer at a time, readers in parallel.
pub type SharedRegistry = Arc<RwLock<ToolRegistry>>;

/// What happens to a source's tools when reloading it fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReloadPolicy {
    /// Keep the previous set live until a new load succeeds
    #[default]
    KeepPrevious,
    /// Retract the source's tools before loading; a failed load leaves none
    Retract,
}

/// Result of reloading a single source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadOutcome {
    pub source_id: String,
    /// Tool name the reload was requested by, if any
    pub tool: Option<String>,
    /// Tools the source exports after the reload
    pub tools: Vec<String>,
    /// Every tool in the registry after the reload, in registry order
    pub names: Vec<String>,
    /// Total number of tools in the registry
    pub total: usize,
}

pub struct ToolRegistry {
    loader: SourceLoader,
    policy: ReloadPolicy,
    tools: IndexMap<String, Arc<dyn Tool>>,
    tool_to_source: HashMap<String, String>,
    source_to_tools: IndexMap<String, Vec<String>>,
    source_states: IndexMap<String, SourceState>,
    generation: u64,
}

impl ToolRegistry {
    pub fn new(loader: SourceLoader, policy: ReloadPolicy) -> Self {
        Self {
            loader,
            policy,
            tools: IndexMap::new(),
            tool_to_source: HashMap::new(),
            source_to_tools: IndexMap::new(),
            source_states: IndexMap::new(),
            generation: 0,
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }

    pub fn policy(&self) -> ReloadPolicy {
        self.policy
    }

    pub fn loader(&self) -> &SourceLoader {
        &self.loader
    }

    /// Candidate source ids in the tools directory
    pub fn discover(&self) -> Vec<String> {
        self.loader.discover()
    }

    /// Load (or reload) one source and install its tools.
    ///
    /// On success the source's previous set is retracted and the fresh set
    /// installed. On failure the source is marked failed and, under
    /// `KeepPrevious`, its previous set stays registered.
    pub fn load_source(&mut self, source_id: &str, is_reload: bool) -> Result<Vec<String>, RegistryError> {
        let source = self
            .loader
            .resolve(source_id)
            .ok_or_else(|| RegistryError::UnknownSource(source_id.to_string()))?;

        self.generation += 1;

        if is_reload && self.policy == ReloadPolicy::Retract {
            self.retract(source_id);
        }

        match source.load() {
            Ok(tools) => {
                self.retract(source_id);
                let names = self.extract_tools(tools, source_id);
                self.source_states
                    .insert(source_id.to_string(), SourceState::Loaded);
                info!(
                    source = source_id,
                    reload = is_reload,
                    count = names.len(),
                    tools = ?names,
                    "Loaded tool source"
                );
                Ok(names)
            }
            Err(e) => {
                error!(source = source_id, reload = is_reload, error = %e, "Failed to load tool source");
                self.source_states
                    .insert(source_id.to_string(), SourceState::Failed(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Install a freshly loaded set of tools under `source_id`.
    ///
    /// Private names are skipped. A name already owned by another source is
    /// taken over by this one.
    pub fn extract_tools(&mut self, tools: Vec<Arc<dyn Tool>>, source_id: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(tools.len());
        let mut seen = HashSet::new();

        for tool in tools {
            let name = tool.name().to_string();
            if is_private(&name) {
                debug!(source = source_id, tool = %name, "Skipping private tool");
                continue;
            }
            if !seen.insert(name.clone()) {
                warn!(source = source_id, tool = %name, "Tool exported twice, keeping the first");
                continue;
            }

            if let Some(previous) = self.tool_to_source.get(&name).cloned() {
                if previous != source_id {
                    warn!(tool = %name, from = %previous, to = source_id, "Tool name collision, last load wins");
                    if let Some(owned) = self.source_to_tools.get_mut(&previous) {
                        owned.retain(|n| n != &name);
                    }
                }
            }

            // Remove first so the fresh instance lands at the end
            self.tools.shift_remove(&name);
            self.tools.insert(name.clone(), tool);
            self.tool_to_source.insert(name.clone(), source_id.to_string());
            names.push(name);
        }

        self.source_to_tools.shift_remove(source_id);
        self.source_to_tools.insert(source_id.to_string(), names.clone());
        names
    }

    /// Load every static source and every discovered manifest.
    ///
    /// With `reload` the bookkeeping is cleared first, so sources deleted
    /// from disk disappear. A source that fails to load is logged and
    /// skipped; under `KeepPrevious` its previous set is put back.
    pub fn load_all(&mut self, reload: bool) -> Vec<String> {
        let mut previous: HashMap<String, Vec<Arc<dyn Tool>>> = HashMap::new();

        if reload {
            if self.policy == ReloadPolicy::KeepPrevious {
                for (source_id, names) in &self.source_to_tools {
                    let tools = names
                        .iter()
                        .filter_map(|n| self.tools.get(n).cloned())
                        .collect();
                    previous.insert(source_id.clone(), tools);
                }
            }
            self.tools.clear();
            self.tool_to_source.clear();
            self.source_to_tools.clear();
            self.source_states.clear();
            self.generation += 1;
        }

        let mut ids = self.loader.static_ids();
        ids.extend(self.discover());

        for id in &ids {
            if let Err(e) = self.load_source(id, reload) {
                if let Some(old) = previous.remove(id).filter(|t| !t.is_empty()) {
                    warn!(source = %id, error = %e, count = old.len(), "Keeping previous tools for failed source");
                    self.extract_tools(old, id);
                }
            }
        }

        info!(
            sources = ids.len(),
            tools = self.tools.len(),
            reload,
            "Tool registry loaded"
        );
        self.names()
    }

    pub fn reload_all(&mut self) -> Vec<String> {
        self.load_all(true)
    }

    /// Reload one source, identified either by its id or by the name of a
    /// tool it currently exports.
    pub fn reload_one(&mut self, identifier: &str) -> Result<ReloadOutcome, RegistryError> {
        let (source_id, tool) = match self.tool_to_source.get(identifier) {
            Some(source_id) => {
                debug!(tool = identifier, source = %source_id, "Resolved tool to source");
                (source_id.clone(), Some(identifier.to_string()))
            }
            None => (identifier.to_string(), None),
        };

        if self.loader.resolve(&source_id).is_none() {
            // A source that vanished from disk takes its tools with it
            if self.source_to_tools.contains_key(&source_id) {
                warn!(source = %source_id, "Tool source no longer exists, unloading");
                self.retract(&source_id);
                self.source_to_tools.shift_remove(&source_id);
                self.source_states.shift_remove(&source_id);
                self.generation += 1;
            }
            return Err(RegistryError::UnknownSource(source_id));
        }

        self.load_source(&source_id, true)?;

        Ok(ReloadOutcome {
            tools: self.tools_in_source(&source_id),
            names: self.names(),
            total: self.len(),
            source_id,
            tool,
        })
    }

    /// Remove every tool currently attributed to `source_id`
    fn retract(&mut self, source_id: &str) -> Vec<String> {
        let Some(names) = self.source_to_tools.get_mut(source_id) else {
            return Vec::new();
        };
        let names = std::mem::take(names);
        for name in &names {
            if self.tool_to_source.get(name).map(String::as_str) == Some(source_id) {
                self.tool_to_source.remove(name);
                self.tools.shift_remove(name);
            }
        }
        if !names.is_empty() {
            debug!(source = source_id, tools = ?names, "Retracted tools");
        }
        names
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn tools_in_source(&self, source_id: &str) -> Vec<String> {
        self.source_to_tools
            .get(source_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn source_of(&self, name: &str) -> Option<&str> {
        self.tool_to_source.get(name).map(String::as_str)
    }

    pub fn source_state(&self, source_id: &str) -> SourceState {
        self.source_states
            .get(source_id)
            .cloned()
            .unwrap_or(SourceState::Unloaded)
    }

    /// Every source the registry has attempted, with its state
    pub fn sources(&self) -> Vec<(String, SourceState)> {
        self.source_states
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Bumped by every mutation; lets holders of a snapshot detect staleness
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Human-readable listing of every tool with its source
    pub fn summary(&self) -> String {
        if self.tools.is_empty() {
            return "No tools loaded.".to_string();
        }

        let mut info = format!("{} tools loaded:\n", self.tools.len());
        for (name, tool) in &self.tools {
            let source = self.source_of(name).unwrap_or("unknown");
            let description = tool
                .definition()
                .description
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            info.push_str(&format!(
                "  • {} (from {}): {}\n",
                name,
                source,
                truncate(&description, SUMMARY_DESCRIPTION_LEN)
            ));
        }
        info
    }

    /// Freeze the current tool list for an executable agent
    pub fn snapshot(&self) -> ToolSet {
        ToolSet::new(self.tools.values().cloned().collect(), self.generation)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools_dir", &self.loader.tools_dir())
            .field("policy", &self.policy)
            .field("sources", &self.source_to_tools)
            .field("generation", &self.generation)
            .finish()
    }
}
