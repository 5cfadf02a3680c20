//! Tool sources - the loadable units that contribute tools
//!
//! A source exposes one registration entrypoint, `load()`, which returns a
//! fresh set of tool instances every time it is called. Reloading a source
//! is just calling `load()` again and swapping the returned set in.
//!
//! Two kinds exist:
//! - `ManifestSource`: a `*.yaml` / `*.yml` file in the tools directory,
//!   re-read from disk on every load
//! - `StaticSource`: a compiled-in registration function

use crate::error::SourceError;
use crate::manifest::ToolManifest;
use crate::tool::Tool;
use crate::tools::Builtins;
use indexmap::IndexMap;
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const MANIFEST_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// File stems that never name a source
const RESERVED_STEMS: [&str; 2] = ["mod", "index"];

/// A unit that yields zero or more tools when loaded
pub trait ToolSource: Send + Sync {
    /// Source identifier (file stem for manifests)
    fn id(&self) -> &str;

    /// Registration entrypoint. Must return new instances on every call.
    fn load(&self) -> Result<Vec<Arc<dyn Tool>>, SourceError>;
}

/// Load state of a source as tracked by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceState {
    Unloaded,
    Loaded,
    Failed(String),
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceState::Unloaded => write!(f, "unloaded"),
            SourceState::Loaded => write!(f, "loaded"),
            SourceState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// A YAML manifest in the tools directory
pub struct ManifestSource {
    id: String,
    path: PathBuf,
    builtins: Arc<Builtins>,
}

impl ManifestSource {
    pub fn new(id: impl Into<String>, path: PathBuf, builtins: Arc<Builtins>) -> Self {
        Self {
            id: id.into(),
            path,
            builtins,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ToolSource for ManifestSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Vec<Arc<dyn Tool>>, SourceError> {
        let manifest = ToolManifest::from_file(&self.path)?;

        let mut seen = HashSet::new();
        let mut tools = Vec::with_capacity(manifest.tools.len());
        for entry in &manifest.tools {
            let tool = entry.build(&self.path, &self.builtins)?;
            if !seen.insert(tool.name().to_string()) {
                return Err(SourceError::DuplicateTool {
                    name: tool.name().to_string(),
                    source_id: self.id.clone(),
                });
            }
            tools.push(tool);
        }
        Ok(tools)
    }
}

type RegisterFn = dyn Fn() -> Result<Vec<Arc<dyn Tool>>, SourceError> + Send + Sync;

/// A compiled-in source backed by a registration function
pub struct StaticSource {
    id: String,
    register: Box<RegisterFn>,
}

impl StaticSource {
    pub fn new<F>(id: impl Into<String>, register: F) -> Self
    where
        F: Fn() -> Result<Vec<Arc<dyn Tool>>, SourceError> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            register: Box::new(register),
        }
    }
}

impl ToolSource for StaticSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn load(&self) -> Result<Vec<Arc<dyn Tool>>, SourceError> {
        (self.register)()
    }
}

/// Finds and resolves sources: static ones first, then the tools directory
pub struct SourceLoader {
    tools_dir: PathBuf,
    builtins: Arc<Builtins>,
    static_sources: IndexMap<String, Arc<dyn ToolSource>>,
}

impl SourceLoader {
    pub fn new(tools_dir: impl Into<PathBuf>, builtins: Arc<Builtins>) -> Self {
        Self {
            tools_dir: tools_dir.into(),
            builtins,
            static_sources: IndexMap::new(),
        }
    }

    pub fn tools_dir(&self) -> &Path {
        &self.tools_dir
    }

    /// Register a compiled-in source. A later source with the same id replaces
    /// the earlier one.
    pub fn add_static(&mut self, source: Arc<dyn ToolSource>) {
        self.static_sources.insert(source.id().to_string(), source);
    }

    pub fn static_ids(&self) -> Vec<String> {
        self.static_sources.keys().cloned().collect()
    }

    /// Enumerate candidate source ids in the tools directory, sorted.
    ///
    /// A missing directory is not an error: it yields no ids and a warning.
    pub fn discover(&self) -> Vec<String> {
        if !self.tools_dir.is_dir() {
            warn!(tools_dir = %self.tools_dir.display(), "Tools directory not found");
            return Vec::new();
        }

        let entries = match std::fs::read_dir(&self.tools_dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(tools_dir = %self.tools_dir.display(), error = %e, "Cannot read tools directory");
                return Vec::new();
            }
        };

        let mut ids = BTreeSet::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let ext = path.extension().and_then(|e| e.to_str());
            if !matches!(ext, Some(e) if MANIFEST_EXTENSIONS.contains(&e)) {
                continue;
            }

            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if is_candidate_stem(stem) && !ids.insert(stem.to_string()) {
                warn!(
                    source = stem,
                    preferred = MANIFEST_EXTENSIONS[0],
                    "Source has more than one manifest file, only one is loaded"
                );
            }
        }

        let ids: Vec<String> = ids.into_iter().collect();
        debug!(count = ids.len(), ?ids, "Discovered tool sources");
        ids
    }

    /// Resolve a source id to a loadable source
    pub fn resolve(&self, id: &str) -> Option<Arc<dyn ToolSource>> {
        if let Some(source) = self.static_sources.get(id) {
            return Some(source.clone());
        }

        if !is_candidate_stem(id) || id.contains(['/', '\\']) {
            return None;
        }

        MANIFEST_EXTENSIONS
            .iter()
            .map(|ext| self.tools_dir.join(format!("{}.{}", id, ext)))
            .find(|path| path.is_file())
            .map(|path| {
                Arc::new(ManifestSource::new(id, path, self.builtins.clone())) as Arc<dyn ToolSource>
            })
    }
}

/// Hidden, private and index files are not sources
fn is_candidate_stem(stem: &str) -> bool {
    !stem.is_empty()
        && !stem.starts_with('.')
        && !stem.starts_with('_')
        && !RESERVED_STEMS.contains(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::testing::EchoTool;
    use tempfile::TempDir;

    fn loader(dir: &Path) -> SourceLoader {
        SourceLoader::new(dir, Arc::new(Builtins::default()))
    }

    #[test]
    fn test_discover_filters_hidden_private_and_index() {
        let temp = TempDir::new().unwrap();
        for name in [
            "time.yaml",
            "matrix.yml",
            "_private.yaml",
            ".hidden.yaml",
            "mod.yaml",
            "index.yml",
            "notes.txt",
        ] {
            std::fs::write(temp.path().join(name), "tools: []\n").unwrap();
        }
        std::fs::create_dir(temp.path().join("nested.yaml")).unwrap();

        assert_eq!(loader(temp.path()).discover(), vec!["matrix", "time"]);
    }

    #[test]
    fn test_discover_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does-not-exist");
        assert!(loader(&missing).discover().is_empty());
    }

    #[test]
    fn test_resolve_manifest_and_static() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("time.yml"), "tools: []\n").unwrap();

        let mut loader = loader(temp.path());
        loader.add_static(Arc::new(StaticSource::new("core", || {
            Ok(vec![EchoTool::new("ping", "pong").shared()])
        })));

        assert_eq!(loader.resolve("time").unwrap().id(), "time");
        assert_eq!(loader.resolve("core").unwrap().load().unwrap().len(), 1);
        assert!(loader.resolve("missing").is_none());
        assert!(loader.resolve("../time").is_none());
        assert!(loader.resolve("_time").is_none());
    }

    #[test]
    fn test_same_stem_in_both_extensions_is_one_source() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("time.yaml"), "tools:\n  - builtin: get_time\n").unwrap();
        std::fs::write(temp.path().join("time.yml"), "tools:\n  - builtin: read_file\n").unwrap();

        let loader = loader(temp.path());
        assert_eq!(loader.discover(), vec!["time"]);

        let tools = loader.resolve("time").unwrap().load().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["get_time"]);
    }

    #[test]
    fn test_manifest_source_rejects_duplicates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dup.yaml");
        std::fs::write(
            &path,
            r#"
tools:
  - name: a
    description: first
    command: "true"
  - name: a
    description: second
    command: "true"
"#,
        )
        .unwrap();

        let source = ManifestSource::new("dup", path, Arc::new(Builtins::default()));
        assert!(matches!(
            source.load(),
            Err(SourceError::DuplicateTool { .. })
        ));
    }

    #[test]
    fn test_manifest_source_rereads_disk() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("time.yaml");
        std::fs::write(&path, "tools:\n  - builtin: get_time\n").unwrap();

        let source = ManifestSource::new("time", path.clone(), Arc::new(Builtins::default()));
        assert_eq!(source.load().unwrap().len(), 1);

        std::fs::write(
            &path,
            "tools:\n  - builtin: get_time\n  - name: utc\n    description: UTC time\n    command: date -u\n",
        )
        .unwrap();
        let names: Vec<String> = source
            .load()
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(names, vec!["get_time", "utc"]);
    }
}
