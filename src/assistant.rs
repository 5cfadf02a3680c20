//! Composition root
//!
//! Builds the registry and the agent session once per process, wires the
//! `reload_tools` control surface to both, and optionally watches the tools
//! directory.

use crate::config::Config;
use crate::registry::{SharedRegistry, ToolRegistry};
use crate::session::{AgentSession, LanguageModel};
use crate::source::SourceLoader;
use crate::telemetry::{ReloadTrigger, TelemetryStore};
use crate::templates::{SystemPrompt, SystemPromptTemplate, Templates};
use crate::tool::ToolContext;
use crate::tools::{Builtins, ReloadLinks};
use anyhow::Context;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Wait this long after the last filesystem event before reloading
const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Build a registry over the configured tools directory without loading it
fn build_registry(config: &Config, builtins: Arc<Builtins>, links: &ReloadLinks) -> SharedRegistry {
    let mut loader = SourceLoader::new(&config.tools_dir, builtins);
    loader.add_static(Arc::new(links.source()));
    let registry = ToolRegistry::new(loader, config.reload.on_failure).into_shared();
    links.bind_registry(&registry);
    registry
}

/// Load the registry alone, for commands that never talk to a model
pub fn load_registry(config: &Config) -> SharedRegistry {
    let builtins = Arc::new(
        Builtins::new(CancellationToken::new(), &config.search_url).with_news_url(&config.news_url),
    );
    let registry = build_registry(config, builtins, &ReloadLinks::default());
    registry.write().load_all(false);
    registry
}

pub struct Assistant {
    config: Config,
    registry: SharedRegistry,
    session: Arc<AgentSession>,
    shutdown: CancellationToken,
}

impl Assistant {
    pub fn new(config: Config, model: Arc<dyn LanguageModel>) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();
        let builtins = Arc::new(
            Builtins::new(shutdown.clone(), &config.search_url).with_news_url(&config.news_url),
        );
        let links = ReloadLinks::default();
        let registry = build_registry(&config, builtins, &links);
        let names = registry.write().load_all(false);
        info!(
            tools_dir = %config.tools_dir.display(),
            count = names.len(),
            tools = ?names,
            "Tools loaded"
        );

        let working_dir = config.working_dir();
        let templates = Templates::new().context("Failed to load system prompt template")?;
        let prompt = SystemPrompt::new(
            templates,
            SystemPromptTemplate {
                assistant_name: config.assistant_name.clone(),
                os: std::env::consts::OS.to_string(),
                working_dir: working_dir.display().to_string(),
                available_tools: Vec::new(),
                model_name: Some(model.model_name().to_string()),
            },
        );

        let snapshot = registry.read().snapshot();
        let context = ToolContext::new(working_dir, shutdown.child_token());
        let session = Arc::new(
            AgentSession::new(model, prompt, config.limits(), snapshot)
                .with_registry(registry.clone())
                .with_context(context),
        );
        links.bind_session(&session);

        Ok(Self {
            config,
            registry,
            session,
            shutdown,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn session(&self) -> &Arc<AgentSession> {
        &self.session
    }

    /// Cancelled when the assistant should stop, e.g. by `exit_pierre`
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Reload every source and rebind the session
    pub fn reload_all(&self) -> Vec<String> {
        reload_and_rebuild(&self.registry, &self.session)
    }

    /// Watch the tools directory and reload when manifests change.
    ///
    /// The task ends when the shutdown token is cancelled.
    pub fn spawn_watcher(&self, telemetry: Option<Arc<TelemetryStore>>) -> anyhow::Result<JoinHandle<()>> {
        let tools_dir = self.config.tools_dir.clone();
        let (tx, rx) = mpsc::channel(100);

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.blocking_send(event);
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create tools directory watcher")?;
        watcher
            .watch(&tools_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", tools_dir.display()))?;
        info!(tools_dir = %tools_dir.display(), "Watching tools directory");

        let registry = self.registry.clone();
        let session = self.session.clone();
        let shutdown = self.shutdown.clone();
        Ok(tokio::spawn(async move {
            // The watcher stops delivering events once dropped
            let _watcher = watcher;
            watch_loop(rx, registry, session, telemetry, shutdown).await;
        }))
    }
}

fn reload_and_rebuild(registry: &SharedRegistry, session: &AgentSession) -> Vec<String> {
    let (names, snapshot) = {
        let mut registry = registry.write();
        let names = registry.reload_all();
        (names, registry.snapshot())
    };
    session.rebuild(snapshot);
    names
}

/// Only manifest files can change the tool set
fn is_manifest_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| is_manifest_path(p))
}

fn is_manifest_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

async fn watch_loop(
    mut rx: mpsc::Receiver<Event>,
    registry: SharedRegistry,
    session: Arc<AgentSession>,
    telemetry: Option<Arc<TelemetryStore>>,
    shutdown: CancellationToken,
) {
    let mut pending = false;
    let mut last_event = Instant::now();

    loop {
        let wait = WATCH_DEBOUNCE.saturating_sub(last_event.elapsed());

        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                if is_manifest_event(&event) {
                    debug!(paths = ?event.paths, kind = ?event.kind, "Tools directory changed");
                    pending = true;
                    last_event = Instant::now();
                }
            }
            _ = tokio::time::sleep(wait), if pending => {
                pending = false;
                let names = reload_and_rebuild(&registry, &session);
                info!(count = names.len(), "Reloaded tools after directory change");

                let failed: Vec<String> = registry
                    .read()
                    .sources()
                    .into_iter()
                    .filter(|(_, state)| matches!(state, crate::source::SourceState::Failed(_)))
                    .map(|(id, state)| format!("{} ({})", id, state))
                    .collect();
                if !failed.is_empty() {
                    error!(sources = ?failed, "Some tool sources failed to reload");
                }
                if let Some(telemetry) = &telemetry {
                    let error = (!failed.is_empty()).then(|| failed.join("; "));
                    telemetry.record_reload(
                        ReloadTrigger::Watcher,
                        "all",
                        names.len(),
                        session.generation(),
                        error.as_deref(),
                    );
                }
            }
        }
    }
    debug!("Tools directory watcher stopped");
}
