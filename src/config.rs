//! Configuration for Pierre
//!
//! Layered in order: YAML file, `.env` + environment, then CLI flags (applied
//! by the binary). Every field has a default so an empty or missing file is
//! a valid configuration.

use crate::provider::ProviderConfig;
use crate::registry::ReloadPolicy;
use crate::session::{AgentLimits, DEFAULT_MAX_EXECUTION_TIME, DEFAULT_MAX_ITERATIONS};
use crate::tools::{DEFAULT_NEWS_URL, DEFAULT_SEARCH_URL};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM provider configuration
    pub provider: ProviderConfig,

    /// Directory scanned for tool manifests
    pub tools_dir: PathBuf,

    pub reload: ReloadConfig,

    pub limits: LimitsConfig,

    /// Directory for logs and the telemetry database
    pub data_dir: PathBuf,

    /// Working directory for tools; defaults to the current directory
    pub working_dir: Option<PathBuf>,

    pub assistant_name: String,

    /// DuckDuckGo-compatible instant answer endpoint
    pub search_url: String,

    /// Yahoo Finance search endpoint used for company news
    pub news_url: String,

    /// Reload automatically when the tools directory changes
    pub watch: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub on_failure: ReloadPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_iterations: usize,
    pub max_execution_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_execution_secs: DEFAULT_MAX_EXECUTION_TIME.as_secs(),
        }
    }
}

impl From<&LimitsConfig> for AgentLimits {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            max_iterations: limits.max_iterations.max(1),
            max_execution_time: Duration::from_secs(limits.max_execution_secs.max(1)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            tools_dir: PathBuf::from("tools"),
            reload: ReloadConfig::default(),
            limits: LimitsConfig::default(),
            data_dir: default_data_dir(),
            working_dir: None,
            assistant_name: "Pierre".to_string(),
            search_url: DEFAULT_SEARCH_URL.to_string(),
            news_url: DEFAULT_NEWS_URL.to_string(),
            watch: false,
        }
    }
}

/// $XDG_DATA_HOME/pierre, falling back to ./.pierre
fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("pierre"))
        .unwrap_or_else(|| PathBuf::from(".pierre"))
}

impl Config {
    /// $XDG_CONFIG_HOME/pierre/config.yaml
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("pierre").join("config.yaml"))
    }

    /// Load from an explicit file, or from the default location if it
    /// exists, then apply `.env` and environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        // A missing .env is fine
        let _ = dotenvy::dotenv();
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment overrides through `var`.
    ///
    /// `PIERRE_*` variables win over the `LLAMA_MODEL` / `OLLAMA_BASE_URL`
    /// names older setups use.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(model) = non_empty("PIERRE_MODEL").or_else(|| non_empty("LLAMA_MODEL")) {
            self.provider.default_model = model;
        }
        if let Some(url) = non_empty("PIERRE_BASE_URL").or_else(|| non_empty("OLLAMA_BASE_URL")) {
            self.provider.base_url = ollama_v1(url);
        }
        if let Some(key_env) = non_empty("PIERRE_API_KEY_ENV") {
            self.provider.api_key_env = Some(key_env);
        }
        if let Some(dir) = non_empty("PIERRE_TOOLS_DIR") {
            self.tools_dir = PathBuf::from(dir);
        }
    }

    pub fn limits(&self) -> AgentLimits {
        AgentLimits::from(&self.limits)
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("telemetry.db")
    }
}

/// Ollama's native URL (`http://host:11434`) needs the `/v1` suffix for the
/// OpenAI-compatible endpoint
fn ollama_v1(url: String) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with(":11434") {
        format!("{}/v1", trimmed)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_target_local_ollama() {
        let config = Config::default();
        assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
        assert_eq!(config.provider.api_key_env, None);
        assert_eq!(config.reload.on_failure, ReloadPolicy::KeepPrevious);
        assert_eq!(config.limits().max_iterations, 10);
        assert_eq!(config.limits().max_execution_time, Duration::from_secs(120));
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_yaml() {
        let config = Config::from_yaml(
            r#"
provider:
  default_model: qwen2.5
tools_dir: /opt/pierre/tools
reload:
  on_failure: retract
limits:
  max_iterations: 4
"#,
        )
        .unwrap();

        assert_eq!(config.provider.default_model, "qwen2.5");
        assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
        assert_eq!(config.tools_dir, PathBuf::from("/opt/pierre/tools"));
        assert_eq!(config.reload.on_failure, ReloadPolicy::Retract);
        assert_eq!(config.limits.max_iterations, 4);
        assert_eq!(config.limits.max_execution_secs, 120);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(Config::from_yaml("reload:\n  on_failure: sometimes\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("PIERRE_MODEL", "mistral"),
            ("PIERRE_TOOLS_DIR", "/srv/tools"),
            ("PIERRE_API_KEY_ENV", "GROQ_API_KEY"),
        ]));
        assert_eq!(config.provider.default_model, "mistral");
        assert_eq!(config.tools_dir, PathBuf::from("/srv/tools"));
        assert_eq!(config.provider.api_key_env.as_deref(), Some("GROQ_API_KEY"));
    }

    #[test]
    fn test_legacy_env_names() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("LLAMA_MODEL", "llama3.2"),
            ("OLLAMA_BASE_URL", "http://gpu-box:11434"),
        ]));
        assert_eq!(config.provider.default_model, "llama3.2");
        assert_eq!(config.provider.base_url, "http://gpu-box:11434/v1");
    }

    #[test]
    fn test_pierre_env_wins_over_legacy() {
        let mut config = Config::default();
        config.apply_env(env(&[("LLAMA_MODEL", "old"), ("PIERRE_MODEL", "new"), ("PIERRE_BASE_URL", "")]));
        assert_eq!(config.provider.default_model, "new");
        assert_eq!(config.provider.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_zero_limits_are_clamped() {
        let limits = LimitsConfig {
            max_iterations: 0,
            max_execution_secs: 0,
        };
        let limits = AgentLimits::from(&limits);
        assert_eq!(limits.max_iterations, 1);
        assert_eq!(limits.max_execution_time, Duration::from_secs(1));
    }

    #[test]
    fn test_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "assistant_name: Marie\nwatch: true\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.assistant_name, "Marie");
        assert!(config.watch);
        assert!(Config::from_file(&temp.path().join("missing.yaml")).is_err());
    }
}
