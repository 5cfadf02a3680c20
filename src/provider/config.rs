//! Provider configuration

use serde::{Deserialize, Serialize};

/// Configuration for an OpenAI-compatible provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Display name for the provider
    pub name: String,
    /// API base URL (e.g., "http://localhost:11434/v1")
    pub base_url: String,
    /// Environment variable holding the API key. Local servers need none.
    pub api_key_env: Option<String>,
    /// Model to use
    pub default_model: String,
}

impl ProviderConfig {
    /// Local Ollama server through its OpenAI-compatible endpoint
    pub fn ollama() -> Self {
        Self {
            name: "Ollama".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key_env: None,
            default_model: "llama3.1".to_string(),
        }
    }

    pub fn openai() -> Self {
        Self {
            name: "OpenAI".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            default_model: "gpt-4o-mini".to_string(),
        }
    }

    pub fn openrouter() -> Self {
        Self {
            name: "OpenRouter".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            api_key_env: Some("OPENROUTER_API_KEY".to_string()),
            default_model: "meta-llama/llama-3.1-8b-instruct".to_string(),
        }
    }

    /// Custom OpenAI-compatible endpoint (LM Studio, vLLM, llama.cpp)
    pub fn custom(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key_env: Option<String>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_key_env,
            default_model: default_model.into(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::ollama()
    }
}
