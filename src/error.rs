//! Error types for the registry, sources, provider and session layers

use thiserror::Error;

/// Failure to load a single tool source.
///
/// Never fatal to the registry: the registry logs it, records the source as
/// failed and keeps every other source's tools live.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: String, reason: String },

    #[error("unknown builtin tool '{key}' in {path}")]
    UnknownBuiltin { key: String, path: String },

    #[error("tool '{name}' declared twice in source '{source_id}'")]
    DuplicateTool { name: String, source_id: String },

    #[error("source '{source_id}' failed to register: {reason}")]
    Registration { source_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown tool source '{0}'")]
    UnknownSource(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0} not found in environment")]
    MissingApiKey(String),

    #[error("API request failed: {0}")]
    Request(String),

    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    /// The model produced output that could not be interpreted. The session
    /// treats this as recoverable and re-prompts.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
}
