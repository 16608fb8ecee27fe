//! Error types and handling
//!
//! The error taxonomy is split per domain (preflight, definition, bake
//! execution, persisted state, history export, artifact platform) and wrapped
//! in the main [`BakeflowError`] enum for unified handling.
//!
//! Fatal errors abort a phase. Soft failures (missing build references,
//! summary generation problems) are never represented here; they are logged
//! as warnings by the caller.

use thiserror::Error;

/// Errors raised before any build step runs
#[derive(Error, Debug)]
pub enum PreflightError {
    /// Buildx is not installed or not reachable
    #[error("Docker buildx is required. See https://github.com/docker/setup-buildx-action to set up buildx.")]
    BuildxUnavailable,

    /// Builder inspection failed
    #[error("Failed to inspect builder {name}: {message}")]
    BuilderInspect { name: String, message: String },

    /// Temporary working directory could not be created
    #[error("Failed to create temporary directory")]
    TempDir(#[source] std::io::Error),
}

/// Errors produced while resolving the bake definition
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// The build engine rejected the definition sources
    #[error("Failed to resolve bake definition: {message}")]
    Resolve { message: String },

    /// The printed definition is not valid JSON
    #[error("Failed to parse bake definition")]
    Parse(#[from] serde_json::Error),

    /// The definition resolved but selects nothing to build
    #[error("Bake definition does not contain any target")]
    NoTargets,
}

/// Errors produced by the bake subprocess passes
#[derive(Error, Debug)]
pub enum BakeError {
    /// The dry-run print pass failed; no execution pass was attempted
    #[error("Bake definition is invalid: {message}")]
    PrintFailed { message: String },

    /// The execution pass failed (non-zero exit code with stderr output)
    #[error("{message}")]
    ExecutionFailed { message: String },

    /// The build engine process could not be launched
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the persisted state store
#[derive(Error, Debug)]
pub enum StateError {
    /// A write-once key was written twice in the same phase
    #[error("State key '{key}' has already been written")]
    AlreadyWritten { key: String },

    /// A value could not be serialized
    #[error("Failed to serialize state key '{key}'")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// State backend I/O error
    #[error("State I/O error")]
    Io(#[from] std::io::Error),
}

/// Errors from build history export
#[derive(Error, Debug)]
pub enum HistoryError {
    /// `buildx history export` failed
    #[error("Failed to export build records: {message}")]
    Export { message: String },

    /// Exported bundle could not be inspected
    #[error("Failed to read exported build records")]
    Io(#[from] std::io::Error),
}

/// Errors from the job artifact platform
#[derive(Error, Debug)]
pub enum ArtifactError {
    /// Required runner configuration is missing
    #[error("Artifact platform not available: {reason}")]
    NotAvailable { reason: String },

    /// The artifact service returned an unexpected response
    #[error("Artifact service error: {message}")]
    Service { message: String },

    /// HTTP transport error
    #[error("Artifact request failed")]
    Http(#[from] reqwest::Error),

    /// Local file error
    #[error("Artifact file error")]
    Io(#[from] std::io::Error),
}

/// Internal/generic fallback errors
#[derive(Error, Debug)]
pub enum InternalError {
    /// Generic internal error
    #[error("Internal error: {message}")]
    Generic { message: String },
}

/// Main error enum wrapping all domain-specific errors
#[derive(Error, Debug)]
pub enum BakeflowError {
    /// Preflight errors
    #[error("Preflight error: {0}")]
    Preflight(#[from] PreflightError),

    /// Definition errors
    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Bake execution errors, surfaced with the engine's own message
    #[error(transparent)]
    Bake(#[from] BakeError),

    /// Persisted state errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// History export errors
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// Artifact platform errors
    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    /// Internal/generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] InternalError),
}

/// Convenience type alias for Results with BakeflowError
pub type Result<T> = std::result::Result<T, BakeflowError>;
