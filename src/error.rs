//! Error types for Kiln
//!
//! All modules use `KilnResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Kiln operations
pub type KilnResult<T> = Result<T, KilnError>;

/// All errors that can occur in Kiln
#[derive(Error, Debug)]
pub enum KilnError {
    // Reference errors
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    #[error("error committing {id}: {source}")]
    Commit {
        id: String,
        #[source]
        source: Box<KilnError>,
    },

    #[error("content checksum failed for {selector}: {reason}")]
    Checksum { selector: String, reason: String },

    #[error("no such file or directory: {0}")]
    PathNotFound(String),

    // Worker errors
    #[error("worker failed running {args:?}: {source}")]
    WorkerFailed {
        args: Vec<String>,
        #[source]
        source: Box<KilnError>,
    },

    #[error("process exited with status {}", exit_code(.code))]
    ProcessExit { code: Option<i32> },

    #[error("Process terminated by signal")]
    ProcessSignaled,

    #[error("execution cancelled")]
    Cancelled,

    // Definition errors
    #[error("Invalid build definition at {path}: {reason}")]
    DefinitionInvalid { path: PathBuf, reason: String },

    #[error("Unknown vertex: {0}")]
    UnknownVertex(String),

    #[error("vertex {name} failed: {reason}")]
    VertexFailed { name: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Background task failed: {0}")]
    Task(String),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

fn exit_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

impl KilnError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reason: impl Into<String>) -> Self {
        Self::InvalidReference(reason.into())
    }

    /// Wrap a worker failure with the arguments that were attempted
    pub fn worker_failed(args: &[String], source: KilnError) -> Self {
        Self::WorkerFailed {
            args: args.to_vec(),
            source: Box::new(source),
        }
    }

    /// Wrap a commit failure with the identity of the reference
    pub fn commit(id: impl Into<String>, source: KilnError) -> Self {
        Self::Commit {
            id: id.into(),
            source: Box::new(source),
        }
    }

    /// Check if error is retryable
    ///
    /// Advisory only: the solver core never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProcessSignaled => true,
            Self::WorkerFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => Some("Run: kiln config init --force"),
            Self::UnknownVertex(_) => Some("Run: kiln keys <file> to list vertex names"),
            Self::Cancelled => Some("Increase solver.timeout_secs or remove the deadline"),
            Self::WorkerFailed { .. } => Some("Re-run with -v to stream the process output"),
            Self::VertexFailed { .. } => Some("Re-run with --progress plain to see process output"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = KilnError::invalid_reference("missing input 3");
        assert_eq!(err.to_string(), "invalid reference: missing input 3");
    }

    #[test]
    fn worker_failure_carries_args() {
        let args = vec!["sh".to_string(), "-c".to_string(), "false".to_string()];
        let err = KilnError::worker_failed(&args, KilnError::ProcessExit { code: Some(1) });
        let text = err.to_string();
        assert!(text.contains("worker failed running"));
        assert!(text.contains("\"false\""));
        assert!(text.contains("status 1"));
    }

    #[test]
    fn commit_failure_carries_id() {
        let err = KilnError::commit("abc123", KilnError::invalid_reference("released"));
        assert!(err.to_string().starts_with("error committing abc123"));
    }

    #[test]
    fn error_hint() {
        assert!(KilnError::Cancelled.hint().is_some());
        assert_eq!(KilnError::ProcessSignaled.hint(), None);
    }

    #[test]
    fn error_retryable() {
        assert!(KilnError::ProcessSignaled.is_retryable());
        assert!(KilnError::worker_failed(&[], KilnError::ProcessSignaled).is_retryable());
        assert!(!KilnError::invalid_reference("x").is_retryable());
        assert!(!KilnError::Cancelled.is_retryable());
    }
}
