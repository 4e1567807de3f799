//! Error taxonomy shared across every subsystem (C1–C10).
//!
//! Worker-local failures never cross a thread boundary as a panic or an unwrapped
//! exception — they are captured here and become ordinary `Err` values. The RPC
//! layer (`daemon.rs`) is the only place a `RagexError` is turned into the
//! wire-level `{success, error}` JSON shape; nothing else in the crate serializes
//! an error itself.

use std::path::PathBuf;

use thiserror::Error;

pub type RagexResult<T> = Result<T, RagexError>;

#[derive(Debug, Error)]
pub enum RagexError {
    /// Malformed query, unsupported flag, a regex that fails to compile, an
    /// out-of-range limit, or a path outside the workspace.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Embedder dimension disagrees with the stored collection, or a required
    /// piece of configuration (chiefly `WORKSPACE_PATH`) is missing. Fatal for
    /// the affected project until it is rebuilt or reconfigured.
    #[error("configuration mismatch: {0}")]
    ConfigurationMismatch(String),

    /// A single file failed to parse. Carries the path so callers can log and
    /// move on; never propagated past the file it occurred on.
    #[error("failed to parse {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    /// Filesystem read/write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The regex backend's subprocess-equivalent search exceeded its hard
    /// timeout and was cancelled.
    #[error("timeout")]
    Timeout,

    /// An indexing operation was requested while one was already running.
    #[error("busy: an index operation is already running for this project")]
    Busy,

    /// No project matches the given identifier (admin commands). Kept distinct
    /// from `InvalidInput` because it maps to a different process exit code.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Catch-all for conditions that should never happen in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RagexError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn configuration_mismatch(msg: impl Into<String>) -> Self {
        Self::ConfigurationMismatch(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable string identifying the error kind, independent of the formatted
    /// message. Used by the RPC layer and by admin-command exit codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ConfigurationMismatch(_) => "configuration_mismatch",
            Self::ParseError { .. } => "parse_error",
            Self::Io(_) => "io_error",
            Self::Timeout => "timeout",
            Self::Busy => "busy",
            Self::NotFound(_) => "not_found",
            Self::Serialization(_) => "internal_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Process exit code for admin (`ls`/`rm`) commands: 0 success is handled
    /// by the caller directly; this covers the error paths only.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound(_) => 2,
            _ => 1,
        }
    }
}
