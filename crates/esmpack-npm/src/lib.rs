//! npm collaborators for esmpack.
//!
//! This crate wraps everything that touches npm packages on disk or through
//! subprocesses: the `package.json` model, the registry installer, the
//! CommonJS lexer, and the module shape prober that classifies a resolved
//! entry as ESM or CJS and enumerates its exports.

pub mod installer;
pub mod lexer;
pub mod manifest;
pub mod probe;

pub use installer::{Installer, YarnInstaller};
pub use lexer::{CjsLexer, NodeCjsLexer};
pub use manifest::{package_name_of, NpmManifest};
pub use probe::{ModuleShape, ShapeProber};

/// Errors raised by npm collaborators.
#[derive(Debug, thiserror::Error)]
pub enum NpmError {
    /// Registry reports no such package/version.
    #[error("package not found: {0}")]
    NotFound(String),

    /// Installer subprocess exited non-zero.
    #[error("install failed (exit {exit_code}): {stderr}")]
    InstallFailed { exit_code: i32, stderr: String },

    /// Failed to spawn a subprocess.
    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Subprocess exceeded its deadline.
    #[error("{command} timed out after {timeout_secs}s")]
    Timeout { command: String, timeout_secs: u64 },

    /// Module source could not be classified or lexed.
    #[error("probe failed for {path}: {reason}")]
    ProbeFailed { path: String, reason: String },

    /// Malformed package.json.
    #[error("invalid manifest at {path}: {source}")]
    InvalidManifest {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for npm collaborator operations.
pub type Result<T> = std::result::Result<T, NpmError>;
