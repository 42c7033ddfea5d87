//! # esmpack-build
//!
//! The esmpack build pipeline: given a normalized build request naming npm
//! packages, a syntax target and an environment, produce a single ES-module
//! bundle (plus optional CSS sidecar and type declarations) and persist it
//! under a deterministic BuildID.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use esmpack_build::{BuildConfig, BuildRequest, BuildService, PackageRef, Target};
//!
//! # async fn example(engine: Arc<dyn esmpack_build::Bundler>) -> esmpack_build::Result<()> {
//! let service = BuildService::new(BuildConfig::new("/var/lib/esmpack"), engine)?;
//!
//! let request = BuildRequest::new(
//!     vec![PackageRef::new("preact", "10.5.0")],
//!     Target::Es2020,
//! );
//! let outcome = service.build(&request).await?;
//! println!("built {}", outcome.build_id);
//! # Ok(()) }
//! ```
//!
//! The HTTP front-end, the bundling engine and the polyfill/type embed set
//! live outside this crate; the pipeline consumes them through the
//! [`Bundler`] trait, [`BuildService::seed_polyfills`] and the collaborator
//! seams on [`BuildService`].

pub mod bundler;
pub mod config;
pub mod driver;
pub mod entry;
pub mod externals;
pub mod fingerprint;
pub mod logging;
pub mod meta;
pub mod platform;
pub mod postprocess;
pub mod request;
pub mod serializer;
pub mod service;

pub use bundler::{
    BundleOutcome, BundleSpec, Bundler, OutputFile, Resolution, ResolveArgs, ResolveHook,
};
pub use config::BuildConfig;
pub use externals::{BuildContext, SelfEntry};
pub use fingerprint::fingerprint;
pub use logging::LogLevel;
pub use meta::{CopyDtsPublisher, DtsPublisher, ImportMeta, ImportMetaMap};
pub use request::{BuildRequest, PackageRef, Target};
pub use service::{BuildOutcome, BuildService};

use esmpack_npm::NpmError;

/// Errors surfaced by the build pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed request: empty package list, unknown target.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Registry reports no such package/version.
    #[error("not found: {0}")]
    NotFound(String),

    /// Registry installer failed.
    #[error("install failed: {0}")]
    InstallFailed(String),

    /// Module shape could not be determined.
    #[error("probe failed: {0}")]
    ProbeFailed(String),

    /// The bundling engine reported a non-resolution error.
    #[error("bundle failed: {0}")]
    BundleFailed(String),

    /// Filesystem or subprocess failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact store failure.
    #[error("store error: {0}")]
    Store(#[from] esmpack_store::StoreError),

    /// Record encoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<NpmError> for Error {
    fn from(err: NpmError) -> Self {
        match err {
            NpmError::NotFound(name) => Error::NotFound(name),
            NpmError::InstallFailed { .. } => Error::InstallFailed(err.to_string()),
            NpmError::ProbeFailed { .. } | NpmError::InvalidManifest { .. } => {
                Error::ProbeFailed(err.to_string())
            }
            // Spawn/timeout failures are infrastructure, not build content.
            NpmError::SpawnFailed { .. } | NpmError::Timeout { .. } => {
                Error::Io(std::io::Error::other(err.to_string()))
            }
            NpmError::Io(source) => Error::Io(source),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

impl miette::Diagnostic for Error {
    fn code(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        Some(Box::new(match self {
            Error::BadRequest(_) => "BAD_REQUEST",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InstallFailed(_) => "INSTALL_FAILED",
            Error::ProbeFailed(_) => "PROBE_FAILED",
            Error::BundleFailed(_) => "BUNDLE_FAILED",
            Error::Io(_) => "IO_FAILED",
            Error::Store(_) => "STORE_FAILED",
            Error::Serialization(_) => "SERIALIZATION_FAILED",
        }))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(miette::Severity::Error)
    }

    fn help(&self) -> Option<Box<dyn std::fmt::Display + '_>> {
        match self {
            Error::BadRequest(msg) => Some(Box::new(format!(
                "The request could not be normalized: {msg}"
            ))),
            Error::NotFound(name) => Some(Box::new(format!(
                "The registry has no matching package or version for '{name}'."
            ))),
            Error::BundleFailed(_) => Some(Box::new(
                "The requested package may rely on syntax or modules the engine cannot bundle."
                    .to_string(),
            )),
            _ => None,
        }
    }
}
