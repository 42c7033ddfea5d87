//! The bundler seam.
//!
//! The generic JS bundler is an external engine: esmpack hands it a stdin
//! entry, a resolve hook for externals, a syntax target and a define table,
//! and gets output files, warnings and errors back in memory. Everything the
//! pipeline needs from an engine fits this trait; tests drive it with
//! scripted implementations.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::path::PathBuf;

use crate::Result;

/// One build invocation handed to the engine.
#[derive(Debug, Clone)]
pub struct BundleSpec {
    /// Virtual entry source (the synthesized re-export stub).
    pub entry_source: String,
    /// File name the engine reports for the virtual entry.
    pub entry_name: String,
    /// Directory import specifiers resolve against (the build workdir).
    pub resolve_dir: PathBuf,
    /// Syntax level (`es2020`, `esnext`, ...).
    pub target: String,
    /// Minify whitespace/identifiers/syntax.
    pub minify: bool,
    /// Global substitution table applied during bundling.
    pub define: FxHashMap<String, String>,
}

/// Resolution request forwarded from the engine to the hook.
#[derive(Debug, Clone)]
pub struct ResolveArgs<'a> {
    /// The literal import specifier.
    pub path: &'a str,
    /// Absolute path of the importing file (the entry name for the stdin
    /// entry).
    pub importer: &'a str,
}

/// Hook decision for one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Replacement path. External paths surface verbatim in the output;
    /// internal paths are read and bundled by the engine.
    pub path: String,
    pub external: bool,
}

impl Resolution {
    pub fn external(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            external: true,
        }
    }

    pub fn internal(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            external: false,
        }
    }
}

/// Import interception installed into the engine.
pub trait ResolveHook: Send + Sync {
    /// Whether the hook claims this specifier. The engine consults this
    /// before calling [`resolve`](Self::resolve).
    fn applies_to(&self, specifier: &str) -> bool;

    fn resolve(&self, args: ResolveArgs<'_>) -> Resolution;
}

/// One produced output file.
#[derive(Debug, Clone)]
pub struct OutputFile {
    /// Engine-assigned path; only the extension is meaningful here.
    pub path: String,
    pub contents: Vec<u8>,
}

/// Engine result, collected in memory.
#[derive(Debug, Clone, Default)]
pub struct BundleOutcome {
    pub output_files: Vec<OutputFile>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl BundleOutcome {
    /// The produced `.js` file, if the engine emitted one.
    pub fn js(&self) -> Option<&OutputFile> {
        self.output_files.iter().find(|f| f.path.ends_with(".js"))
    }

    /// The produced `.css` sidecar, if any.
    pub fn css(&self) -> Option<&OutputFile> {
        self.output_files.iter().find(|f| f.path.ends_with(".css"))
    }
}

/// A bundling engine. Implementations are expected to parallelize
/// internally; the pipeline only awaits the final outcome.
#[async_trait]
pub trait Bundler: Send + Sync {
    /// Run one bundle. Invocation failures (the engine itself breaking) are
    /// errors; bundling problems are reported through
    /// [`BundleOutcome::errors`].
    async fn bundle(&self, spec: &BundleSpec, hook: &dyn ResolveHook) -> Result<BundleOutcome>;
}
