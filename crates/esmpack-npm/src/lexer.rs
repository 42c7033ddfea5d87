//! CommonJS export enumeration through a lexer subprocess.
//!
//! The lexer parses module source, it never executes it. The subprocess runs
//! `node` with an embedded program built on `cjs-module-lexer`, following
//! relative re-export chains and printing the collected names as a JSON
//! array on stdout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::{NpmError, Result};

/// Default timeout for one lexer run.
const DEFAULT_LEXER_TIMEOUT_SECS: u64 = 30;

/// Maximum allowed size for lexer output (4 MB of export names is plenty).
const MAX_OUTPUT_SIZE: usize = 4 * 1024 * 1024;

const LEXER_PROGRAM: &str = r#"
const fs = require("fs");
const path = require("path");
const lexer = require("cjs-module-lexer");
const spec = process.argv[1];
const nodeModules = process.argv[2];
lexer.init().then(() => {
  const entry = require.resolve(spec, { paths: [nodeModules] });
  const seen = new Set();
  const names = new Set();
  const resolveFile = (base) => {
    for (const c of [base, base + ".js", path.join(base, "index.js")]) {
      try {
        if (fs.statSync(c).isFile()) return c;
      } catch {}
    }
    return null;
  };
  const walk = (file) => {
    if (seen.has(file)) return;
    seen.add(file);
    let parsed;
    try {
      parsed = lexer.parse(fs.readFileSync(file, "utf8"));
    } catch {
      return;
    }
    for (const name of parsed.exports) names.add(name);
    for (const spec of parsed.reexports) {
      if (!spec.startsWith(".")) continue;
      const target = resolveFile(path.resolve(path.dirname(file), spec));
      if (target) walk(target);
    }
  };
  walk(entry);
  process.stdout.write(JSON.stringify(Array.from(names)));
}).catch((err) => {
  console.error(String(err));
  process.exit(1);
});
"#;

/// Enumerates the names a CommonJS entry binds on `module.exports`.
#[async_trait]
pub trait CjsLexer: Send + Sync {
    async fn exports(&self, node_modules: &Path, import_path: &str) -> Result<Vec<String>>;
}

/// Lexer backed by a `node` subprocess.
#[derive(Debug, Clone)]
pub struct NodeCjsLexer {
    timeout_secs: u64,
    /// Directory whose `node_modules` provides `cjs-module-lexer`; exported
    /// through `NODE_PATH` ahead of the build tree.
    helper_dir: Option<PathBuf>,
}

impl NodeCjsLexer {
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_LEXER_TIMEOUT_SECS,
            helper_dir: None,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_helper_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.helper_dir = Some(dir.into());
        self
    }

    fn node_path(&self, node_modules: &Path) -> std::ffi::OsString {
        // join_paths only fails on paths containing the separator itself.
        let mut paths = Vec::new();
        if let Some(helper) = &self.helper_dir {
            paths.push(helper.join("node_modules"));
        }
        paths.push(node_modules.to_path_buf());
        std::env::join_paths(paths).unwrap_or_else(|_| node_modules.into())
    }
}

impl Default for NodeCjsLexer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CjsLexer for NodeCjsLexer {
    async fn exports(&self, node_modules: &Path, import_path: &str) -> Result<Vec<String>> {
        let child = Command::new("node")
            .arg("-e")
            .arg(LEXER_PROGRAM)
            .arg(import_path)
            .arg(node_modules)
            .env("NODE_PATH", self.node_path(node_modules))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| NpmError::SpawnFailed {
                command: "node".to_string(),
                source,
            })?;

        let output = timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| NpmError::Timeout {
            command: "cjs lexer".to_string(),
            timeout_secs: self.timeout_secs,
        })?
        .map_err(|source| NpmError::SpawnFailed {
            command: "node".to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(NpmError::ProbeFailed {
                path: import_path.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        if output.stdout.len() > MAX_OUTPUT_SIZE {
            return Err(NpmError::ProbeFailed {
                path: import_path.to_string(),
                reason: format!("lexer output too large: {} bytes", output.stdout.len()),
            });
        }

        parse_lexer_output(import_path, &output.stdout)
    }
}

fn parse_lexer_output(import_path: &str, stdout: &[u8]) -> Result<Vec<String>> {
    serde_json::from_slice(stdout).map_err(|err| NpmError::ProbeFailed {
        path: import_path.to_string(),
        reason: format!("bad lexer output: {err}"),
    })
}
