//! Registry installer subprocess.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::{NpmError, Result};

/// Default timeout for a registry install (10 minutes).
const DEFAULT_INSTALL_TIMEOUT_SECS: u64 = 600;

/// Materializes a set of `name@version` specs into `<workdir>/node_modules`.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Install the given specs into the working directory. All specs must
    /// succeed; a registry miss is an error.
    async fn install(&self, workdir: &Path, specs: &[String]) -> Result<()>;

    /// Install a `@types/*` candidate. Returns `false` when the registry has
    /// no such package, which is a normal outcome, not an error.
    async fn install_types(&self, workdir: &Path, spec: &str) -> Result<bool>;
}

/// Installer backed by the `yarn` CLI.
#[derive(Debug, Clone)]
pub struct YarnInstaller {
    timeout_secs: u64,
}

impl YarnInstaller {
    pub fn new() -> Self {
        Self {
            timeout_secs: DEFAULT_INSTALL_TIMEOUT_SECS,
        }
    }

    /// Override the subprocess deadline.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    async fn run_add(&self, workdir: &Path, specs: &[String]) -> Result<std::process::Output> {
        let mut cmd = Command::new("yarn");
        cmd.arg("add")
            .arg("--silent")
            .arg("--no-progress")
            .arg("--non-interactive")
            .arg("--no-lockfile")
            .args(specs)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|source| NpmError::SpawnFailed {
            command: "yarn".to_string(),
            source,
        })?;

        timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| NpmError::Timeout {
            command: "yarn add".to_string(),
            timeout_secs: self.timeout_secs,
        })?
        .map_err(|source| NpmError::SpawnFailed {
            command: "yarn".to_string(),
            source,
        })
    }
}

impl Default for YarnInstaller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Installer for YarnInstaller {
    async fn install(&self, workdir: &Path, specs: &[String]) -> Result<()> {
        if specs.is_empty() {
            return Ok(());
        }
        tracing::debug!(specs = ?specs, "yarn add");
        let output = self.run_add(workdir, specs).await?;
        if !output.status.success() {
            return Err(NpmError::InstallFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    async fn install_types(&self, workdir: &Path, spec: &str) -> Result<bool> {
        let output = self.run_add(workdir, &[spec.to_string()]).await?;
        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_not_found(&stderr) {
            tracing::debug!(spec, "types package not published");
            return Ok(false);
        }
        Err(NpmError::InstallFailed {
            exit_code: output.status.code().unwrap_or(-1),
            stderr: stderr.into_owned(),
        })
    }
}

/// Registry-miss detection across yarn's error phrasings.
fn is_not_found(stderr: &str) -> bool {
    stderr.contains("Couldn't find package")
        || stderr.contains("Couldn't find any versions")
        || stderr.contains("Not found")
        || stderr.contains("404")
}
