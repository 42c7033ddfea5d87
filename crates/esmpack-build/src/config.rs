//! Build service configuration.

use std::path::PathBuf;

use crate::logging::LogLevel;
use crate::platform;

/// Configuration for [`crate::BuildService`].
///
/// The storage root receives the artifact database, built bundles and
/// published types. The hostname is what absolute URLs (error sentinels,
/// `__filename`) are minted against; `localhost` keeps sentinels relative.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Root directory for persisted artifacts.
    pub storage_dir: PathBuf,
    /// Public hostname of the service.
    pub hostname: String,
    /// Name stamped into artifact banners.
    pub service_name: String,
    /// Build version baked into every artifact path. Incrementing it
    /// invalidates all prior artifacts.
    pub build_version: u32,
    /// Deadline for one registry install.
    pub install_timeout_secs: u64,
    /// Deadline for one CJS lexer run.
    pub lexer_timeout_secs: u64,
    /// Module names covered by the seeded polyfill set.
    pub polyfill_modules: Vec<String>,
    /// Verbosity of pipeline logging; `RUST_LOG` overrides it.
    pub log_level: LogLevel,
}

impl BuildConfig {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_build_version(mut self, bv: u32) -> Self {
        self.build_version = bv;
        self
    }

    pub fn with_install_timeout_secs(mut self, secs: u64) -> Self {
        self.install_timeout_secs = secs;
        self
    }

    pub fn with_lexer_timeout_secs(mut self, secs: u64) -> Self {
        self.lexer_timeout_secs = secs;
        self
    }

    pub fn with_polyfill_modules(
        mut self,
        modules: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.polyfill_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from(".esmpack/storage"),
            hostname: "localhost".to_string(),
            service_name: "esmpack".to_string(),
            build_version: 1,
            install_timeout_secs: 600,
            lexer_timeout_secs: 30,
            polyfill_modules: platform::EMBEDDED_POLYFILL_MODULES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            log_level: LogLevel::default(),
        }
    }
}
