//! Logging setup for the build service.
//!
//! [`crate::BuildService`] installs a global subscriber when it is
//! constructed, scoped to the esmpack crates at the configured level.
//! Embedders that already run their own subscriber keep it: installation is
//! best-effort and `RUST_LOG` overrides the configured level entirely.

use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Crates covered by the default filter.
const SERVICE_CRATES: &[&str] = &["esmpack_build", "esmpack_npm", "esmpack_store"];

/// Verbosity of build pipeline logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    /// No pipeline logging.
    Silent,
    Error,
    Warn,
    #[default]
    Info,
    /// Includes per-phase timings (install, types, bundle).
    Debug,
}

impl LogLevel {
    /// Filter directives limiting the level to the esmpack crates, so an
    /// embedding application's own logging is left alone.
    fn directives(&self) -> String {
        let level = match self {
            LogLevel::Silent => return "off".to_string(),
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        SERVICE_CRATES
            .iter()
            .map(|name| format!("{name}={level}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "silent" | "off" => Ok(LogLevel::Silent),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(format!("invalid log level: {other}")),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Silent => "silent",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(name)
    }
}

/// Install the service subscriber at the given level.
///
/// Runs once per process; later calls and processes that already carry a
/// global subscriber are no-ops.
pub(crate) fn install(level: LogLevel) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.directives()));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_target(false))
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_levels() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("off".parse::<LogLevel>().unwrap(), LogLevel::Silent);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn directives_scope_to_service_crates() {
        assert_eq!(
            LogLevel::Debug.directives(),
            "esmpack_build=debug,esmpack_npm=debug,esmpack_store=debug"
        );
        assert_eq!(LogLevel::Silent.directives(), "off");
    }

    #[test]
    fn display_roundtrips_through_parse() {
        for level in [
            LogLevel::Silent,
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
        ] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
    }
}
