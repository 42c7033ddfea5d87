//! Bundler invocation and the retry loop.
//!
//! Indirect `require(expr)` calls surface as `Could not resolve "<name>"`
//! errors only once the engine runs; those names become externals and the
//! build retries. The loop terminates because each round must add at least
//! one name never seen before, and the pool of names is bounded by the
//! source closure.

use rustc_hash::FxHashMap;
use std::path::Path;

use crate::bundler::{BundleOutcome, BundleSpec, Bundler};
use crate::externals::BuildContext;
use crate::request::{BuildRequest, Target};
use crate::{Error, Result};

/// File name the engine reports for the synthesized entry.
pub const ENTRY_NAME: &str = "export.js";

/// Warning prefix the engine emits for require calls it cannot follow.
const INDIRECT_REQUIRE_WARNING: &str = "Indirect calls to \"require\"";

const MISSING_MODULE_PREFIX: &str = "Could not resolve \"";

enum DriveState {
    Building,
    AppendingExternals(Vec<String>),
    Done(BundleOutcome),
    Failed(String),
}

/// Build the engine's global substitution table.
///
/// Runtime globals rewrite to sentinels the post-processor satisfies;
/// `__filename`/`__dirname` become the absolute URL of the finished
/// artifact.
pub fn define_table(
    hostname: &str,
    build_id: &str,
    env: &str,
) -> FxHashMap<String, String> {
    let dirname = Path::new(build_id)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut define = FxHashMap::default();
    define.insert(
        "__filename".to_string(),
        format!("\"https://{hostname}/{build_id}.js\""),
    );
    define.insert(
        "__dirname".to_string(),
        format!("\"https://{hostname}/{dirname}\""),
    );
    for (key, value) in [
        ("process", "__process$"),
        ("Buffer", "__Buffer$"),
        ("setImmediate", "__setImmediate$"),
        ("clearImmediate", "clearTimeout"),
        ("require.resolve", "__rResolve$"),
        ("global", "__global$"),
    ] {
        define.insert(key.to_string(), value.to_string());
        define.insert(format!("global.{key}"), value.to_string());
    }
    // `global` itself maps to the sentinel, not `global.global`.
    define.remove("global.global");
    define.insert("process.env.NODE_ENV".to_string(), format!("\"{env}\""));
    define.insert(
        "global.process.env.NODE_ENV".to_string(),
        format!("\"{env}\""),
    );
    define
}

/// Run the engine until it produces a bundle or fails fatally.
pub async fn drive(
    bundler: &dyn Bundler,
    ctx: &BuildContext,
    request: &BuildRequest,
    entry_source: String,
    resolve_dir: &Path,
    define: FxHashMap<String, String>,
) -> Result<BundleOutcome> {
    let spec = BundleSpec {
        entry_source,
        entry_name: ENTRY_NAME.to_string(),
        resolve_dir: resolve_dir.to_path_buf(),
        target: engine_target(request.target).to_string(),
        minify: !request.dev,
        define,
    };

    let mut state = DriveState::Building;
    loop {
        state = match state {
            DriveState::Building => {
                let outcome = bundler.bundle(&spec, ctx).await?;
                for warning in &outcome.warnings {
                    if !warning.starts_with(INDIRECT_REQUIRE_WARNING) {
                        tracing::warn!("{warning}");
                    }
                }
                classify_outcome(ctx, outcome)?
            }
            DriveState::AppendingExternals(names) => {
                tracing::debug!(externals = ?names, "retrying with discovered externals");
                ctx.add_externals(names);
                DriveState::Building
            }
            DriveState::Done(outcome) => return Ok(outcome),
            DriveState::Failed(message) => return Err(Error::BundleFailed(message)),
        };
    }
}

fn classify_outcome(ctx: &BuildContext, outcome: BundleOutcome) -> Result<DriveState> {
    if outcome.errors.is_empty() {
        return Ok(DriveState::Done(outcome));
    }

    let mut missing = Vec::new();
    for error in &outcome.errors {
        match missing_module(error) {
            Some(name) if !name.is_empty() => missing.push(name.to_string()),
            Some(_) => {}
            // Any non-resolution error is fatal.
            None => return Err(Error::BundleFailed(error.clone())),
        }
    }

    let fresh = ctx.add_indirect_requires(missing);
    if fresh.is_empty() {
        return Ok(DriveState::Failed(format!(
            "unresolvable imports persisted across retries: {}",
            outcome.errors.join("; ")
        )));
    }
    Ok(DriveState::AppendingExternals(fresh))
}

fn missing_module(error: &str) -> Option<&str> {
    let rest = error.strip_prefix(MISSING_MODULE_PREFIX)?;
    rest.split('"').next()
}

fn engine_target(target: Target) -> &'static str {
    target.engine_level()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_missing_module_name() {
        assert_eq!(
            missing_module("Could not resolve \"fs\" (mark it as external)"),
            Some("fs")
        );
        assert_eq!(missing_module("Transform failed: syntax error"), None);
    }

    #[test]
    fn define_table_shapes() {
        let define = define_table("cdn.example.com", "v1/react@17.0.2/es2020/react", "production");
        assert_eq!(define.get("process").unwrap(), "__process$");
        assert_eq!(define.get("global.Buffer").unwrap(), "__Buffer$");
        assert_eq!(define.get("clearImmediate").unwrap(), "clearTimeout");
        assert_eq!(define.get("process.env.NODE_ENV").unwrap(), "\"production\"");
        assert_eq!(
            define.get("__filename").unwrap(),
            "\"https://cdn.example.com/v1/react@17.0.2/es2020/react.js\""
        );
        assert_eq!(
            define.get("__dirname").unwrap(),
            "\"https://cdn.example.com/v1/react@17.0.2/es2020\""
        );
        assert!(!define.contains_key("global.global"));
        assert_eq!(define.get("global").unwrap(), "__global$");
    }

    #[test]
    fn dev_env_flows_into_node_env() {
        let define = define_table("h", "id", "development");
        assert_eq!(
            define.get("global.process.env.NODE_ENV").unwrap(),
            "\"development\""
        );
    }
}
