//! External import resolution.
//!
//! During bundling every import matching the externals set is intercepted
//! and rewritten to a CDN URL: known packages (overrides, true peers) point
//! at their own build artifact, built-ins point at seeded polyfills or the
//! deno std bridge, and anything unknown points at the error sentinel so
//! runtime use throws with context.
//!
//! The context holds the mutable resolution state behind locks because the
//! engine may call the hook from its own worker threads, and the driver
//! grows the externals set between retries.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use esmpack_npm::probe::is_esm_file;

use crate::bundler::{Resolution, ResolveArgs, ResolveHook};
use crate::platform;
use crate::request::{PackageRef, Target};

/// The requested package's own entry, for the single-package inline case.
#[derive(Debug, Clone)]
pub struct SelfEntry {
    pub import_path: String,
    pub package_name: String,
    pub main: String,
}

/// Mutable resolution state threaded through one build (including bundler
/// retries).
pub struct BuildContext {
    hostname: String,
    bv: u32,
    target: Target,
    dev: bool,
    node_modules: PathBuf,
    self_entry: Option<SelfEntry>,
    overrides: Vec<PackageRef>,
    polyfill_modules: FxHashSet<String>,

    externals: Mutex<BTreeSet<String>>,
    peers: Mutex<FxHashMap<String, String>>,
    indirect_requires: Mutex<FxHashSet<String>>,
    cjs_requires: Mutex<Vec<(String, String)>>,
}

impl BuildContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hostname: impl Into<String>,
        bv: u32,
        target: Target,
        dev: bool,
        node_modules: impl Into<PathBuf>,
        overrides: Vec<PackageRef>,
        polyfill_modules: impl IntoIterator<Item = String>,
        self_entry: Option<SelfEntry>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            bv,
            target,
            dev,
            node_modules: node_modules.into(),
            self_entry,
            overrides,
            polyfill_modules: polyfill_modules.into_iter().collect(),
            externals: Mutex::new(BTreeSet::new()),
            peers: Mutex::new(FxHashMap::default()),
            indirect_requires: Mutex::new(FxHashSet::default()),
            cjs_requires: Mutex::new(Vec::new()),
        }
    }

    /// Record resolved peer versions (name -> exact installed version).
    pub fn set_peers(&self, peers: impl IntoIterator<Item = (String, String)>) {
        let mut guard = self.peers.lock().expect("peers lock");
        guard.clear();
        guard.extend(peers);
    }

    /// Add names to the externals set, returning how many were new.
    pub fn add_externals(&self, names: impl IntoIterator<Item = String>) -> usize {
        let mut guard = self.externals.lock().expect("externals lock");
        names.into_iter().filter(|name| guard.insert(name.clone())).count()
    }

    /// Add names discovered as indirect requires, returning only those not
    /// seen before. The bundler retries with these as externals.
    pub fn add_indirect_requires(&self, names: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut seen = self.indirect_requires.lock().expect("indirect lock");
        names
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }

    /// Snapshot of the externals set.
    pub fn externals(&self) -> Vec<String> {
        self.externals.lock().expect("externals lock").iter().cloned().collect()
    }

    /// Drain the CommonJS peer side map in insertion order.
    pub fn take_cjs_requires(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.cjs_requires.lock().expect("cjs lock"))
    }

    fn record_cjs_require(&self, name: &str, url: &str) {
        let mut guard = self.cjs_requires.lock().expect("cjs lock");
        if !guard.iter().any(|(n, _)| n == name) {
            guard.push((name.to_string(), url.to_string()));
        }
    }

    /// Artifact URL for a known package.
    fn package_url(&self, resolve_path: &str, version: &str) -> String {
        let package_name = if resolve_path.starts_with('@') {
            resolve_path
        } else {
            resolve_path.split('/').next().unwrap_or(resolve_path)
        };
        let mut filename = basename(resolve_path).to_string();
        if self.dev {
            filename.push_str(".development");
        }
        format!(
            "/v{}/{package_name}@{version}/{}/{}",
            self.bv,
            self.target,
            ensure_js_ext(&filename)
        )
    }

    fn sentinel_url(&self, name: &str) -> String {
        let encoded = urlencoding::encode(name);
        if self.hostname != "localhost" {
            format!(
                "https://{}/_error.js?type=resolve&name={encoded}",
                self.hostname
            )
        } else {
            format!("/_error.js?type=resolve&name={encoded}")
        }
    }

    /// ESM importers take the rewritten URL directly; CommonJS importers keep
    /// their `require("<name>")` literal and the URL goes to the side map for
    /// post-processing.
    fn rewrite(&self, name: &str, url: String, importer_esm: bool) -> Resolution {
        if importer_esm {
            Resolution::external(url)
        } else {
            self.record_cjs_require(name, &url);
            Resolution::external(name)
        }
    }

    fn resolve_self(&self, entry: &SelfEntry, specifier: &str) -> Resolution {
        let pkg_dir = self.node_modules.join(&entry.package_name);
        let mut file = pkg_dir.join(ensure_js_ext(&entry.main));
        if !file.is_file() {
            file = pkg_dir.join(&entry.main).join("index.js");
        }
        if file.is_file() {
            return Resolution::internal(file.to_string_lossy().into_owned());
        }
        Resolution::external(specifier)
    }
}

impl ResolveHook for BuildContext {
    fn applies_to(&self, specifier: &str) -> bool {
        if let Some(entry) = &self.self_entry {
            if entry.import_path == specifier {
                return true;
            }
        }
        self.externals.lock().expect("externals lock").contains(specifier)
    }

    fn resolve(&self, args: ResolveArgs<'_>) -> Resolution {
        if let Some(entry) = &self.self_entry {
            if args.path == entry.import_path {
                return self.resolve_self(entry, args.path);
            }
        }

        // Version lookup order: external override, then true peer.
        let mut known: Option<(String, String)> = None;
        if let Some(m) = self.overrides.iter().find(|m| m.name == args.path) {
            known = Some((args.path.to_string(), m.version.clone()));
        } else {
            let peers = self.peers.lock().expect("peers lock");
            if let Some(version) = peers.get(args.path) {
                known = Some((args.path.to_string(), version.clone()));
            }
        }

        let importer_esm = is_esm_file(Path::new(args.importer));

        if known.is_none() {
            if self.target == Target::Deno && platform::is_deno_std_module(args.path) {
                let url = format!("/v{}/_deno_std_node_{}.js", self.bv, args.path);
                return self.rewrite(args.path, url, importer_esm);
            }
            if let Some(shim) = platform::registry_polyfill(args.path) {
                // A registry-hosted shim is just a package we have not pinned.
                known = Some((shim.to_string(), "latest".to_string()));
            } else if self.polyfill_modules.contains(args.path) {
                let url = format!("/v{}/_node_{}.js", self.bv, args.path);
                return self.rewrite(args.path, url, importer_esm);
            }
        }

        match known {
            Some((resolve_path, version)) => {
                let url = self.package_url(&resolve_path, &version);
                self.rewrite(args.path, url, importer_esm)
            }
            None if importer_esm => Resolution::external(self.sentinel_url(args.path)),
            None => {
                // Empty URL: signaled resolve failure, stays dangling.
                self.record_cjs_require(args.path, "");
                Resolution::external(args.path)
            }
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn ensure_js_ext(path: &str) -> String {
    if path.ends_with(".js") {
        path.to_string()
    } else {
        format!("{path}.js")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(target: Target, dev: bool) -> BuildContext {
        BuildContext::new(
            "cdn.example.com",
            1,
            target,
            dev,
            "/nonexistent/node_modules",
            vec![],
            platform::EMBEDDED_POLYFILL_MODULES
                .iter()
                .map(|s| s.to_string()),
            None,
        )
    }

    /// An importer path that does not exist probes as non-ESM; point at a
    /// real ESM file to get ESM importer behavior.
    fn esm_importer(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("importer.mjs");
        std::fs::write(&path, "export const x = 1;\n").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn cjs_importer(dir: &tempfile::TempDir) -> String {
        let path = dir.path().join("importer.js");
        std::fs::write(&path, "module.exports = require(\"./impl\");\n").unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn peer_resolves_to_artifact_url() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2020, false);
        ctx.set_peers([("react".to_string(), "17.0.2".to_string())]);
        ctx.add_externals(["react".to_string()]);

        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "react",
            importer: &importer,
        });
        assert_eq!(
            resolution,
            Resolution::external("/v1/react@17.0.2/es2020/react.js")
        );
    }

    #[test]
    fn override_wins_over_peer() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(
            "cdn.example.com",
            1,
            Target::Es2020,
            false,
            "/nonexistent",
            vec![PackageRef::new("react", "16.14.0")],
            [],
            None,
        );
        ctx.set_peers([("react".to_string(), "17.0.2".to_string())]);

        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "react",
            importer: &importer,
        });
        assert_eq!(
            resolution,
            Resolution::external("/v1/react@16.14.0/es2020/react.js")
        );
    }

    #[test]
    fn dev_suffixes_artifact_filename() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2020, true);
        ctx.set_peers([("react".to_string(), "17.0.2".to_string())]);

        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "react",
            importer: &importer,
        });
        assert_eq!(
            resolution,
            Resolution::external("/v1/react@17.0.2/es2020/react.development.js")
        );
    }

    #[test]
    fn embedded_polyfill_url() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2020, false);
        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "fs",
            importer: &importer,
        });
        assert_eq!(resolution, Resolution::external("/v1/_node_fs.js"));
    }

    #[test]
    fn registry_shim_resolves_as_package_at_latest() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2020, false);
        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "path",
            importer: &importer,
        });
        assert_eq!(
            resolution,
            Resolution::external("/v1/path-browserify@latest/es2020/path-browserify.js")
        );
    }

    #[test]
    fn deno_target_bridges_std_modules() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Deno, false);
        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "fs",
            importer: &importer,
        });
        assert_eq!(resolution, Resolution::external("/v1/_deno_std_node_fs.js"));
    }

    #[test]
    fn unknown_name_gets_error_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2020, false);
        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "left-pad#bad",
            importer: &importer,
        });
        assert_eq!(
            resolution,
            Resolution::external(
                "https://cdn.example.com/_error.js?type=resolve&name=left-pad%23bad"
            )
        );
    }

    #[test]
    fn localhost_sentinel_is_relative() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = BuildContext::new(
            "localhost",
            1,
            Target::Es2020,
            false,
            "/nonexistent",
            vec![],
            [],
            None,
        );
        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "nope",
            importer: &importer,
        });
        assert_eq!(
            resolution,
            Resolution::external("/_error.js?type=resolve&name=nope")
        );
    }

    #[test]
    fn cjs_importer_keeps_literal_and_fills_side_map() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2020, false);
        ctx.set_peers([("react".to_string(), "17.0.2".to_string())]);

        let importer = cjs_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "react",
            importer: &importer,
        });
        // Output path untouched so `require("react")` survives to
        // post-processing.
        assert_eq!(resolution, Resolution::external("react"));
        assert_eq!(
            ctx.take_cjs_requires(),
            vec![(
                "react".to_string(),
                "/v1/react@17.0.2/es2020/react.js".to_string()
            )]
        );
    }

    #[test]
    fn cjs_unknown_records_empty_url() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2020, false);
        let importer = cjs_importer(&dir);
        ctx.resolve(ResolveArgs {
            path: "mystery",
            importer: &importer,
        });
        assert_eq!(
            ctx.take_cjs_requires(),
            vec![("mystery".to_string(), String::new())]
        );
    }

    #[test]
    fn scoped_known_package_keeps_full_name() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(Target::Es2019, false);
        ctx.set_peers([("@scope/dep".to_string(), "2.0.0".to_string())]);

        let importer = esm_importer(&dir);
        let resolution = ctx.resolve(ResolveArgs {
            path: "@scope/dep",
            importer: &importer,
        });
        assert_eq!(
            resolution,
            Resolution::external("/v1/@scope/dep@2.0.0/es2019/dep.js")
        );
    }

    #[test]
    fn self_import_inlines_from_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        let nm = dir.path().join("node_modules");
        std::fs::create_dir_all(nm.join("preact")).unwrap();
        std::fs::write(nm.join("preact/index.js"), "export const h = 1;\n").unwrap();

        let ctx = BuildContext::new(
            "cdn.example.com",
            1,
            Target::Es2020,
            false,
            &nm,
            vec![],
            [],
            Some(SelfEntry {
                import_path: "preact".to_string(),
                package_name: "preact".to_string(),
                main: "index".to_string(),
            }),
        );

        assert!(ctx.applies_to("preact"));
        let resolution = ctx.resolve(ResolveArgs {
            path: "preact",
            importer: "export.js",
        });
        assert!(!resolution.external);
        assert!(resolution.path.ends_with("index.js"));
    }

    #[test]
    fn self_import_falls_back_to_directory_index() {
        let dir = tempfile::tempdir().unwrap();
        let nm = dir.path().join("node_modules");
        std::fs::create_dir_all(nm.join("pkg/lib")).unwrap();
        std::fs::write(nm.join("pkg/lib/index.js"), "module.exports = 1;\n").unwrap();

        let ctx = BuildContext::new(
            "cdn.example.com",
            1,
            Target::Es2020,
            false,
            &nm,
            vec![],
            [],
            Some(SelfEntry {
                import_path: "pkg".to_string(),
                package_name: "pkg".to_string(),
                main: "lib".to_string(),
            }),
        );

        let resolution = ctx.resolve(ResolveArgs {
            path: "pkg",
            importer: "export.js",
        });
        assert!(!resolution.external);
        assert!(resolution.path.ends_with("lib/index.js"));
    }

    #[test]
    fn externals_set_deduplicates() {
        let ctx = context(Target::Es2020, false);
        assert_eq!(ctx.add_externals(["react".into(), "fs".into()]), 2);
        assert_eq!(ctx.add_externals(["react".into()]), 0);
        assert_eq!(ctx.externals(), ["fs", "react"]);
    }

    #[test]
    fn indirect_requires_report_only_new_names() {
        let ctx = context(Target::Es2020, false);
        let fresh = ctx.add_indirect_requires(["fs".to_string(), "path".to_string()]);
        assert_eq!(fresh, ["fs", "path"]);
        let again = ctx.add_indirect_requires(["fs".to_string()]);
        assert!(again.is_empty());
    }
}
