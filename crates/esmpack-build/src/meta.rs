//! Import metadata: the per-package record the pipeline computes and the
//! cache persists, plus the manifest-derived resolution rules.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use esmpack_npm::NpmManifest;

use crate::request::PackageRef;
use crate::{Error, Result};

/// Per-package record carrying the manifest fields consumed downstream plus
/// the computed export list and published types path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ImportMeta {
    pub name: String,
    pub version: String,
    pub main: String,
    pub module: String,
    #[serde(rename = "type")]
    pub module_type: String,
    pub types: String,
    pub typings: String,
    #[serde(rename = "definedExports")]
    pub defined_exports: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, String>,
    #[serde(rename = "peerDependencies")]
    pub peer_dependencies: BTreeMap<String, String>,
    /// Export names enumerated by the shape prober.
    pub exports: Vec<String>,
    /// URL path of the root `.d.ts`, or empty when the package ships none.
    pub dts: String,
}

impl From<NpmManifest> for ImportMeta {
    fn from(manifest: NpmManifest) -> Self {
        Self {
            name: manifest.name,
            version: manifest.version,
            main: manifest.main,
            module: manifest.module,
            module_type: manifest.module_type,
            types: manifest.types,
            typings: manifest.typings,
            defined_exports: manifest.defined_exports,
            dependencies: manifest.dependencies,
            peer_dependencies: manifest.peer_dependencies,
            exports: Vec::new(),
            dts: String::new(),
        }
    }
}

impl ImportMeta {
    /// Whether the enumerated exports include `default`.
    pub fn has_default_export(&self) -> bool {
        self.exports.iter().any(|name| name == "default")
    }

    fn declared_types(&self) -> &str {
        if !self.types.is_empty() {
            &self.types
        } else {
            &self.typings
        }
    }
}

/// The import-meta map keyed by import path, in request order.
pub type ImportMetaMap = FxHashMap<String, ImportMeta>;

/// Apply the manifest entry rules, in order: `type: "module"` promotes `main`
/// to `module`, a declared `exports.import` fills a still-empty `module`, and
/// a requested submodule replaces `main` and clears the root-level entries.
pub fn apply_entry_rules(meta: &mut ImportMeta, submodule: &str) {
    if meta.module.is_empty() && meta.module_type == "module" {
        meta.module = meta.main.clone();
    }
    if meta.module.is_empty() {
        let import_entry = meta
            .defined_exports
            .get("import")
            .cloned()
            .unwrap_or_default();
        if !import_entry.is_empty() {
            meta.module = import_entry;
        }
    }
    if !submodule.is_empty() {
        meta.main = submodule.to_string();
        meta.module.clear();
        meta.types.clear();
        meta.typings.clear();
    }
}

/// Re-derive entries from a submodule's own `package.json`, prefixing each
/// with the submodule path.
pub fn apply_submodule_manifest(meta: &mut ImportMeta, submodule: &str, nested: &NpmManifest) {
    if !nested.main.is_empty() {
        meta.main = join_rel(submodule, &nested.main);
    }
    if !nested.module.is_empty() {
        meta.module = join_rel(submodule, &nested.module);
    } else if meta.module_type == "module" && !nested.main.is_empty() {
        meta.module = join_rel(submodule, &nested.main);
    }
    if !nested.types.is_empty() {
        meta.types = join_rel(submodule, &nested.types);
    }
    if !nested.typings.is_empty() {
        meta.typings = join_rel(submodule, &nested.typings);
    }
}

/// Collect the peer dependency map across all requested packages.
///
/// `react-dom` pins its `react` peer to its own resolved version so the pair
/// never drifts apart.
pub fn collect_peer_dependencies(
    packages: &[PackageRef],
    metas: &ImportMetaMap,
) -> BTreeMap<String, String> {
    let mut peers = BTreeMap::new();
    for pkg in packages {
        let Some(meta) = metas.get(&pkg.import_path()) else {
            continue;
        };
        for (name, version) in &meta.peer_dependencies {
            let version = if name == "react" && meta.name == "react-dom" {
                meta.version.clone()
            } else {
                version.clone()
            };
            peers.insert(name.clone(), version);
        }
    }
    peers
}

/// Reduce the peer map to true peers: names supplied neither by the request
/// itself nor by any requested package's dependencies. External overrides
/// replace the declared version.
pub fn classify_true_peers(
    peers: &BTreeMap<String, String>,
    packages: &[PackageRef],
    metas: &ImportMetaMap,
    externals: &[PackageRef],
) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    'peer: for (name, version) in peers {
        for pkg in packages {
            if &pkg.name == name {
                continue 'peer;
            }
        }
        for meta in metas.values() {
            if meta.dependencies.contains_key(name) {
                continue 'peer;
            }
        }
        let version = externals
            .iter()
            .find(|m| &m.name == name)
            .map(|m| m.version.clone())
            .unwrap_or_else(|| version.clone());
        out.insert(name.clone(), version);
    }
    out
}

/// Discover the package's type declarations, returning the public types path
/// (`<name>@<version>/<path>.d.ts`) or None.
///
/// Order: declared `types`/`typings`, root `index.d.ts`, the sibling
/// `@types/<name>` package (scoped names skipped), then submodule-local
/// candidates and their `@types` mirrors.
pub fn discover_types(
    node_modules: &Path,
    pkg: &PackageRef,
    meta: &ImportMeta,
) -> Result<Option<String>> {
    let nv = format!("{}@{}", meta.name, meta.version);

    if !meta.declared_types().is_empty() {
        return Ok(Some(declared_types_path(meta)));
    }

    if pkg.submodule.is_empty() {
        if node_modules.join(&pkg.name).join("index.d.ts").is_file() {
            return Ok(Some(format!("{nv}/index.d.ts")));
        }
        if !pkg.name.starts_with('@') {
            let manifest_path = node_modules
                .join("@types")
                .join(&pkg.name)
                .join("package.json");
            if manifest_path.is_file() {
                let info = NpmManifest::from_file(&manifest_path).map_err(Error::from)?;
                return Ok(Some(manifest_types_path(&info)));
            }
        }
        return Ok(None);
    }

    let sub_dts = ensure_ext(&pkg.submodule, ".d.ts");
    let candidates = [
        (
            node_modules
                .join(&pkg.name)
                .join(&pkg.submodule)
                .join("index.d.ts"),
            format!("{nv}/{}/index.d.ts", pkg.submodule),
        ),
        (
            node_modules.join(&pkg.name).join(&sub_dts),
            format!("{nv}/{sub_dts}"),
        ),
        (
            node_modules
                .join("@types")
                .join(&pkg.name)
                .join(&pkg.submodule)
                .join("index.d.ts"),
            format!("@types/{nv}/{}/index.d.ts", pkg.submodule),
        ),
        (
            node_modules.join("@types").join(&pkg.name).join(&sub_dts),
            format!("@types/{nv}/{sub_dts}"),
        ),
    ];
    for (file, public) in candidates {
        if file.is_file() {
            return Ok(Some(public));
        }
    }
    Ok(None)
}

fn declared_types_path(meta: &ImportMeta) -> String {
    let types = meta.declared_types();
    format!(
        "{}@{}/{}",
        meta.name,
        meta.version,
        ensure_ext(types.trim_start_matches("./"), ".d.ts")
    )
}

fn manifest_types_path(manifest: &NpmManifest) -> String {
    let types = if !manifest.types.is_empty() {
        manifest.types.clone()
    } else if !manifest.typings.is_empty() {
        manifest.typings.clone()
    } else if !manifest.main.is_empty() {
        manifest.main.trim_end_matches(".js").to_string()
    } else {
        "index.d.ts".to_string()
    };
    format!(
        "{}@{}/{}",
        manifest.name,
        manifest.version,
        ensure_ext(types.trim_start_matches("./"), ".d.ts")
    )
}

/// Copies discovered `.d.ts` trees into the public types directory. Import
/// rewriting inside the tree is a separate concern behind this seam.
#[async_trait]
pub trait DtsPublisher: Send + Sync {
    /// Publish the tree backing `types` (a `<name>@<version>/<path>` public
    /// path) from the given `node_modules`.
    async fn publish(&self, node_modules: &Path, types: &str) -> Result<()>;
}

/// Publisher that copies every `.d.ts` under the package into
/// `<types_dir>/<name>@<version>/`, preserving structure.
pub struct CopyDtsPublisher {
    types_dir: PathBuf,
}

impl CopyDtsPublisher {
    pub fn new(types_dir: impl Into<PathBuf>) -> Self {
        Self {
            types_dir: types_dir.into(),
        }
    }
}

#[async_trait]
impl DtsPublisher for CopyDtsPublisher {
    async fn publish(&self, node_modules: &Path, types: &str) -> Result<()> {
        let (pkg_name, versioned_root) = split_types_root(types)
            .ok_or_else(|| Error::ProbeFailed(format!("malformed types path: {types}")))?;
        let src_root = node_modules.join(pkg_name);
        let dest_root = self.types_dir.join(versioned_root);
        copy_dts_tree(&src_root, &dest_root)?;
        Ok(())
    }
}

/// Split a public types path into the package directory name and the
/// versioned destination root: `@types/react@17.0.2/index.d.ts` ->
/// (`@types/react`, `@types/react@17.0.2`).
fn split_types_root(types: &str) -> Option<(&str, &str)> {
    let at = if let Some(rest) = types.strip_prefix('@') {
        // Scoped: the version separator is the second `@`.
        1 + rest.find('@')?
    } else {
        types.find('@')?
    };
    let name = &types[..at];
    let end = types[at..].find('/').map(|i| at + i).unwrap_or(types.len());
    Some((name, &types[..end]))
}

fn copy_dts_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    if !src.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            copy_dts_tree(&path, &dest.join(entry.file_name()))?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".d.ts"))
        {
            std::fs::create_dir_all(dest)?;
            std::fs::copy(&path, dest.join(entry.file_name()))?;
        }
    }
    Ok(())
}

fn ensure_ext(path: &str, ext: &str) -> String {
    if path.ends_with(ext) {
        path.to_string()
    } else {
        format!("{path}{ext}")
    }
}

fn join_rel(base: &str, rel: &str) -> String {
    let rel = rel.trim_start_matches("./");
    format!("{base}/{rel}")
}
