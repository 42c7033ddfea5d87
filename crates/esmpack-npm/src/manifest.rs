//! package.json parsing.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{NpmError, Result};

/// Maximum allowed size for package.json files (10MB).
const MAX_MANIFEST_SIZE: u64 = 10 * 1024 * 1024;

/// Parsed package.json, reduced to the fields the build pipeline consumes.
///
/// Every field defaults to empty so that sparse manifests (common for
/// submodule `package.json` redirect files) parse without ceremony.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NpmManifest {
    pub name: String,
    pub version: String,
    pub main: String,
    pub module: String,
    #[serde(rename = "type")]
    pub module_type: String,
    pub types: String,
    pub typings: String,
    /// Conditional entry points from the `exports` field. Only top-level
    /// string conditions are kept; nested subpath maps are ignored.
    #[serde(rename = "exports", deserialize_with = "de_defined_exports")]
    pub defined_exports: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, String>,
    #[serde(rename = "peerDependencies")]
    pub peer_dependencies: BTreeMap<String, String>,
}

impl NpmManifest {
    /// Read and parse `package.json` from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let metadata = std::fs::metadata(path)?;
        if metadata.len() > MAX_MANIFEST_SIZE {
            return Err(NpmError::ProbeFailed {
                path: path.display().to_string(),
                reason: format!(
                    "package.json exceeds maximum size of {}MB",
                    MAX_MANIFEST_SIZE / 1024 / 1024
                ),
            });
        }

        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|source| NpmError::InvalidManifest {
            path: path.display().to_string(),
            source,
        })
    }

    /// Read the manifest of an installed package under `node_modules`.
    pub fn from_installed(node_modules: &Path, name: &str) -> Result<Self> {
        Self::from_file(&node_modules.join(name).join("package.json"))
    }

    /// The conditional entry declared for a condition name, or empty.
    pub fn defined_export(&self, condition: &str) -> &str {
        self.defined_exports
            .get(condition)
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// The `exports` field takes many shapes; keep only a flat map of string
/// conditions (`{"import": "./index.mjs", "require": "./index.cjs"}`). A bare
/// string is treated as the default condition.
fn de_defined_exports<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    match value {
        serde_json::Value::String(s) => {
            out.insert("default".to_string(), s);
        }
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                if let serde_json::Value::String(s) = val {
                    out.insert(key, s);
                }
            }
        }
        // Array fallbacks and other shapes carry no flat conditions.
        _ => {}
    }
    Ok(out)
}

/// Extract the base package name from an import specifier.
///
/// Scoped packages keep their scope: `@scope/pkg/sub` -> `@scope/pkg`,
/// `lodash/fp` -> `lodash`.
pub fn package_name_of(specifier: &str) -> &str {
    if specifier.is_empty() {
        return specifier;
    }
    if let Some(rest) = specifier.strip_prefix('@') {
        if let Some(first_slash) = rest.find('/') {
            let after_scope = &rest[first_slash + 1..];
            if let Some(second_slash) = after_scope.find('/') {
                return &specifier[..1 + first_slash + 1 + second_slash];
            }
        }
        return specifier;
    }
    match specifier.find('/') {
        Some(idx) => &specifier[..idx],
        None => specifier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_manifest() {
        let json = r#"{
            "name": "react-dom",
            "version": "17.0.2",
            "main": "index.js",
            "dependencies": { "loose-envify": "^1.1.0", "scheduler": "^0.20.2" },
            "peerDependencies": { "react": "17.0.2" }
        }"#;
        let m: NpmManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.name, "react-dom");
        assert_eq!(m.version, "17.0.2");
        assert_eq!(m.main, "index.js");
        assert_eq!(m.module, "");
        assert_eq!(m.peer_dependencies.get("react"), Some(&"17.0.2".to_string()));
    }

    #[test]
    fn parses_string_exports_field() {
        let json = r#"{ "name": "x", "exports": "./index.mjs" }"#;
        let m: NpmManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.defined_export("default"), "./index.mjs");
    }

    #[test]
    fn parses_conditional_exports_field() {
        let json = r#"{
            "name": "x",
            "exports": { "import": "./index.mjs", "require": "./index.cjs", "types": "./index.d.ts" }
        }"#;
        let m: NpmManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.defined_export("import"), "./index.mjs");
        assert_eq!(m.defined_export("require"), "./index.cjs");
        assert_eq!(m.defined_export("browser"), "");
    }

    #[test]
    fn ignores_nested_subpath_exports() {
        let json = r#"{
            "name": "x",
            "exports": { ".": { "import": "./index.mjs" }, "import": "./top.mjs" }
        }"#;
        let m: NpmManifest = serde_json::from_str(json).unwrap();
        assert_eq!(m.defined_export("import"), "./top.mjs");
        assert_eq!(m.defined_export("."), "");
    }

    #[test]
    fn sparse_manifest_defaults() {
        let m: NpmManifest = serde_json::from_str(r#"{ "main": "server.js" }"#).unwrap();
        assert_eq!(m.main, "server.js");
        assert!(m.name.is_empty());
        assert!(m.dependencies.is_empty());
    }

    #[test]
    fn package_name_extraction() {
        assert_eq!(package_name_of("@babel/core"), "@babel/core");
        assert_eq!(package_name_of("@babel/core/lib/index"), "@babel/core");
        assert_eq!(package_name_of("lodash"), "lodash");
        assert_eq!(package_name_of("lodash/fp"), "lodash");
        assert_eq!(package_name_of(""), "");
        assert_eq!(package_name_of("@org"), "@org");
    }
}
