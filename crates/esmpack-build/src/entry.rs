//! Entry stub synthesis: the virtual source file handed to the bundler,
//! re-exporting the requested surface of each package.

use crate::meta::ImportMetaMap;
use crate::request::PackageRef;

const EOL: &str = "\n";

/// Map an import path to a safe identifier: `/`, `-`, `@` and `.` become `_`.
pub fn identify(import_path: &str) -> String {
    import_path
        .chars()
        .map(|c| match c {
            '/' | '-' | '@' | '.' => '_',
            other => other,
        })
        .collect()
}

/// Synthesize the bundler entry for a request.
///
/// ESM entries re-export directly; CommonJS entries import the namespace and
/// default and re-bind the enumerated names. Multi-package bundles expose
/// each package under `<id>_star` / `<id>_default`.
pub fn synthesize(packages: &[PackageRef], metas: &ImportMetaMap) -> String {
    if packages.len() == 1 {
        synthesize_single(&packages[0], metas)
    } else {
        synthesize_bundle(packages, metas)
    }
}

fn synthesize_single(pkg: &PackageRef, metas: &ImportMetaMap) -> String {
    let import_path = pkg.import_path();
    let identifier = format!("__{}", identify(&import_path));
    let meta = match metas.get(&import_path) {
        Some(meta) => meta,
        None => return String::new(),
    };

    let mut has_default = false;
    let mut named = Vec::new();
    for name in &meta.exports {
        if name == "default" {
            has_default = true;
        } else if name != "import" {
            named.push(name.as_str());
        }
    }

    let mut out = String::new();
    if !meta.module.is_empty() {
        if !named.is_empty() {
            out.push_str(&format!("export * from \"{import_path}\";{EOL}"));
        }
        if has_default {
            out.push_str(&format!("export {{ default }} from \"{import_path}\";"));
        }
    } else {
        out.push_str(&format!(
            "import {identifier}_default from \"{import_path}\";{EOL}"
        ));
        if !named.is_empty() {
            out.push_str(&format!(
                "import * as {identifier}_star from \"{import_path}\";{EOL}"
            ));
            out.push_str(&format!(
                "export const {{ {} }} = {identifier}_star;{EOL}",
                named.join(",")
            ));
        }
        out.push_str(&format!("export default {identifier}_default;"));
    }
    out
}

fn synthesize_bundle(packages: &[PackageRef], metas: &ImportMetaMap) -> String {
    let mut out = String::new();
    for pkg in packages {
        let import_path = pkg.import_path();
        let identifier = identify(&import_path);
        let meta = metas.get(&import_path).cloned().unwrap_or_default();
        let has_default = meta.has_default_export();

        if !meta.module.is_empty() {
            out.push_str(&format!(
                "export * as {identifier}_star from \"{import_path}\";{EOL}"
            ));
            if has_default {
                out.push_str(&format!(
                    "export {{default as {identifier}_default}} from \"{import_path}\";"
                ));
            }
        } else if !meta.main.is_empty() {
            if has_default {
                out.push_str(&format!(
                    "import {identifier} from \"{import_path}\";{EOL}"
                ));
            } else {
                out.push_str(&format!(
                    "import * as {identifier} from \"{import_path}\";{EOL}"
                ));
            }
            out.push_str(&format!(
                "export {{{identifier} as {identifier}_default}};"
            ));
        } else {
            out.push_str(&format!("export const {identifier}_default = null;"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::ImportMeta;

    fn meta_with(module: &str, main: &str, exports: &[&str]) -> ImportMeta {
        ImportMeta {
            module: module.to_string(),
            main: main.to_string(),
            exports: exports.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn map_of(entries: Vec<(&str, ImportMeta)>) -> ImportMetaMap {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn identify_flattens_separators() {
        assert_eq!(identify("react-dom/server"), "react_dom_server");
        assert_eq!(identify("@scope/pkg"), "_scope_pkg");
        assert_eq!(identify("lit-html.js"), "lit_html_js");
    }

    #[test]
    fn single_esm_with_named_and_default() {
        let pkgs = vec![crate::request::PackageRef::new("preact", "10.5.0")];
        let metas = map_of(vec![(
            "preact",
            meta_with("dist/preact.module.js", "dist/preact.js", &["h", "render", "default"]),
        )]);
        let stub = synthesize(&pkgs, &metas);
        assert_eq!(
            stub,
            "export * from \"preact\";\nexport { default } from \"preact\";"
        );
    }

    #[test]
    fn single_esm_named_only_skips_default_line() {
        let pkgs = vec![crate::request::PackageRef::new("lodash-es", "4.17.21")];
        let metas = map_of(vec![(
            "lodash-es",
            meta_with("lodash.js", "", &["map", "filter"]),
        )]);
        let stub = synthesize(&pkgs, &metas);
        assert_eq!(stub, "export * from \"lodash-es\";\n");
    }

    #[test]
    fn single_esm_default_only_skips_star() {
        let pkgs = vec![crate::request::PackageRef::new("mod", "1.0.0")];
        let metas = map_of(vec![("mod", meta_with("index.mjs", "", &["default"]))]);
        let stub = synthesize(&pkgs, &metas);
        assert_eq!(stub, "export { default } from \"mod\";");
    }

    #[test]
    fn single_cjs_imports_default_and_star() {
        let pkgs = vec![crate::request::PackageRef::new("react", "17.0.2")];
        let metas = map_of(vec![(
            "react",
            meta_with("", "index.js", &["Children", "Component", "default"]),
        )]);
        let stub = synthesize(&pkgs, &metas);
        assert_eq!(
            stub,
            "import __react_default from \"react\";\n\
             import * as __react_star from \"react\";\n\
             export const { Children,Component } = __react_star;\n\
             export default __react_default;"
        );
    }

    #[test]
    fn single_cjs_without_named_exports() {
        let pkgs = vec![crate::request::PackageRef::new("classnames", "2.3.1")];
        let metas = map_of(vec![("classnames", meta_with("", "index.js", &[]))]);
        let stub = synthesize(&pkgs, &metas);
        assert_eq!(
            stub,
            "import __classnames_default from \"classnames\";\nexport default __classnames_default;"
        );
    }

    #[test]
    fn literal_import_name_is_excluded() {
        let pkgs = vec![crate::request::PackageRef::new("mod", "1.0.0")];
        let metas = map_of(vec![(
            "mod",
            meta_with("index.mjs", "", &["import", "default"]),
        )]);
        // `import` filtered out leaves no named exports, so no star line.
        assert_eq!(synthesize(&pkgs, &metas), "export { default } from \"mod\";");
    }

    #[test]
    fn bundle_mixes_shapes() {
        let pkgs = vec![
            crate::request::PackageRef::new("lit-html", "2.0.0"),
            crate::request::PackageRef::new("react", "17.0.2"),
            crate::request::PackageRef::new("empty-pkg", "0.0.1"),
        ];
        let metas = map_of(vec![
            ("lit-html", meta_with("lit-html.js", "", &["html", "default"])),
            ("react", meta_with("", "index.js", &["Component"])),
            ("empty-pkg", meta_with("", "", &[])),
        ]);
        let stub = synthesize(&pkgs, &metas);
        assert_eq!(
            stub,
            "export * as lit_html_star from \"lit-html\";\n\
             export {default as lit_html_default} from \"lit-html\";\
             import * as react from \"react\";\n\
             export {react as react_default};\
             export const empty_pkg_default = null;"
        );
    }

    #[test]
    fn bundle_cjs_with_default_imports_default_binding() {
        let pkgs = vec![
            crate::request::PackageRef::new("a", "1.0.0"),
            crate::request::PackageRef::new("b", "1.0.0"),
        ];
        let metas = map_of(vec![
            ("a", meta_with("", "index.js", &["default", "x"])),
            ("b", meta_with("", "index.js", &[])),
        ]);
        let stub = synthesize(&pkgs, &metas);
        assert!(stub.contains("import a from \"a\";"));
        assert!(stub.contains("export {a as a_default};"));
        assert!(stub.contains("import * as b from \"b\";"));
    }

    #[test]
    fn stub_references_only_probed_exports() {
        let pkgs = vec![crate::request::PackageRef::new("react", "17.0.2")];
        let exports = ["Children", "Component", "createElement", "default"];
        let metas = map_of(vec![("react", meta_with("", "index.js", &exports))]);
        let stub = synthesize(&pkgs, &metas);

        let destructured = stub
            .split("export const { ")
            .nth(1)
            .and_then(|rest| rest.split(" }").next())
            .unwrap();
        for name in destructured.split(',') {
            assert!(exports.contains(&name), "{name} not probed");
        }
    }
}
