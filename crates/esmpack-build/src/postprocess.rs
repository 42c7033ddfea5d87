//! Bundle post-processing.
//!
//! The engine leaves renamed sentinels (`__process$`, `__Buffer$`, ...) in
//! its output; this pass prepends the matching polyfill preludes, rewires
//! `require()` calls recorded by the external resolver, and stamps the
//! banner.

use std::collections::BTreeMap;

use crate::entry::identify;
use crate::meta::ImportMetaMap;
use crate::request::{join_refs, BuildRequest};

const EOL: &str = "\n";

/// Assemble the final `.js` artifact from the engine output.
pub fn assemble(
    service_name: &str,
    bv: u32,
    request: &BuildRequest,
    metas: &ImportMetaMap,
    cjs_requires: &[(String, String)],
    js: &[u8],
) -> Vec<u8> {
    let env = request.env();
    // Dev bundles keep the preludes on separate lines; minified output runs
    // them together.
    let eol = if request.dev { EOL } else { "" };

    let mut content = String::from_utf8_lossy(js).into_owned();
    let mut out = String::new();

    out.push_str(&format!(
        "/* {service_name} - bundle({}) {} {env} */{EOL}",
        join_refs(&request.packages),
        request.target
    ));

    if request.dev {
        let mut deps = BTreeMap::new();
        for pkg in &request.packages {
            if let Some(meta) = metas.get(&pkg.import_path()) {
                for (name, version) in &meta.dependencies {
                    deps.insert(name.clone(), version.clone());
                }
            }
        }
        if !deps.is_empty() {
            out.push_str(&format!("/*{EOL} * bundled dependencies:{EOL}"));
            for (name, version) in deps {
                out.push_str(&format!(" *   - {name}: {version}{EOL}"));
            }
            out.push_str(&format!(" */{EOL}"));
        }
    }

    if content.contains("__process$") {
        out.push_str(&format!(
            "import __process$ from \"/v{bv}/_node_process.js\";{eol}__process$.env.NODE_ENV=\"{env}\";{eol}"
        ));
    }
    if content.contains("__Buffer$") {
        out.push_str(&format!(
            "import {{ Buffer as __Buffer$ }} from \"/v{bv}/_node_buffer.js\";{eol}"
        ));
    }

    for (name, url) in cjs_requires {
        // An empty URL is a signaled resolve failure; the require stays
        // dangling and throws at runtime.
        if url.is_empty() {
            continue;
        }
        let identifier = identify(name);
        out.push_str(&format!("import __{identifier}$ from \"{url}\";{eol}"));
        content = content.replace(
            &format!("require(\"{name}\")"),
            &format!("__{identifier}$"),
        );
    }

    if content.contains("__global$") {
        out.push_str(&format!(
            "if (typeof __global$ === \"undefined\") var __global$ = window;{eol}"
        ));
    }
    if content.contains("__setImmediate$$") {
        out.push_str(&format!(
            "__setImmediate$ = (cb, args) => setTimeout(cb, 0, ...args);{eol}"
        ));
    }
    if content.contains("__rResolve$") {
        out.push_str(&format!("var __rResolve$ = v => v;{eol}"));
    }

    out.push_str(&content);
    out.into_bytes()
}
