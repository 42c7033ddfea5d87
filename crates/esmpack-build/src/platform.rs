//! Static tables describing the Node/Deno platform surface: built-in module
//! names, registry-hosted browser polyfills, the deno std bridge set, and the
//! embedded polyfill modules the service seeds at startup.

/// Node built-in module names. Imports of these never bundle; they rewrite to
/// externals.
pub const NODE_BUILTINS: &[&str] = &[
    "assert",
    "async_hooks",
    "buffer",
    "child_process",
    "cluster",
    "console",
    "constants",
    "crypto",
    "dgram",
    "dns",
    "domain",
    "events",
    "fs",
    "http",
    "http2",
    "https",
    "inspector",
    "module",
    "net",
    "os",
    "path",
    "perf_hooks",
    "process",
    "punycode",
    "querystring",
    "readline",
    "repl",
    "stream",
    "string_decoder",
    "sys",
    "timers",
    "tls",
    "trace_events",
    "tty",
    "url",
    "util",
    "v8",
    "vm",
    "worker_threads",
    "zlib",
];

/// Built-ins with a registry-hosted browser shim. These resolve like a
/// regular package at `latest` rather than to a seeded polyfill file.
pub const REGISTRY_POLYFILLS: &[(&str, &str)] = &[
    ("console", "console-browserify"),
    ("constants", "constants-browserify"),
    ("crypto", "crypto-browserify"),
    ("domain", "domain-browser"),
    ("http", "stream-http"),
    ("https", "https-browserify"),
    ("os", "os-browserify"),
    ("path", "path-browserify"),
    ("punycode", "punycode"),
    ("querystring", "querystring-es3"),
    ("stream", "stream-browserify"),
    ("string_decoder", "string_decoder"),
    ("sys", "util"),
    ("timers", "timers-browserify"),
    ("tty", "tty-browserify"),
    ("url", "url"),
    ("util", "util"),
    ("vm", "vm-browserify"),
    ("zlib", "browserify-zlib"),
];

/// Built-ins bridged by deno std's node compatibility layer when targeting
/// deno.
pub const DENO_STD_NODE_MODULES: &[&str] = &[
    "assert",
    "buffer",
    "child_process",
    "console",
    "constants",
    "crypto",
    "events",
    "fs",
    "module",
    "os",
    "path",
    "process",
    "querystring",
    "stream",
    "string_decoder",
    "timers",
    "url",
    "util",
];

/// Module names covered by the embedded polyfill set seeded under
/// `builds/v<BV>/_node_<name>.js`.
pub const EMBEDDED_POLYFILL_MODULES: &[&str] = &[
    "buffer",
    "events",
    "fs",
    "module",
    "process",
    "readline",
];

/// Look up the registry-hosted shim package for a built-in, if any.
pub fn registry_polyfill(name: &str) -> Option<&'static str> {
    REGISTRY_POLYFILLS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, shim)| *shim)
}

pub fn is_node_builtin(name: &str) -> bool {
    NODE_BUILTINS.contains(&name)
}

pub fn is_deno_std_module(name: &str) -> bool {
    DENO_STD_NODE_MODULES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_consistent() {
        for (builtin, _) in REGISTRY_POLYFILLS {
            assert!(is_node_builtin(builtin), "{builtin} missing from builtins");
        }
        for name in DENO_STD_NODE_MODULES {
            assert!(is_node_builtin(name), "{name} missing from builtins");
        }
        for name in EMBEDDED_POLYFILL_MODULES {
            assert!(is_node_builtin(name), "{name} missing from builtins");
        }
    }

    #[test]
    fn registry_polyfill_lookup() {
        assert_eq!(registry_polyfill("path"), Some("path-browserify"));
        assert_eq!(registry_polyfill("fs"), None);
    }
}
