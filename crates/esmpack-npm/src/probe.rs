//! Module shape probing: ESM vs CommonJS classification and export
//! enumeration by static inspection.
//!
//! ESM sources are scanned for export statements; the names they bind are
//! collected without building an AST. Relative `export * from` chains are
//! followed through the package so barrel files enumerate fully. CommonJS
//! enumeration lives in [`crate::lexer`].

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::{NpmError, Result};

/// How deep a relative `export * from` chain is followed.
const MAX_REEXPORT_DEPTH: usize = 8;

/// Classification result for one resolved entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleShape {
    /// True when the source carries ES-module syntax.
    pub is_esm: bool,
    /// Export names bound by the module, `"default"` included.
    pub exports: Vec<String>,
}

/// Probes entries inside one `node_modules` tree.
#[derive(Debug, Clone)]
pub struct ShapeProber {
    node_modules: PathBuf,
}

impl ShapeProber {
    pub fn new(node_modules: impl Into<PathBuf>) -> Self {
        Self {
            node_modules: node_modules.into(),
        }
    }

    /// Resolve a path relative to `node_modules` to an existing module file,
    /// trying the exact path, the `.js`-suffixed path, then `<path>/index.js`.
    pub fn resolve_entry(&self, rel: &str) -> Option<PathBuf> {
        let base = self.node_modules.join(rel);
        if base.is_file() {
            return Some(base);
        }
        for candidate in [
            self.node_modules.join(format!("{rel}.js")),
            self.node_modules.join(format!("{rel}.mjs")),
            base.join("index.js"),
        ] {
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Classify the entry at `rel` and enumerate its ESM exports.
    ///
    /// A non-ESM classification returns `is_esm: false` with no exports; the
    /// caller decides whether to fall back to the CommonJS lexer.
    pub fn probe(&self, rel: &str) -> Result<ModuleShape> {
        let file = self.resolve_entry(rel).ok_or_else(|| NpmError::ProbeFailed {
            path: rel.to_string(),
            reason: "entry file not found".to_string(),
        })?;
        let mut visited = HashSet::new();
        probe_file(&file, &mut visited, 0)
    }
}

/// Whether the file at `path` carries ES-module syntax. Unreadable files
/// classify as non-ESM.
pub fn is_esm_file(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(source) => scan_source(&source).is_esm,
        Err(_) => false,
    }
}

fn probe_file(file: &Path, visited: &mut HashSet<PathBuf>, depth: usize) -> Result<ModuleShape> {
    if depth > MAX_REEXPORT_DEPTH || !visited.insert(file.to_path_buf()) {
        return Ok(ModuleShape::default());
    }

    let source = std::fs::read_to_string(file)?;
    let mut shape = scan_source(&source);

    // Follow relative `export * from "./x"` so barrel entries enumerate.
    let dir = file.parent().unwrap_or(Path::new("."));
    for target in star_reexport_targets(&source) {
        let Some(resolved) = resolve_relative(dir, &target) else {
            continue;
        };
        let nested = probe_file(&resolved, visited, depth + 1)?;
        for name in nested.exports {
            if name != "default" && !shape.exports.contains(&name) {
                shape.exports.push(name);
            }
        }
    }

    Ok(shape)
}

fn resolve_relative(dir: &Path, target: &str) -> Option<PathBuf> {
    let base = dir.join(target);
    if base.is_file() {
        return Some(base);
    }
    for candidate in [
        dir.join(format!("{target}.js")),
        dir.join(format!("{target}.mjs")),
        base.join("index.js"),
    ] {
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Scan module source for ESM statements and exported names.
///
/// This is a statement-prefix scanner, not a parser: it looks at trimmed
/// lines (joining brace lists that span lines) and is intentionally lenient
/// about anything it does not recognize.
pub fn scan_source(source: &str) -> ModuleShape {
    let mut shape = ModuleShape::default();
    let mut in_block_comment = false;

    let mut lines = source.lines();
    while let Some(raw) = lines.next() {
        let mut line = raw.trim();
        if in_block_comment {
            match line.find("*/") {
                Some(idx) => {
                    line = line[idx + 2..].trim_start();
                    in_block_comment = false;
                }
                None => continue,
            }
        }
        if line.starts_with("//") {
            continue;
        }
        if let Some(idx) = line.find("/*") {
            if !line[idx..].contains("*/") {
                in_block_comment = true;
            }
            line = line[..idx].trim_end();
        }
        if line.is_empty() {
            continue;
        }

        if is_import_statement(line) {
            shape.is_esm = true;
            continue;
        }
        let Some(clause) = export_clause(line) else {
            continue;
        };
        shape.is_esm = true;

        // Brace lists may span lines; join until the list closes.
        let mut clause = clause.to_string();
        if clause.starts_with('{') && !clause.contains('}') {
            for next in lines.by_ref() {
                clause.push(' ');
                clause.push_str(next.trim());
                if clause.contains('}') {
                    break;
                }
            }
        }

        collect_export_names(&clause, &mut shape.exports);
    }

    shape.exports.dedup();
    shape
}

/// Relative targets of `export * from "..."` statements.
fn star_reexport_targets(source: &str) -> Vec<String> {
    let mut targets = Vec::new();
    for raw in source.lines() {
        let line = raw.trim();
        let Some(clause) = export_clause(line) else {
            continue;
        };
        let clause = clause.trim_start();
        // `export * as ns from` binds a single name; only the bare form fans out.
        if let Some(rest) = clause.strip_prefix('*') {
            let rest = rest.trim_start();
            if let Some(from) = rest.strip_prefix("from") {
                if let Some(spec) = string_literal(from) {
                    if spec.starts_with('.') {
                        targets.push(spec);
                    }
                }
            }
        }
    }
    targets
}

fn is_import_statement(line: &str) -> bool {
    let Some(rest) = line.strip_prefix("import") else {
        return false;
    };
    matches!(
        rest.as_bytes().first(),
        Some(b' ') | Some(b'{') | Some(b'"') | Some(b'\'') | Some(b'*') | Some(b'(')
    )
}

/// The part of an export statement after the `export` keyword, or None.
fn export_clause(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("export")?;
    match rest.as_bytes().first() {
        Some(b' ') => Some(rest.trim_start()),
        Some(b'{') | Some(b'*') => Some(rest),
        _ => None,
    }
}

fn collect_export_names(clause: &str, out: &mut Vec<String>) {
    if clause.starts_with("default") {
        push_unique(out, "default");
        return;
    }

    if let Some(rest) = clause.strip_prefix('*') {
        // `export * as ns from "..."`.
        let rest = rest.trim_start();
        if let Some(after_as) = rest.strip_prefix("as ") {
            if let Some(name) = leading_identifier(after_as) {
                push_unique(out, &name);
            }
        }
        return;
    }

    if let Some(rest) = clause.strip_prefix('{') {
        let list = match rest.find('}') {
            Some(end) => &rest[..end],
            None => rest,
        };
        for item in list.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            // `a as b` exports `b`; a bare name exports itself.
            let exported = match item.rsplit_once(" as ") {
                Some((_, alias)) => alias.trim(),
                None => item,
            };
            if let Some(name) = leading_identifier(exported) {
                push_unique(out, &name);
            }
        }
        return;
    }

    for keyword in ["const ", "let ", "var "] {
        if let Some(rest) = clause.strip_prefix(keyword) {
            if let Some(name) = leading_identifier(rest) {
                push_unique(out, &name);
            }
            return;
        }
    }

    let decl = clause
        .strip_prefix("async ")
        .unwrap_or(clause)
        .trim_start();
    for keyword in ["function", "class"] {
        if let Some(rest) = decl.strip_prefix(keyword) {
            let rest = rest.trim_start_matches('*').trim_start();
            if let Some(name) = leading_identifier(rest) {
                push_unique(out, &name);
            }
            return;
        }
    }
}

fn leading_identifier(s: &str) -> Option<String> {
    let s = s.trim_start();
    let end = s
        .find(|c: char| !c.is_alphanumeric() && c != '_' && c != '$')
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let name = &s[..end];
    if name.as_bytes()[0].is_ascii_digit() {
        return None;
    }
    Some(name.to_string())
}

fn string_literal(s: &str) -> Option<String> {
    let s = s.trim_start();
    let quote = *s.as_bytes().first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }
    let rest = &s[1..];
    let end = rest.find(quote as char)?;
    Some(rest[..end].to_string())
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}
