//! Shared fixtures and scripted collaborators for pipeline tests.
//!
//! No subprocess runs here: the installer materializes fixture trees, the
//! lexer answers from a table, and the engine replays a script while still
//! exercising the real resolve hook.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use esmpack_build::{BundleOutcome, BundleSpec, Bundler, OutputFile, ResolveArgs, ResolveHook};
use esmpack_npm::{CjsLexer, Installer, NpmError};

/// One package the fixture installer can materialize.
#[derive(Debug, Clone, Default)]
pub struct FixturePackage {
    /// package.json contents.
    pub manifest: String,
    /// Files under the package directory: (relative path, contents).
    pub files: Vec<(String, String)>,
}

/// Installer that writes fixture trees instead of calling the registry.
#[derive(Default)]
pub struct FixtureInstaller {
    packages: BTreeMap<String, FixturePackage>,
    pub installed: Mutex<Vec<String>>,
}

impl FixtureInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(
        mut self,
        name: &str,
        manifest: &str,
        files: &[(&str, &str)],
    ) -> Self {
        self.packages.insert(
            name.to_string(),
            FixturePackage {
                manifest: manifest.to_string(),
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
            },
        );
        self
    }

    pub fn installed_specs(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }

    fn materialize(&self, workdir: &Path, name: &str) -> Result<(), NpmError> {
        let package = self
            .packages
            .get(name)
            .ok_or_else(|| NpmError::NotFound(name.to_string()))?;
        let dir = workdir.join("node_modules").join(name);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("package.json"), &package.manifest)?;
        for (rel, contents) in &package.files {
            let path = dir.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents)?;
        }
        Ok(())
    }
}

/// `name@version` -> name, handling the scoped form.
fn spec_name(spec: &str) -> &str {
    match spec[1..].find('@') {
        Some(idx) => &spec[..idx + 1],
        None => spec,
    }
}

#[async_trait]
impl Installer for FixtureInstaller {
    async fn install(&self, workdir: &Path, specs: &[String]) -> Result<(), NpmError> {
        for spec in specs {
            self.installed.lock().unwrap().push(spec.clone());
            self.materialize(workdir, spec_name(spec))?;
        }
        Ok(())
    }

    async fn install_types(&self, workdir: &Path, spec: &str) -> Result<bool, NpmError> {
        let name = spec_name(spec);
        if self.packages.contains_key(name) {
            self.installed.lock().unwrap().push(spec.to_string());
            self.materialize(workdir, name)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Lexer answering from a fixed table.
#[derive(Default)]
pub struct StubLexer {
    exports: BTreeMap<String, Vec<String>>,
}

impl StubLexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exports(mut self, import_path: &str, names: &[&str]) -> Self {
        self.exports.insert(
            import_path.to_string(),
            names.iter().map(|s| s.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl CjsLexer for StubLexer {
    async fn exports(&self, _node_modules: &Path, import_path: &str) -> Result<Vec<String>, NpmError> {
        Ok(self.exports.get(import_path).cloned().unwrap_or_default())
    }
}

/// One scripted engine response.
pub enum EngineRound {
    /// Report these errors and no output.
    Errors(Vec<String>),
    /// Resolve `imports` through the hook, then emit `body`.
    Emit {
        /// (specifier, importer): the importer is a path under
        /// `node_modules`, or `export.js` for the synthesized entry.
        imports: Vec<(String, String)>,
        body: String,
        css: Option<String>,
    },
}

/// Engine that replays a script, one round per invocation, while driving the
/// real resolve hook for every import it encounters.
pub struct ScriptedEngine {
    rounds: Mutex<VecDeque<EngineRound>>,
    pub specs: Mutex<Vec<BundleSpec>>,
    pub calls: AtomicUsize,
    pub delay_ms: u64,
}

impl ScriptedEngine {
    pub fn new(rounds: Vec<EngineRound>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            specs: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay_ms: 0,
        }
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn first_entry_source(&self) -> String {
        self.specs.lock().unwrap()[0].entry_source.clone()
    }
}

#[async_trait]
impl Bundler for ScriptedEngine {
    async fn bundle(
        &self,
        spec: &BundleSpec,
        hook: &dyn ResolveHook,
    ) -> esmpack_build::Result<BundleOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }

        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .expect("engine script exhausted");

        match round {
            EngineRound::Errors(errors) => Ok(BundleOutcome {
                errors,
                ..Default::default()
            }),
            EngineRound::Emit { imports, body, css } => {
                let mut js = String::new();
                for (specifier, importer_rel) in imports {
                    let importer = if importer_rel == spec.entry_name {
                        spec.entry_name.clone()
                    } else {
                        spec.resolve_dir
                            .join("node_modules")
                            .join(&importer_rel)
                            .to_string_lossy()
                            .into_owned()
                    };
                    if !hook.applies_to(&specifier) {
                        continue;
                    }
                    let resolution = hook.resolve(ResolveArgs {
                        path: &specifier,
                        importer: &importer,
                    });
                    if !resolution.external {
                        js.push_str(&format!("/* inlined {} */\n", resolution.path));
                    } else if resolution.path != specifier {
                        js.push_str(&format!("import \"{}\";\n", resolution.path));
                    }
                    // An unchanged external path means the importer was CJS;
                    // the require literal in `body` stands.
                }
                js.push_str(&body);

                let mut output_files = vec![OutputFile {
                    path: "/engine/export.js".to_string(),
                    contents: js.into_bytes(),
                }];
                if let Some(css) = css {
                    output_files.push(OutputFile {
                        path: "/engine/export.css".to_string(),
                        contents: css.into_bytes(),
                    });
                }
                Ok(BundleOutcome {
                    output_files,
                    ..Default::default()
                })
            }
        }
    }
}

/// Minimal one-round engine emitting just a body.
pub fn emit_engine(body: &str) -> ScriptedEngine {
    ScriptedEngine::new(vec![EngineRound::Emit {
        imports: vec![],
        body: body.to_string(),
        css: None,
    }])
}
