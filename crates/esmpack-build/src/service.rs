//! The build service: request in, cached artifact out.

use rustc_hash::FxHashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use esmpack_npm::{CjsLexer, Installer, NodeCjsLexer, NpmManifest, ShapeProber, YarnInstaller};
use esmpack_store::ArtifactStore;

use crate::bundler::Bundler;
use crate::config::BuildConfig;
use crate::driver::{define_table, drive};
use crate::entry::synthesize;
use crate::externals::{BuildContext, SelfEntry};
use crate::fingerprint::fingerprint;
use crate::meta::{
    apply_entry_rules, apply_submodule_manifest, classify_true_peers, collect_peer_dependencies,
    discover_types, CopyDtsPublisher, DtsPublisher, ImportMeta, ImportMetaMap,
};
use crate::platform;
use crate::request::BuildRequest;
use crate::serializer::BuildSerializer;
use crate::{Error, Result};

/// A finished (or cache-served) build.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub build_id: String,
    /// Import metadata keyed by import path.
    pub import_meta: ImportMetaMap,
    pub has_css: bool,
}

/// The build pipeline and its artifact cache.
///
/// Lookups run concurrently; builds for the same BuildID coalesce behind a
/// per-fingerprint gate, and installer work is globally serialized.
pub struct BuildService {
    config: BuildConfig,
    store: Arc<ArtifactStore>,
    serializer: BuildSerializer,
    installer: Arc<dyn Installer>,
    lexer: Arc<dyn CjsLexer>,
    bundler: Arc<dyn Bundler>,
    dts: Arc<dyn DtsPublisher>,
}

impl BuildService {
    /// Open the artifact store and wire the default subprocess
    /// collaborators around the given bundling engine.
    pub fn new(config: BuildConfig, bundler: Arc<dyn Bundler>) -> Result<Self> {
        crate::logging::install(config.log_level);
        let store = Arc::new(ArtifactStore::open(
            &config.storage_dir,
            config.build_version,
        )?);
        let dts: Arc<dyn DtsPublisher> = Arc::new(CopyDtsPublisher::new(store.types_dir()));
        let installer: Arc<dyn Installer> = Arc::new(
            YarnInstaller::new().with_timeout_secs(config.install_timeout_secs),
        );
        let lexer: Arc<dyn CjsLexer> =
            Arc::new(NodeCjsLexer::new().with_timeout_secs(config.lexer_timeout_secs));
        Ok(Self {
            config,
            store,
            serializer: BuildSerializer::new(),
            installer,
            lexer,
            bundler,
            dts,
        })
    }

    pub fn with_installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = installer;
        self
    }

    pub fn with_lexer(mut self, lexer: Arc<dyn CjsLexer>) -> Self {
        self.lexer = lexer;
        self
    }

    pub fn with_dts_publisher(mut self, dts: Arc<dyn DtsPublisher>) -> Self {
        self.dts = dts;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Seed the embedded polyfill set at startup.
    pub fn seed_polyfills<'a>(
        &self,
        files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<()> {
        self.store
            .seed_polyfills(self.config.build_version, files)?;
        Ok(())
    }

    /// Build (or serve from cache) one request.
    pub async fn build(&self, request: &BuildRequest) -> Result<BuildOutcome> {
        let build_id = fingerprint(request, self.config.build_version)?;

        // Cache lookups stay outside the serializer.
        if let Some(hit) = self.lookup(&build_id)? {
            return Ok(hit);
        }

        let gate = self.serializer.gate(&build_id);
        let _guard = gate.lock().await;

        // A coalesced build may have committed while we waited.
        if let Some(hit) = self.lookup(&build_id)? {
            self.serializer.finish(&build_id);
            return Ok(hit);
        }

        let result = self.build_uncached(request, &build_id).await;
        self.serializer.finish(&build_id);
        result
    }

    fn lookup(&self, build_id: &str) -> Result<Option<BuildOutcome>> {
        let Some(stored) = self.store.lookup(build_id)? else {
            return Ok(None);
        };
        match serde_json::from_value::<ImportMetaMap>(stored.import_meta) {
            Ok(import_meta) => Ok(Some(BuildOutcome {
                build_id: build_id.to_string(),
                import_meta,
                has_css: stored.has_css,
            })),
            Err(_) => {
                // Record shape drifted; treat like any other corrupt entry.
                self.store.purge(build_id)?;
                Ok(None)
            }
        }
    }

    async fn build_uncached(&self, request: &BuildRequest, build_id: &str) -> Result<BuildOutcome> {
        // The workdir is removed on every exit path once this guard exists.
        let workdir = tempfile::Builder::new().prefix("esmpack-build-").tempdir()?;
        let node_modules = workdir.path().join("node_modules");
        let bv = self.config.build_version;

        let start = Instant::now();
        {
            let _permit = self.serializer.installer_permit().await;
            let specs: Vec<String> = request
                .packages
                .iter()
                .map(|pkg| format!("{}@{}", pkg.name, pkg.version))
                .collect();
            self.installer.install(workdir.path(), &specs).await?;
        }

        let mut metas = ImportMetaMap::default();
        for pkg in &request.packages {
            let manifest = NpmManifest::from_installed(&node_modules, &pkg.name)?;
            let mut meta: ImportMeta = manifest.into();
            apply_entry_rules(&mut meta, &pkg.submodule);
            metas.insert(pkg.import_path(), meta);
        }

        let peers = collect_peer_dependencies(&request.packages, &metas);
        let true_peers = classify_true_peers(&peers, &request.packages, &metas, &request.externals);

        {
            let _permit = self.serializer.installer_permit().await;
            let peer_specs: Vec<String> = true_peers
                .iter()
                .map(|(name, version)| format!("{name}@{version}"))
                .collect();
            self.installer.install(workdir.path(), &peer_specs).await?;

            for pkg in &request.packages {
                let Some(meta) = metas.get(&pkg.import_path()) else {
                    continue;
                };
                if meta.types.is_empty()
                    && meta.typings.is_empty()
                    && !pkg.name.starts_with('@')
                {
                    let spec = format!("@types/{}@latest", pkg.name);
                    // A registry miss here is a normal outcome.
                    self.installer.install_types(workdir.path(), &spec).await?;
                }
            }
        }
        tracing::debug!(elapsed = ?start.elapsed(), "installed {} package(s)", request.packages.len());

        self.resolve_entries(request, &node_modules, &mut metas)
            .await?;

        let start = Instant::now();
        let mut published_types = false;
        for pkg in &request.packages {
            let Some(meta) = metas.get_mut(&pkg.import_path()) else {
                continue;
            };
            if let Some(types) = discover_types(&node_modules, pkg, meta)? {
                self.dts.publish(&node_modules, &types).await?;
                meta.dts = format!("/{types}");
                published_types = true;
            }
        }
        if published_types {
            tracing::debug!(elapsed = ?start.elapsed(), "published types");
        }

        let ctx = self.build_context(request, &node_modules, &metas, &true_peers)?;

        let entry_source = synthesize(&request.packages, &metas);
        let define = define_table(&self.config.hostname, build_id, request.env());

        let start = Instant::now();
        let outcome = drive(
            self.bundler.as_ref(),
            &ctx,
            request,
            entry_source,
            workdir.path(),
            define,
        )
        .await?;
        tracing::debug!(
            elapsed = ?start.elapsed(),
            "bundled {} {} {}",
            crate::request::join_refs(&request.packages),
            request.target,
            request.env()
        );

        let js_file = outcome
            .js()
            .ok_or_else(|| Error::BundleFailed("engine produced no .js output".to_string()))?;
        let cjs_requires = ctx.take_cjs_requires();
        let js = crate::postprocess::assemble(
            &self.config.service_name,
            bv,
            request,
            &metas,
            &cjs_requires,
            &js_file.contents,
        );
        let css = outcome.css().map(|file| file.contents.clone());

        let meta_value = serde_json::to_value(&metas)?;
        self.store
            .commit(build_id, &js, css.as_deref(), meta_value)?;

        Ok(BuildOutcome {
            build_id: build_id.to_string(),
            import_meta: metas,
            has_css: css.is_some(),
        })
    }

    /// Finish entry resolution against the installed tree: submodule
    /// manifests, shape probing, export enumeration.
    async fn resolve_entries(
        &self,
        request: &BuildRequest,
        node_modules: &Path,
        metas: &mut ImportMetaMap,
    ) -> Result<()> {
        let prober = ShapeProber::new(node_modules);

        for pkg in &request.packages {
            let import_path = pkg.import_path();
            let Some(meta) = metas.get_mut(&import_path) else {
                continue;
            };
            let package_dir = node_modules.join(&meta.name);

            if !pkg.submodule.is_empty() {
                let nested_manifest = package_dir.join(&pkg.submodule).join("package.json");
                if nested_manifest.is_file() {
                    let nested = NpmManifest::from_file(&nested_manifest)?;
                    apply_submodule_manifest(meta, &pkg.submodule, &nested);
                } else {
                    let shape = prober.probe(&format!("{}/{}", meta.name, pkg.submodule))?;
                    if shape.is_esm {
                        meta.module = pkg.submodule.clone();
                        meta.exports = shape.exports;
                        continue;
                    }
                }
            }

            if !meta.module.is_empty() {
                let module_rel =
                    format!("{}/{}", meta.name, meta.module.trim_start_matches("./"));
                let shape = prober.probe(&module_rel)?;
                if shape.is_esm {
                    meta.exports = shape.exports;
                    continue;
                }
                // Declared module that probes as CommonJS: fall back.
                meta.module.clear();
            }

            meta.exports = self.lexer.exports(node_modules, &import_path).await?;
        }
        Ok(())
    }

    fn build_context(
        &self,
        request: &BuildRequest,
        node_modules: &Path,
        metas: &ImportMetaMap,
        true_peers: &std::collections::BTreeMap<String, String>,
    ) -> Result<BuildContext> {
        let self_entry = if request.packages.len() == 1 {
            let pkg = &request.packages[0];
            metas.get(&pkg.import_path()).map(|meta| SelfEntry {
                import_path: pkg.import_path(),
                package_name: meta.name.clone(),
                main: meta.main.clone(),
            })
        } else {
            None
        };

        let ctx = BuildContext::new(
            self.config.hostname.clone(),
            self.config.build_version,
            request.target,
            request.dev,
            node_modules,
            request.externals.clone(),
            self.config.polyfill_modules.iter().cloned(),
            self_entry,
        );

        // Peer versions come from the installed manifests, which carry the
        // exact resolved versions.
        let mut peer_versions = Vec::new();
        for name in true_peers.keys() {
            let manifest = NpmManifest::from_installed(node_modules, name)?;
            peer_versions.push((name.clone(), manifest.version));
        }
        ctx.set_peers(peer_versions);

        let requested: FxHashSet<&str> =
            request.packages.iter().map(|pkg| pkg.name.as_str()).collect();
        let mut externals: Vec<String> = true_peers.keys().cloned().collect();
        externals.extend(
            platform::NODE_BUILTINS
                .iter()
                .filter(|name| !requested.contains(**name))
                .map(|name| name.to_string()),
        );
        externals.extend(
            request
                .externals
                .iter()
                .filter(|m| !requested.contains(m.name.as_str()))
                .map(|m| m.name.clone()),
        );
        ctx.add_externals(externals);

        Ok(ctx)
    }
}
