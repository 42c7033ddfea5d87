//! Persistent artifact store for esmpack builds.
//!
//! A build's identity is its BuildID. For each BuildID the store keeps a
//! record in a redb key/value database plus on-disk sidecars:
//!
//! ```text
//! <root>/esmpack.redb                      record: { importMeta, css }
//! <root>/builds/<BuildID>.js               bundle sidecar
//! <root>/builds/<BuildID>.css              stylesheet sidecar (optional)
//! <root>/builds/v<BV>/_<name>              seeded polyfill modules
//! <root>/types/v<BV>/...                   published type declaration trees
//! ```
//!
//! A record is authoritative only while its `.js` sidecar exists. Commits
//! write the sidecars before the record, so a crash between the two leaves a
//! record-less sidecar (harmlessly overwritten on rebuild) rather than a
//! record pointing at nothing. Lookups purge any record whose JSON no longer
//! decodes or whose `.js` sidecar is gone, and report a miss; the caller
//! rebuilds.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

/// Build records: BuildID -> serialized [`BuildRecord`].
const BUILDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("builds");

/// Errors raised by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store database error: {0}")]
    Database(String),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The persisted per-build record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BuildRecord {
    #[serde(rename = "importMeta")]
    import_meta: serde_json::Value,
    css: bool,
}

/// A committed artifact as seen by lookup.
#[derive(Debug, Clone)]
pub struct StoredBuild {
    /// The import-meta map, exactly as committed. The caller owns its shape.
    pub import_meta: serde_json::Value,
    pub has_css: bool,
}

/// Disk-backed artifact store.
pub struct ArtifactStore {
    db: Database,
    builds_dir: PathBuf,
    types_dir: PathBuf,
}

impl ArtifactStore {
    /// Open or create a store rooted at `root` for build version `bv`.
    ///
    /// Creates the root, `builds/v<bv>` and `types/v<bv>` directories and the
    /// database file if missing.
    pub fn open(root: &Path, bv: u32) -> Result<Self> {
        let builds_dir = root.join("builds");
        let types_dir = root.join("types").join(format!("v{bv}"));
        std::fs::create_dir_all(builds_dir.join(format!("v{bv}")))?;
        std::fs::create_dir_all(&types_dir)?;

        let db = Database::create(root.join("esmpack.redb"))?;
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(BUILDS_TABLE)?;
        }
        write_txn.commit()?;

        Ok(Self {
            db,
            builds_dir,
            types_dir,
        })
    }

    /// Path of the `.js` sidecar for a BuildID.
    pub fn js_path(&self, build_id: &str) -> PathBuf {
        self.builds_dir.join(format!("{build_id}.js"))
    }

    /// Path of the `.css` sidecar for a BuildID.
    pub fn css_path(&self, build_id: &str) -> PathBuf {
        self.builds_dir.join(format!("{build_id}.css"))
    }

    /// Directory receiving published `.d.ts` trees.
    pub fn types_dir(&self) -> &Path {
        &self.types_dir
    }

    /// Look up a committed build.
    ///
    /// Corrupt entries (undecodable record, missing `.js` sidecar) are purged
    /// and reported as a miss.
    pub fn lookup(&self, build_id: &str) -> Result<Option<StoredBuild>> {
        let record = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(BUILDS_TABLE)?;
            match table.get(build_id)? {
                Some(value) => serde_json::from_slice::<BuildRecord>(value.value()).ok(),
                None => return Ok(None),
            }
        };

        let Some(record) = record else {
            tracing::warn!(build_id, "purging undecodable build record");
            self.purge(build_id)?;
            return Ok(None);
        };

        if !self.js_path(build_id).is_file() {
            tracing::warn!(build_id, "purging build record with missing sidecar");
            self.purge(build_id)?;
            return Ok(None);
        }

        let has_css = record.css && self.css_path(build_id).is_file();
        Ok(Some(StoredBuild {
            import_meta: record.import_meta,
            has_css,
        }))
    }

    /// Commit a built artifact: sidecars first, then the record.
    pub fn commit(
        &self,
        build_id: &str,
        js: &[u8],
        css: Option<&[u8]>,
        import_meta: serde_json::Value,
    ) -> Result<()> {
        let js_path = self.js_path(build_id);
        if let Some(parent) = js_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&js_path, js)?;
        if let Some(css) = css {
            std::fs::write(self.css_path(build_id), css)?;
        }

        let record = BuildRecord {
            import_meta,
            css: css.is_some(),
        };
        let bytes = serde_json::to_vec(&record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(BUILDS_TABLE)?;
            table.insert(build_id, bytes.as_slice())?;
        }
        write_txn.commit()?;

        Ok(())
    }

    /// Remove a build record. Sidecars are left behind; a rebuild overwrites
    /// them.
    pub fn purge(&self, build_id: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(BUILDS_TABLE)?;
            table.remove(build_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Whether a record exists for the BuildID, without sidecar validation.
    pub fn contains(&self, build_id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BUILDS_TABLE)?;
        Ok(table.get(build_id)?.is_some())
    }

    /// Seed the embedded polyfill set into `builds/v<bv>/_<name>`, writing
    /// only files that are not already present.
    pub fn seed_polyfills<'a>(
        &self,
        bv: u32,
        files: impl IntoIterator<Item = (&'a str, &'a [u8])>,
    ) -> Result<()> {
        let dir = self.builds_dir.join(format!("v{bv}"));
        std::fs::create_dir_all(&dir)?;
        for (name, contents) in files {
            let path = dir.join(format!("_{name}"));
            if !path.is_file() {
                std::fs::write(&path, contents)?;
                tracing::debug!(name, "polyfill seeded");
            }
        }
        Ok(())
    }
}
