//! Build serialization.
//!
//! Identical concurrent requests must coalesce to one artifact, so each
//! BuildID gets an in-flight gate: the first arrival builds while later
//! arrivals wait, re-check the cache after acquiring the gate, and hit it.
//! Distinct BuildIDs build in parallel (each in its own temp dir); only the
//! installer span is globally serialized, since the registry client is the
//! one shared mutable resource.

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub struct BuildSerializer {
    install_gate: AsyncMutex<()>,
    in_flight: Mutex<FxHashMap<String, Arc<AsyncMutex<()>>>>,
}

impl BuildSerializer {
    pub fn new() -> Self {
        Self {
            install_gate: AsyncMutex::new(()),
            in_flight: Mutex::new(FxHashMap::default()),
        }
    }

    /// The gate for one BuildID. Callers lock it for the whole
    /// install-through-commit span.
    pub fn gate(&self, build_id: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.in_flight.lock().expect("in-flight lock");
        map.entry(build_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the gate after the build committed (or failed). Waiters already
    /// holding the Arc still serialize against each other; new arrivals see
    /// the committed artifact on lookup.
    pub fn finish(&self, build_id: &str) {
        let mut map = self.in_flight.lock().expect("in-flight lock");
        map.remove(build_id);
    }

    /// Serialize installer/filesystem-heavy work across builds.
    pub async fn installer_permit(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.install_gate.lock().await
    }
}

impl Default for BuildSerializer {
    fn default() -> Self {
        Self::new()
    }
}
