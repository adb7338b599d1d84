//! Incremental build bookkeeping.
//!
//! The build orchestrator owns a [`BuildCache`] and asks it whether a source
//! needs recompiling before handing it to the code generator.

use kiln_core::SourceId;
use rustc_hash::FxHashMap;

/// Last compiled version of each source.
#[derive(Debug, Clone, Default)]
pub struct BuildCache {
    versions: FxHashMap<SourceId, u64>,
}

impl BuildCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` unless `version` of `id` was the last one recorded.
    pub fn needs_compile(&self, id: SourceId, version: u64) -> bool {
        self.versions.get(&id) != Some(&version)
    }

    /// Remember that `version` of `id` has been compiled.
    pub fn record(&mut self, id: SourceId, version: u64) {
        self.versions.insert(id, version);
    }

    /// Drop what is known about `id`. Returns the version it had.
    pub fn forget(&mut self, id: SourceId) -> Option<u64> {
        self.versions.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_recorded_version() {
        let mut cache = BuildCache::new();
        let id = SourceId::from_path("src/main.kn");

        assert!(cache.needs_compile(id, 1));
        cache.record(id, 1);
        assert!(!cache.needs_compile(id, 1));
        assert!(cache.needs_compile(id, 2));
    }

    #[test]
    fn forget_forces_recompile() {
        let mut cache = BuildCache::new();
        let id = SourceId::from_path("a.kn");
        cache.record(id, 3);
        assert_eq!(cache.forget(id), Some(3));
        assert!(cache.needs_compile(id, 3));
        assert!(cache.is_empty());
    }

    #[test]
    fn sources_are_independent() {
        let mut cache = BuildCache::new();
        let a = SourceId::from_path("a.kn");
        let b = SourceId::from_path("b.kn");
        cache.record(a, 1);
        assert!(cache.needs_compile(b, 1));
        assert_eq!(cache.len(), 1);
    }
}
