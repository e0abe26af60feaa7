//! Per-path memoization of artifact loads

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clusters::ClusterAssignment;
use crate::data::{load_cluster_export, load_rfm_export, TransactionStore};
use crate::scoring::RfmScoredRecord;

/// Memoizes one load per path. Entries stay until [`LoadCache::clear`];
/// there is no other invalidation.
#[derive(Debug)]
pub struct LoadCache<T> {
    entries: HashMap<PathBuf, Arc<T>>,
    /// Successful loads per path, kept across `clear`
    loads: HashMap<PathBuf, usize>,
}

impl<T> Default for LoadCache<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            loads: HashMap::new(),
        }
    }
}

impl<T> LoadCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `path`, loading it on first use.
    /// Failed loads are not cached.
    pub fn get_or_load<F>(&mut self, path: &Path, load: F) -> crate::Result<Arc<T>>
    where
        F: FnOnce(&Path) -> crate::Result<T>,
    {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if let Some(hit) = self.entries.get(&key) {
            debug!(path = %key.display(), "artifact cache hit");
            return Ok(Arc::clone(hit));
        }

        let value = Arc::new(load(path)?);
        let count = self.loads.entry(key.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            warn!(path = %key.display(), loads = *count, "artifact loaded again after reload");
        } else {
            info!(path = %key.display(), "artifact loaded");
        }
        self.entries.insert(key, Arc::clone(&value));
        Ok(value)
    }

    /// How many times `path` has been read from disk by this cache
    pub fn load_count(&self, path: &Path) -> usize {
        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.loads.get(&key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Cached loaders for the three backing artifacts of a session
#[derive(Debug, Default)]
pub struct ArtifactCatalog {
    transactions: LoadCache<TransactionStore>,
    rfm: LoadCache<Vec<RfmScoredRecord>>,
    clusters: LoadCache<Vec<ClusterAssignment>>,
}

impl ArtifactCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transactions(&mut self, path: &Path) -> crate::Result<Arc<TransactionStore>> {
        self.transactions.get_or_load(path, |p| TransactionStore::load(p))
    }

    pub fn rfm_export(&mut self, path: &Path) -> crate::Result<Arc<Vec<RfmScoredRecord>>> {
        self.rfm.get_or_load(path, |p| load_rfm_export(p))
    }

    pub fn cluster_export(&mut self, path: &Path) -> crate::Result<Arc<Vec<ClusterAssignment>>> {
        self.clusters.get_or_load(path, |p| load_cluster_export(p))
    }

    /// Drop every cached artifact; the next access reloads from disk
    pub fn reload(&mut self) {
        self.transactions.clear();
        self.rfm.clear();
        self.clusters.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_loads_once_per_path() {
        let calls = Cell::new(0);
        let mut cache: LoadCache<u32> = LoadCache::new();
        let path = Path::new("/tmp/does-not-matter.csv");

        let loader = |_: &Path| {
            calls.set(calls.get() + 1);
            Ok(7)
        };
        let first = cache.get_or_load(path, loader).unwrap();
        let second = cache.get_or_load(path, loader).unwrap();

        assert_eq!(*first, 7);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.get(), 1);

        cache.clear();
        cache.get_or_load(path, loader).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.load_count(path), 2);
    }

    #[test]
    fn test_failed_load_not_cached() {
        let mut cache: LoadCache<u32> = LoadCache::new();
        let path = Path::new("/tmp/failing.csv");

        let result = cache.get_or_load(path, |_| Err(crate::Error::Config("boom".to_string())));
        assert!(result.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.load_count(path), 0);
    }

    #[test]
    fn test_catalog_surfaces_missing_artifact() {
        let mut catalog = ArtifactCatalog::new();
        assert!(catalog.transactions(Path::new("/nonexistent/data.csv")).is_err());
        assert!(catalog.cluster_export(Path::new("/nonexistent/gmm.csv")).is_err());
    }
}
