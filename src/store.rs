//! Workflow Store
//!
//! Tracks which control files are registered, where each came from, and
//! whether a merge is pending. Registration order is merge order.
//!
//! The store also owns the on-disk control-file cache: one file per
//! `(source_id, ident)` pair named `<source_id>:<ident>.xml`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::control_file::ControlFileRecord;
use crate::error::Result;

/// Ident used for add-ons that have no package name.
pub const DEFAULT_IDENT: &str = "no_package";

/// Registered control files and merge bookkeeping.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    registered: Vec<ControlFileRecord>,
    source_index: BTreeMap<PathBuf, u32>,
    dirty: bool,
    merge_generation: u64,
    cache_dir: PathBuf,
    post_install: bool,
}

impl WorkflowStore {
    /// Create an empty store caching control files under `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            registered: Vec::new(),
            source_index: BTreeMap::new(),
            dirty: false,
            merge_generation: 0,
            cache_dir: cache_dir.into(),
            post_install: false,
        }
    }

    /// Mark the store as running on an installed system. Deregistered files
    /// are then removed from the cache.
    pub fn with_post_install(mut self, post_install: bool) -> Self {
        self.post_install = post_install;
        self
    }

    /// Register a control file. A path that is already registered is left
    /// in place.
    pub fn register(&mut self, record: ControlFileRecord) {
        if self.registered.iter().any(|r| r.path == record.path) {
            debug!("Control file {} already registered", record.path.display());
            return;
        }

        info!(
            "Registering control file {} (source {})",
            record.path.display(),
            record.source_id
        );
        self.source_index.insert(record.path.clone(), record.source_id);
        self.registered.push(record);
        self.dirty = true;
    }

    /// Deregister a control file by path. Returns the removed record.
    pub fn deregister(&mut self, path: &Path) -> Option<ControlFileRecord> {
        let pos = self.registered.iter().position(|r| r.path == path)?;
        let record = self.registered.remove(pos);
        self.source_index.remove(path);
        self.dirty = true;
        info!("Deregistered control file {}", path.display());

        if self.post_install && path.starts_with(&self.cache_dir) {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove cached control file {}: {}", path.display(), e);
            }
        }

        Some(record)
    }

    /// Overwrite the whole registration list.
    ///
    /// This bypasses incremental bookkeeping: the source index is rebuilt
    /// from `records` and duplicates by path are kept as given.
    pub fn replace_all(&mut self, records: Vec<ControlFileRecord>) {
        warn!("Replacing all {} registered control files", self.registered.len());
        self.source_index = records
            .iter()
            .map(|r| (r.path.clone(), r.source_id))
            .collect();
        self.registered = records;
        self.dirty = true;
    }

    /// Registered control files in merge order
    pub fn registered(&self) -> &[ControlFileRecord] {
        &self.registered
    }

    /// Source id a path was registered under
    pub fn source_of(&self, path: &Path) -> Option<u32> {
        self.source_index.get(path).copied()
    }

    /// Returns true if registrations changed since the last merge
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of completed merge sessions
    #[inline]
    pub fn merge_generation(&self) -> u64 {
        self.merge_generation
    }

    /// Record a committed merge: clears the dirty flag and bumps the generation.
    pub(crate) fn mark_merged(&mut self) -> u64 {
        self.dirty = false;
        self.merge_generation += 1;
        self.merge_generation
    }

    /// Force the next `merge_if_dirty` to run (e.g. after a base change).
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache location for a `(source_id, ident)` pair
    pub fn cached_path(&self, source_id: u32, ident: Option<&str>) -> PathBuf {
        let ident = ident.filter(|i| !i.is_empty()).unwrap_or(DEFAULT_IDENT);
        self.cache_dir.join(format!("{}:{}.xml", source_id, ident))
    }

    /// Copy control-file content into the cache and return its path.
    pub fn store_cached(&self, source_id: u32, ident: Option<&str>, content: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)?;
        let path = self.cached_path(source_id, ident);
        fs::write(&path, content)?;
        debug!("Cached control file at {}", path.display());
        Ok(path)
    }

    /// Remove every cached control file. Returns how many were removed.
    pub fn clean_cache(&self) -> Result<usize> {
        if !self.cache_dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in fs::read_dir(&self.cache_dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "xml") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!("Removed {} cached control files", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, source_id: u32) -> ControlFileRecord {
        ControlFileRecord::new(path, source_id, format!("content of {}", path))
    }

    #[test]
    fn test_new_store_is_clean() {
        let store = WorkflowStore::new("/tmp/cache");
        assert!(!store.is_dirty());
        assert!(store.registered().is_empty());
        assert_eq!(store.merge_generation(), 0);
    }

    #[test]
    fn test_register_marks_dirty_and_indexes_source() {
        let mut store = WorkflowStore::new("/tmp/cache");
        store.register(record("/a.xml", 4));

        assert!(store.is_dirty());
        assert_eq!(store.source_of(Path::new("/a.xml")), Some(4));
        assert_eq!(store.registered().len(), 1);
    }

    #[test]
    fn test_register_same_path_once() {
        let mut store = WorkflowStore::new("/tmp/cache");
        store.register(record("/a.xml", 1));
        store.register(record("/a.xml", 2));

        assert_eq!(store.registered().len(), 1);
        assert_eq!(store.source_of(Path::new("/a.xml")), Some(1));
    }

    #[test]
    fn test_registration_order_is_kept() {
        let mut store = WorkflowStore::new("/tmp/cache");
        store.register(record("/b.xml", 0));
        store.register(record("/a.xml", 0));
        let paths: Vec<&Path> = store.registered().iter().map(|r| r.path.as_path()).collect();
        assert_eq!(paths, [Path::new("/b.xml"), Path::new("/a.xml")]);
    }

    #[test]
    fn test_deregister() {
        let mut store = WorkflowStore::new("/tmp/cache");
        store.register(record("/a.xml", 1));
        store.mark_merged();
        assert!(!store.is_dirty());

        let removed = store.deregister(Path::new("/a.xml"));
        assert!(removed.is_some());
        assert!(store.is_dirty());
        assert_eq!(store.source_of(Path::new("/a.xml")), None);
        assert!(store.deregister(Path::new("/a.xml")).is_none());
    }

    #[test]
    fn test_replace_all_rebuilds_index() {
        let mut store = WorkflowStore::new("/tmp/cache");
        store.register(record("/a.xml", 1));
        store.replace_all(vec![record("/b.xml", 2), record("/c.xml", 3)]);

        assert_eq!(store.source_of(Path::new("/a.xml")), None);
        assert_eq!(store.source_of(Path::new("/c.xml")), Some(3));
        assert_eq!(store.registered().len(), 2);
    }

    #[test]
    fn test_mark_merged_bumps_generation() {
        let mut store = WorkflowStore::new("/tmp/cache");
        store.register(record("/a.xml", 1));
        assert_eq!(store.mark_merged(), 1);
        assert_eq!(store.mark_merged(), 2);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_cached_path_naming() {
        let store = WorkflowStore::new("/var/cache/wizflow");
        assert_eq!(
            store.cached_path(7, Some("sle-ha-release")),
            PathBuf::from("/var/cache/wizflow/7:sle-ha-release.xml")
        );
        assert_eq!(
            store.cached_path(7, None),
            PathBuf::from("/var/cache/wizflow/7:no_package.xml")
        );
    }

    #[test]
    fn test_post_install_deregister_removes_cached_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = WorkflowStore::new(dir.path()).with_post_install(true);
        let path = store.store_cached(2, Some("addon"), b"{}").expect("cache");
        store.register(ControlFileRecord::new(&path, 2, "{}"));

        store.deregister(&path);
        assert!(!path.exists());
    }

    #[test]
    fn test_deregister_keeps_cached_copy_during_installation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = WorkflowStore::new(dir.path());
        let path = store.store_cached(2, None, b"{}").expect("cache");
        store.register(ControlFileRecord::new(&path, 2, "{}"));

        store.deregister(&path);
        assert!(path.exists());
    }

    #[test]
    fn test_clean_cache() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = WorkflowStore::new(dir.path().join("cache"));
        assert_eq!(store.clean_cache().expect("clean"), 0);

        store.store_cached(1, Some("a"), b"a").expect("cache");
        store.store_cached(2, Some("b"), b"b").expect("cache");
        assert_eq!(store.clean_cache().expect("clean"), 2);
        assert!(!store.cached_path(1, Some("a")).exists());
    }
}
