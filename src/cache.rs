//! Fingerprint → run directory map
//!
//! The whole map is one JSON blob guarded by a reader/writer file lock.
//! Reads take the shared lock; every mutation re-reads, edits and writes the
//! map while holding the exclusive lock, so concurrent mutations are
//! linearized and readers never see a partial map.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fingerprint::{Fingerprint, Fingerprintable};
use crate::lock::{LockGuard, RwFileLock};
use crate::logging::{operations, status};
use crate::metadata::MetadataStore;
use crate::project::Project;
use crate::storage::{read_json, write_json_atomic};

/// Value stored for each fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Run directory, relative to the project root
    pub dir: String,
    pub complete: bool,
}

type Hashmap = BTreeMap<Fingerprint, CacheEntry>;

#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    runs_dir: String,
    path: PathBuf,
    lock: RwFileLock,
    metadata: MetadataStore,
}

impl CacheStore {
    /// Open the stores under the project's marker directory
    pub fn open(project: &Project) -> Result<Self> {
        let exp = project.exp_path();
        let metadata = MetadataStore::open(&exp, "metadata")?;

        let store = Self {
            root: project.root().to_path_buf(),
            runs_dir: project.config().runs.dir.clone(),
            path: exp.join("hashmap.json"),
            lock: RwFileLock::new(&exp, "hashmap"),
            metadata,
        };

        let guard = store.lock.write()?;
        if !store.path.exists() {
            write_json_atomic(&store.path, &Hashmap::new(), false)?;
            debug!(path = %store.path.display(), "hashmap initialized");
        }
        guard.release()?;

        Ok(store)
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    pub fn exists<K: Fingerprintable + ?Sized>(&self, key: &K) -> Result<bool> {
        Ok(self.entry(key)?.is_some())
    }

    pub fn is_complete<K: Fingerprintable + ?Sized>(&self, key: &K) -> Result<bool> {
        Ok(self.entry(key)?.is_some_and(|entry| entry.complete))
    }

    /// Absolute run directory for `key`
    pub fn get_dir<K: Fingerprintable + ?Sized>(&self, key: &K) -> Result<PathBuf> {
        let fingerprint = key.fingerprint();
        match self.load()?.remove(&fingerprint) {
            Some(entry) => Ok(self.resolve(&entry)),
            None => Err(Error::NotFound {
                fingerprint: fingerprint.to_string(),
            }),
        }
    }

    pub fn entry<K: Fingerprintable + ?Sized>(&self, key: &K) -> Result<Option<CacheEntry>> {
        Ok(self.load()?.remove(&key.fingerprint()))
    }

    /// All entries, ordered by fingerprint
    pub fn entries(&self) -> Result<Vec<(Fingerprint, CacheEntry)>> {
        Ok(self.load()?.into_iter().collect())
    }

    /// Allocate a fresh run directory for `key` and record it as incomplete
    pub fn assign_dir<K: Fingerprintable + ?Sized>(&self, key: &K) -> Result<PathBuf> {
        let fingerprint = key.fingerprint();
        let (mut hashmap, guard) = self.load_and_lock()?;

        if let Some(previous) = hashmap.get(&fingerprint) {
            warn!(
                fingerprint = %fingerprint,
                previous = %previous.dir,
                "reassigning fingerprint to a new directory"
            );
        }

        let entry = self.allocate()?;
        let dir = self.resolve(&entry);
        hashmap.insert(fingerprint.clone(), entry);
        self.save_and_release(&hashmap, guard)?;

        info!(
            operation = operations::ASSIGN,
            fingerprint = %fingerprint,
            dir = %dir.display(),
            "run directory assigned"
        );
        Ok(dir)
    }

    /// Existing directory for `key`, or a freshly assigned one.
    ///
    /// Lookup and allocation happen under one exclusive lock. The flag is
    /// true when a new directory was allocated.
    pub fn get_or_assign_dir<K: Fingerprintable + ?Sized>(&self, key: &K) -> Result<(PathBuf, bool)> {
        let fingerprint = key.fingerprint();
        let (mut hashmap, guard) = self.load_and_lock()?;

        if let Some(entry) = hashmap.get(&fingerprint) {
            let dir = self.resolve(entry);
            guard.release()?;
            return Ok((dir, false));
        }

        let entry = self.allocate()?;
        let dir = self.resolve(&entry);
        hashmap.insert(fingerprint.clone(), entry);
        self.save_and_release(&hashmap, guard)?;

        info!(
            operation = operations::ASSIGN,
            fingerprint = %fingerprint,
            dir = %dir.display(),
            "run directory assigned"
        );
        Ok((dir, true))
    }

    /// Mark `key` complete, along with every alias sharing its directory.
    /// A missing entry is an error.
    pub fn set_complete<K: Fingerprintable + ?Sized>(&self, key: &K) -> Result<()> {
        let fingerprint = key.fingerprint();
        let (mut hashmap, guard) = self.load_and_lock()?;

        let Some(dir) = hashmap.get(&fingerprint).map(|entry| entry.dir.clone()) else {
            drop(guard);
            return Err(Error::NotFound {
                fingerprint: fingerprint.to_string(),
            });
        };
        for entry in hashmap.values_mut().filter(|entry| entry.dir == dir) {
            entry.complete = true;
        }
        self.save_and_release(&hashmap, guard)?;

        info!(
            operation = operations::COMPLETE,
            status = status::SUCCESS,
            fingerprint = %fingerprint,
            "run marked complete"
        );
        Ok(())
    }

    /// Make `new` resolve to the entry currently held by `old`.
    ///
    /// Fails with `NotFound` if `old` is unknown and with `AliasConflict` if
    /// `new` already owns a different directory.
    pub fn merge_hashes<N, O>(&self, new: &N, old: &O) -> Result<()>
    where
        N: Fingerprintable + ?Sized,
        O: Fingerprintable + ?Sized,
    {
        let new = new.fingerprint();
        let old = old.fingerprint();
        if new == old {
            return Ok(());
        }

        let (mut hashmap, guard) = self.load_and_lock()?;

        let Some(target) = hashmap.get(&old).cloned() else {
            drop(guard);
            return Err(Error::NotFound {
                fingerprint: old.to_string(),
            });
        };

        if let Some(existing) = hashmap.get(&new) {
            if existing.dir != target.dir {
                let err = Error::AliasConflict {
                    new: new.to_string(),
                    existing: existing.dir.clone(),
                    target: target.dir.clone(),
                };
                drop(guard);
                return Err(err);
            }
        }

        hashmap.insert(new.clone(), target.clone());
        self.save_and_release(&hashmap, guard)?;

        info!(
            operation = operations::MERGE,
            fingerprint = %new,
            target = %old,
            dir = %target.dir,
            "fingerprint aliased"
        );
        Ok(())
    }

    fn allocate(&self) -> Result<CacheEntry> {
        let id = self.metadata.next_id()?;
        Ok(CacheEntry {
            dir: format!("{}/{}", self.runs_dir, id),
            complete: false,
        })
    }

    fn resolve(&self, entry: &CacheEntry) -> PathBuf {
        let relative = Path::new(&entry.dir);
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.root.join(relative)
        }
    }

    fn load(&self) -> Result<Hashmap> {
        let guard = self.lock.read()?;
        let hashmap = read_json(&self.path)?;
        guard.release()?;
        Ok(hashmap)
    }

    /// Read the map and keep the exclusive lock until `save_and_release`
    fn load_and_lock(&self) -> Result<(Hashmap, LockGuard)> {
        let guard = self.lock.write()?;
        let hashmap = read_json(&self.path)?;
        Ok((hashmap, guard))
    }

    fn save_and_release(&self, hashmap: &Hashmap, guard: LockGuard) -> Result<()> {
        write_json_atomic(&self.path, hashmap, false)?;
        guard.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Params;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CacheStore) {
        let temp = TempDir::new().unwrap();
        let project = Project::init(temp.path()).unwrap();
        let cache = CacheStore::open(&project).unwrap();
        (temp, cache)
    }

    fn params(value: serde_json::Value) -> Params {
        Params::from_value(value).unwrap()
    }

    #[test]
    fn test_open_creates_files() {
        let (temp, _cache) = setup();
        let exp = temp.path().join(".exp");
        assert!(exp.join("hashmap.json").exists());
        assert!(exp.join(".hashmap.lock").exists());
        assert!(exp.join("metadata.json").exists());
    }

    #[test]
    fn test_missing_fingerprint() {
        let (_temp, cache) = setup();
        let args = params(json!({"a": 0}));

        assert!(!cache.exists(&args).unwrap());
        assert!(!cache.is_complete(&args).unwrap());
        assert!(matches!(
            cache.get_dir(&args).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn test_assign_then_lookup_is_idempotent() {
        let (temp, cache) = setup();
        let args = params(json!({"a": 0}));

        let dir = cache.assign_dir(&args).unwrap();
        assert_eq!(dir, temp.path().join("runs").join("0"));

        assert!(cache.exists(&args).unwrap());
        assert_eq!(cache.get_dir(&args).unwrap(), dir);
        assert_eq!(cache.get_dir(&args).unwrap(), dir);
        assert_eq!(cache.metadata().peek().unwrap(), 1);
    }

    #[test]
    fn test_lookup_by_fingerprint_string() {
        let (_temp, cache) = setup();
        let args = params(json!({"a": 0}));
        let dir = cache.assign_dir(&args).unwrap();

        let fp = args.fingerprint();
        assert_eq!(cache.get_dir(fp.as_str()).unwrap(), dir);
        assert_eq!(cache.get_dir(&fp).unwrap(), dir);
    }

    #[test]
    fn test_get_or_assign_reuses_entry() {
        let (_temp, cache) = setup();
        let args = params(json!({"a": 0}));

        let (first, created) = cache.get_or_assign_dir(&args).unwrap();
        assert!(created);
        let (second, created) = cache.get_or_assign_dir(&args).unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(cache.metadata().peek().unwrap(), 1);
    }

    #[test]
    fn test_distinct_fingerprints_get_distinct_dirs() {
        let (_temp, cache) = setup();
        let a = cache.assign_dir(&params(json!({"a": 0}))).unwrap();
        let b = cache.assign_dir(&params(json!({"a": 1}))).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_set_complete() {
        let (_temp, cache) = setup();
        let args = params(json!({"a": 0}));
        cache.assign_dir(&args).unwrap();

        assert!(!cache.is_complete(&args).unwrap());
        cache.set_complete(&args).unwrap();
        assert!(cache.is_complete(&args).unwrap());
    }

    #[test]
    fn test_set_complete_missing_is_not_found() {
        let (_temp, cache) = setup();
        let err = cache.set_complete(&params(json!({"a": 0}))).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        // The failed call must not leave the lock held
        cache.assign_dir(&params(json!({"a": 0}))).unwrap();
    }

    #[test]
    fn test_merge_hashes_aliases_entry() {
        let (_temp, cache) = setup();
        let full = params(json!({"op": "linear", "value": 0, "repetitions": 10}));
        let partial = params(json!({"op": "linear", "value": 0}));

        let dir = cache.assign_dir(&full).unwrap();
        cache.set_complete(&full).unwrap();
        cache.merge_hashes(&partial, &full).unwrap();

        assert_eq!(cache.get_dir(&partial).unwrap(), dir);
        assert!(cache.is_complete(&partial).unwrap());
        assert_eq!(cache.metadata().peek().unwrap(), 1);
    }

    #[test]
    fn test_completion_reaches_aliases() {
        let (_temp, cache) = setup();
        let full = params(json!({"op": "linear", "repetitions": 10}));
        let partial = params(json!({"op": "linear"}));

        cache.assign_dir(&full).unwrap();
        cache.merge_hashes(&partial, &full).unwrap();
        assert!(!cache.is_complete(&partial).unwrap());

        cache.set_complete(&full).unwrap();
        assert!(cache.is_complete(&partial).unwrap());
    }

    #[test]
    fn test_merge_hashes_missing_old() {
        let (_temp, cache) = setup();
        let err = cache
            .merge_hashes(&params(json!({"a": 0})), &params(json!({"b": 0})))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_merge_hashes_conflict() {
        let (_temp, cache) = setup();
        let a = params(json!({"a": 0}));
        let b = params(json!({"b": 0}));
        let dir_a = cache.assign_dir(&a).unwrap();
        cache.assign_dir(&b).unwrap();

        let err = cache.merge_hashes(&a, &b).unwrap_err();
        assert!(matches!(err, Error::AliasConflict { .. }));
        assert_eq!(cache.get_dir(&a).unwrap(), dir_a);
    }

    #[test]
    fn test_entries_lists_everything() {
        let (_temp, cache) = setup();
        cache.assign_dir(&params(json!({"a": 0}))).unwrap();
        cache.assign_dir(&params(json!({"a": 1}))).unwrap();

        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|(_, e)| !e.complete));
    }

    #[test]
    fn test_reopen_sees_persisted_state() {
        let temp = TempDir::new().unwrap();
        let project = Project::init(temp.path()).unwrap();
        let args = params(json!({"a": 0}));

        let dir = {
            let cache = CacheStore::open(&project).unwrap();
            let dir = cache.assign_dir(&args).unwrap();
            cache.set_complete(&args).unwrap();
            dir
        };

        let cache = CacheStore::open(&project).unwrap();
        assert_eq!(cache.get_dir(&args).unwrap(), dir);
        assert!(cache.is_complete(&args).unwrap());
    }
}
