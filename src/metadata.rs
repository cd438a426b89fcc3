//! Run-id allocator persisted as `{"next_id": N}`
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Result;
use crate::lock::RwFileLock;
use crate::storage::{read_json, write_json_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub next_id: u64,
}

#[derive(Debug)]
pub struct MetadataStore {
    path: PathBuf,
    lock: RwFileLock,
}

impl MetadataStore {
    /// Open `<dir>/<name>.json`, creating it with `next_id = 0` if absent
    pub fn open(dir: &Path, name: &str) -> Result<Self> {
        let store = Self {
            path: dir.join(format!("{}.json", name)),
            lock: RwFileLock::new(dir, name),
        };

        let guard = store.lock.write()?;
        if !store.path.exists() {
            write_json_atomic(&store.path, &Metadata { next_id: 0 }, false)?;
            debug!(path = %store.path.display(), "metadata initialized");
        }
        guard.release()?;

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Allocate the next run id. No two callers ever observe the same id.
    pub fn next_id(&self) -> Result<u64> {
        let guard = self.lock.write()?;

        let mut metadata: Metadata = read_json(&self.path)?;
        let id = metadata.next_id;
        metadata.next_id += 1;
        write_json_atomic(&self.path, &metadata, false)?;

        guard.release()?;

        debug!(operation = "next_id", id, "run id allocated");
        Ok(id)
    }

    /// Current counter value, without allocating
    pub fn peek(&self) -> Result<u64> {
        let guard = self.lock.read()?;
        let metadata: Metadata = read_json(&self.path)?;
        guard.release()?;
        Ok(metadata.next_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_record_and_lock() {
        let temp = TempDir::new().unwrap();
        MetadataStore::open(temp.path(), "metadata").unwrap();

        assert!(temp.path().join("metadata.json").exists());
        assert!(temp.path().join(".metadata.lock").exists());

        let metadata: Metadata = read_json(&temp.path().join("metadata.json")).unwrap();
        assert_eq!(metadata.next_id, 0);
    }

    #[test]
    fn test_next_id_increments_and_persists() {
        let temp = TempDir::new().unwrap();
        let store = MetadataStore::open(temp.path(), "metadata").unwrap();

        assert_eq!(store.next_id().unwrap(), 0);
        assert_eq!(store.next_id().unwrap(), 1);

        let metadata: Metadata = read_json(store.path()).unwrap();
        assert_eq!(metadata.next_id, 2);
        assert_eq!(store.peek().unwrap(), 2);
    }

    #[test]
    fn test_reopen_keeps_counter() {
        let temp = TempDir::new().unwrap();
        MetadataStore::open(temp.path(), "metadata")
            .unwrap()
            .next_id()
            .unwrap();

        let store = MetadataStore::open(temp.path(), "metadata").unwrap();
        assert_eq!(store.next_id().unwrap(), 1);
    }

    #[test]
    fn test_concurrent_allocation_is_unique() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        MetadataStore::open(&dir, "metadata").unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.clone();
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    let store = MetadataStore::open(&dir, "metadata").unwrap();
                    for _ in 0..10 {
                        let id = store.next_id().unwrap();
                        seen.lock().unwrap().push(id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let ids = seen.lock().unwrap();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(ids.len(), 80);
        assert_eq!(unique.len(), 80);
        assert_eq!(*ids.iter().max().unwrap(), 79);
    }
}
