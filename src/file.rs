//! JSON-file store backend.
//!
//! The whole state is one small JSON document. Each mutation is applied to a
//! copy, written to a sibling temp file and renamed into place; the in-memory
//! copy is only replaced once the rename succeeds, so a failed write leaves
//! both disk and memory as they were.

use crate::memory::StoreData;
use crate::{Error, Grid, Result, Slot, SlotId, Store, SyncState};
use log::{debug, error};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Store persisted to a JSON file on every write
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl FileStore {
    /// Open (or start) the store at `path`.
    ///
    /// A missing file is an empty store. A file that exists but cannot be read
    /// or parsed is an error: silently starting empty would drop every slot on
    /// the next write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<StoreData>(&bytes).map_err(|e| {
                Error::StorageError(format!("corrupt store file {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(
            "Opened store {} ({} slots)",
            path.display(),
            data.slots.len()
        );
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        self.data
            .lock()
            .map_err(|_| Error::StorageError("file store lock poisoned".into()))
    }

    /// Apply `f` to a copy of the state, persist it, then commit it.
    /// An error from `f` leaves disk and memory untouched.
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreData) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if next != *guard {
            self.persist(&next)?;
            *guard = next;
        }
        Ok(out)
    }

    fn persist(&self, data: &StoreData) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(data)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)?;
        }
        write_synced(&tmp, &bytes)
            .and_then(|_| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                error!("Failed to write store {}: {}", self.path.display(), e);
                let _ = fs::remove_file(&tmp);
                Error::IoError(e)
            })?;
        if let Some(parent) = parent {
            sync_dir(parent);
        }
        Ok(())
    }
}

/// Write `bytes` to `path` and flush them to disk before returning
fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Make the rename itself durable. Directories cannot be opened for syncing on
/// every platform, so failures are only logged.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("Could not sync directory {}: {}", dir.display(), e);
    }
}

impl Store for FileStore {
    fn slots(&self) -> Result<Vec<Slot>> {
        Ok(self.lock()?.slots())
    }

    fn insert_missing(&self, slots: Vec<Slot>) -> Result<()> {
        self.mutate(|data| {
            data.insert_missing(slots);
            Ok(())
        })
    }

    fn upsert_slot(
        &self,
        id: SlotId,
        name: Option<String>,
        grid: Grid,
        last_modified: i64,
    ) -> Result<Slot> {
        self.mutate(|data| Ok(data.upsert_slot(id, name, grid, last_modified)))
    }

    fn sync_state(&self) -> Result<SyncState> {
        if let Some(state) = self.lock()?.sync {
            return Ok(state);
        }
        self.mutate(|data| Ok(*data.sync_mut()))
    }

    fn set_device_version(&self, version: u64) -> Result<SyncState> {
        self.mutate(|data| {
            let state = data.sync_mut();
            state.device_version = version;
            Ok(*state)
        })
    }

    fn increment_web_version(&self) -> Result<SyncState> {
        self.mutate(|data| data.increment_web_version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStore::open(&path).unwrap();
            let mut grid = Grid::empty();
            grid.set(7, 7, Some("#00ff00".into()));
            store.upsert_slot(3, Some("Tree".into()), grid, 42).unwrap();
            store.increment_web_version().unwrap();
            store.set_device_version(1).unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        let slots = store.slots().unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].name, "Tree");
        assert_eq!(slots[0].grid.get(7, 7), Some("#00ff00"));
        let state = store.sync_state().unwrap();
        assert_eq!((state.web_version, state.device_version), (1, 1));
    }

    #[test]
    fn missing_file_starts_empty_and_creates_on_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");
        let store = FileStore::open(&path).unwrap();
        assert!(store.slots().unwrap().is_empty());
        assert!(!path.exists());

        store.sync_state().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
    }

    #[test]
    fn successful_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.upsert_slot(1, None, Grid::empty(), 7).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("store.json")]);
        let on_disk: StoreData = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk.slots[&1].last_modified, 7);
    }

    #[test]
    fn overflowing_web_version_is_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let contents = format!(
            r#"{{"slots": {{}}, "sync": {{"type": "global", "webVersion": {}, "deviceVersion": 0}}}}"#,
            u64::MAX
        );
        fs::write(&path, &contents).unwrap();

        let store = FileStore::open(&path).unwrap();
        let err = store.increment_web_version().unwrap_err();
        assert!(matches!(err, Error::StorageError(_)));
        assert_eq!(fs::read_to_string(&path).unwrap(), contents);
        assert_eq!(store.sync_state().unwrap().web_version, u64::MAX);
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStore::open(&path).unwrap();
        store.increment_web_version().unwrap();

        // Replace the target with a directory so the rename fails
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();

        assert!(store.increment_web_version().is_err());
        assert_eq!(store.sync_state().unwrap().web_version, 1);
    }
}
