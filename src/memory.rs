//! In-memory store backend.
//!
//! `StoreData` is the whole persisted state and carries the mutation logic
//! shared by every backend; `MemoryStore` simply keeps it behind a mutex.

use crate::{default_slot_name, Error, Grid, Result, Slot, SlotId, Store, SyncState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// Everything the service persists: slots keyed by id, plus the sync singleton
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreData {
    #[serde(default)]
    pub(crate) slots: BTreeMap<SlotId, Slot>,
    #[serde(default)]
    pub(crate) sync: Option<SyncState>,
}

impl StoreData {
    pub(crate) fn slots(&self) -> Vec<Slot> {
        // BTreeMap iterates in ascending key order
        self.slots.values().cloned().collect()
    }

    pub(crate) fn insert_missing(&mut self, slots: Vec<Slot>) {
        for slot in slots {
            self.slots.entry(slot.id).or_insert(slot);
        }
    }

    pub(crate) fn upsert_slot(
        &mut self,
        id: SlotId,
        name: Option<String>,
        grid: Grid,
        last_modified: i64,
    ) -> Slot {
        let slot = self.slots.entry(id).or_insert_with(|| Slot {
            id,
            name: default_slot_name(id),
            grid: Grid::empty(),
            last_modified,
        });
        if let Some(name) = name {
            slot.name = name;
        }
        slot.grid = grid;
        slot.last_modified = last_modified;
        slot.clone()
    }

    pub(crate) fn sync_mut(&mut self) -> &mut SyncState {
        self.sync.get_or_insert_with(SyncState::default)
    }

    pub(crate) fn increment_web_version(&mut self) -> Result<SyncState> {
        let state = self.sync_mut();
        state.web_version = state
            .web_version
            .checked_add(1)
            .ok_or_else(|| Error::StorageError("webVersion overflow".into()))?;
        Ok(*state)
    }
}

/// Process-local store. State is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreData>> {
        self.data
            .lock()
            .map_err(|_| Error::StorageError("memory store lock poisoned".into()))
    }
}

impl Store for MemoryStore {
    fn slots(&self) -> Result<Vec<Slot>> {
        Ok(self.lock()?.slots())
    }

    fn insert_missing(&self, slots: Vec<Slot>) -> Result<()> {
        self.lock()?.insert_missing(slots);
        Ok(())
    }

    fn upsert_slot(
        &self,
        id: SlotId,
        name: Option<String>,
        grid: Grid,
        last_modified: i64,
    ) -> Result<Slot> {
        Ok(self.lock()?.upsert_slot(id, name, grid, last_modified))
    }

    fn sync_state(&self) -> Result<SyncState> {
        Ok(*self.lock()?.sync_mut())
    }

    fn set_device_version(&self, version: u64) -> Result<SyncState> {
        let mut data = self.lock()?;
        let state = data.sync_mut();
        state.device_version = version;
        Ok(*state)
    }

    fn increment_web_version(&self) -> Result<SyncState> {
        self.lock()?.increment_web_version()
    }
}
