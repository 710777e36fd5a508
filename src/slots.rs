//! Slot Store: ten fixed slots, backfilled on listing and upserted on save.

use crate::{now_ms, Error, Grid, Result, Slot, SlotId, Store, SyncRegistry, MAX_SLOTS};
use log::{error, info};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Body of a slot save as sent by the web client: `{ id, name?, grid }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveSlotRequest {
    #[serde(default)]
    pub id: Option<SlotId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub grid: Option<Grid>,
}

/// Slot operations over a `Store`, bumping the web version on every save
#[derive(Clone)]
pub struct SlotStore {
    store: Arc<dyn Store>,
    sync: SyncRegistry,
}

impl SlotStore {
    pub fn new(store: Arc<dyn Store>, sync: SyncRegistry) -> Self {
        Self { store, sync }
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.sync
    }

    /// All ten slots in id order, creating any that do not exist yet.
    ///
    /// Backfill only inserts absent ids, so repeated calls return the same
    /// content.
    pub fn list_slots(&self) -> Result<Vec<Slot>> {
        let slots = self.store.slots()?;
        if slots.len() >= MAX_SLOTS as usize {
            return Ok(slots);
        }

        let present: BTreeSet<SlotId> = slots.iter().map(|s| s.id).collect();
        let now = now_ms();
        let missing: Vec<Slot> = (1..=MAX_SLOTS)
            .filter(|id| !present.contains(id))
            .map(|id| Slot::blank(id, now))
            .collect();
        if missing.is_empty() {
            return Ok(slots);
        }

        info!("Initializing {} missing slots", missing.len());
        self.store.insert_missing(missing)?;
        self.store.slots()
    }

    /// Replace slot `id`'s grid (and name, when given) and bump `webVersion`.
    ///
    /// `id` and `grid` are required. The slot write and the version bump are two
    /// separate store writes; if the bump fails the slot stays saved and the
    /// error is returned.
    pub fn save_slot(
        &self,
        id: Option<SlotId>,
        name: Option<String>,
        grid: Option<Grid>,
    ) -> Result<Slot> {
        let (id, grid) = match (id, grid) {
            (Some(id), Some(grid)) => (id, grid),
            _ => return Err(Error::ValidationError("Missing required fields".into())),
        };
        validate_edit(id, &grid)?;

        let slot = self.store.upsert_slot(id, name, grid, now_ms())?;
        if let Err(e) = self.sync.bump_web_version() {
            error!(
                "Slot {} saved but webVersion increment failed: {}",
                id, e
            );
            return Err(e);
        }
        info!("Saved slot {} ({:?})", slot.id, slot.name);
        Ok(slot)
    }

    /// `save_slot` for a decoded request body
    pub fn save(&self, req: SaveSlotRequest) -> Result<Slot> {
        self.save_slot(req.id, req.name, req.grid)
    }
}

/// Checks shared by server-side saves and client-side staging
pub(crate) fn validate_edit(id: SlotId, grid: &Grid) -> Result<()> {
    if !(1..=MAX_SLOTS).contains(&id) {
        return Err(Error::ValidationError(format!(
            "id must be between 1 and {}",
            MAX_SLOTS
        )));
    }
    if !grid.is_well_formed() {
        return Err(Error::ValidationError(format!(
            "grid must be {n}x{n}",
            n = crate::GRID_SIZE
        )));
    }
    Ok(())
}
