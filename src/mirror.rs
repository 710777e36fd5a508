//! Client-side mirror of server state.
//!
//! The mirror is a cache, never the source of truth. It holds at most one entry
//! per slot id, tagged with the `webVersion` the entries reflect, and a set of
//! staged edits made while the server was unreachable. Both are bounded by the
//! number of slot ids, since only valid ids are accepted.

use crate::slots::validate_edit;
use crate::{Grid, Result, Slot, SlotId, MAX_SLOTS};
use std::collections::BTreeMap;

/// An edit waiting to be pushed to the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedEdit {
    pub id: SlotId,
    pub name: Option<String>,
    pub grid: Grid,
}

#[derive(Debug, Default)]
pub struct LocalMirror {
    slots: BTreeMap<SlotId, Slot>,
    web_version: Option<u64>,
    staged: BTreeMap<SlotId, StagedEdit>,
}

impl LocalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached slot set with a fresh pull taken at `web_version`.
    /// Ids outside `1..=MAX_SLOTS` are dropped.
    pub fn record_pull(&mut self, web_version: u64, slots: Vec<Slot>) {
        self.slots = slots
            .into_iter()
            .filter(|s| (1..=MAX_SLOTS).contains(&s.id))
            .map(|s| (s.id, s))
            .collect();
        self.web_version = Some(web_version);
    }

    /// True when the cached slots reflect `web_version`
    pub fn is_fresh(&self, web_version: u64) -> bool {
        self.web_version == Some(web_version)
    }

    pub fn web_version(&self) -> Option<u64> {
        self.web_version
    }

    /// Drop the cached slot set. Staged edits are kept.
    pub fn invalidate(&mut self) {
        self.slots.clear();
        self.web_version = None;
    }

    pub fn slot(&self, id: SlotId) -> Option<&Slot> {
        self.slots.get(&id)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stage an edit for later upload. A newer edit to the same slot replaces
    /// the older one. Edits the server would reject (bad id, grid not 8×8) are
    /// refused here instead of being queued.
    pub fn stage(
        &mut self,
        id: SlotId,
        name: Option<String>,
        grid: Grid,
    ) -> Result<()> {
        validate_edit(id, &grid)?;
        self.staged.insert(id, StagedEdit { id, name, grid });
        Ok(())
    }

    /// Drop a staged edit without uploading it
    pub fn discard(&mut self, id: SlotId) -> Option<StagedEdit> {
        self.staged.remove(&id)
    }

    pub fn staged(&self) -> Vec<StagedEdit> {
        self.staged.values().cloned().collect()
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Forget a staged edit once the server has accepted `saved`, and cache it
    pub fn mark_saved(&mut self, saved: Slot) {
        self.staged.remove(&saved.id);
        self.slots.insert(saved.id, saved);
        // Our own save bumped webVersion past whatever we cached
        self.web_version = None;
    }
}
