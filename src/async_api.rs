use crate::sync::SyncStatus;
use crate::{Error, Grid, Result, Slot, SlotId, SlotStore, Store, SyncRegistry, SyncState};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

enum Command {
    ListSlots(oneshot::Sender<Result<Vec<Slot>>>),
    SaveSlot(
        Option<SlotId>,
        Option<String>,
        Option<Grid>,
        oneshot::Sender<Result<Slot>>,
    ),
    SyncState(oneshot::Sender<Result<SyncState>>),
    SetDeviceVersion(u64, oneshot::Sender<Result<SyncState>>),

    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly handle to the slot store and sync registry, backed by a
/// dedicated worker thread.
///
/// The worker owns the services and runs each command to completion, so store
/// calls never block an async executor thread.
#[derive(Clone)]
pub struct AsyncSlots {
    cmd_tx: Sender<Command>,
}

impl AsyncSlots {
    /// Spawn the worker thread over `store`.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

        thread::spawn(move || {
            let registry = SyncRegistry::new(store.clone());
            let slots = SlotStore::new(store, registry.clone());

            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::ListSlots(resp) => {
                        let _ = resp.send(slots.list_slots());
                    }
                    Command::SaveSlot(id, name, grid, resp) => {
                        let _ = resp.send(slots.save_slot(id, name, grid));
                    }
                    Command::SyncState(resp) => {
                        let _ = resp.send(registry.get_state());
                    }
                    Command::SetDeviceVersion(version, resp) => {
                        let _ = resp.send(registry.set_device_version(version));
                    }
                    Command::Close(resp) => {
                        let _ = resp.send(Ok(()));
                        break;
                    }
                }
            }
        });

        Self { cmd_tx }
    }

    pub async fn list_slots(&self) -> Result<Vec<Slot>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ListSlots(tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("ListSlots canceled: {}", e)))?
    }

    pub async fn save_slot(
        &self,
        id: Option<SlotId>,
        name: Option<String>,
        grid: Option<Grid>,
    ) -> Result<Slot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SaveSlot(id, name, grid, tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("SaveSlot canceled: {}", e)))?
    }

    pub async fn sync_state(&self) -> Result<SyncState> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SyncState(tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("SyncState canceled: {}", e)))?
    }

    pub async fn set_device_version(&self, version: u64) -> Result<SyncState> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetDeviceVersion(version, tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("SetDeviceVersion canceled: {}", e)))?
    }

    /// Convenience: synced/pending from the current counters
    pub async fn status(&self) -> Result<SyncStatus> {
        Ok(self.sync_state().await?.status())
    }

    /// Shut the worker down. Other clones of this handle stop working.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Close(tx))?;
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| Error::Other("slot worker has shut down".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn save_through_async_handle() {
        let slots = AsyncSlots::new(Arc::new(MemoryStore::new()));
        assert_eq!(slots.list_slots().await.unwrap().len(), 10);

        let mut grid = Grid::empty();
        grid.set(3, 4, Some("#112233".into()));
        let saved = slots
            .save_slot(Some(9), Some("Nine".into()), Some(grid.clone()))
            .await
            .unwrap();
        assert_eq!(saved.grid, grid);
        assert_eq!(slots.status().await.unwrap(), SyncStatus::Pending);

        slots.set_device_version(1).await.unwrap();
        assert_eq!(slots.status().await.unwrap(), SyncStatus::Synced);
    }

    #[tokio::test]
    async fn validation_errors_cross_the_channel() {
        let slots = AsyncSlots::new(Arc::new(MemoryStore::new()));
        let err = slots.save_slot(Some(1), None, None).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(slots.sync_state().await.unwrap().web_version, 0);
    }

    #[tokio::test]
    async fn calls_after_close_fail() {
        let slots = AsyncSlots::new(Arc::new(MemoryStore::new()));
        let other = slots.clone();
        slots.close().await.unwrap();
        assert!(other.sync_state().await.is_err());
    }
}
