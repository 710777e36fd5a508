//! pixsync
//!
//! Slot store and sync-version service for an 8×8 pixel-art editor that pairs
//! with a companion physical device.
//!
//! # Features
//!
//! - **Slot Store**: ten fixed slots, each an 8×8 grid of optional colors,
//!   lazily backfilled on first listing and upserted on save
//! - **Sync Version Registry**: a singleton `webVersion`/`deviceVersion` pair the
//!   device uses to detect new data and acknowledge it
//! - **Swappable storage**: in-memory or JSON-file backed, behind the `Store` trait
//! - **HTTP API** (`server` feature): `GET/POST /slots`, `GET/POST /sync`
//! - **Device client** (`client` feature): blocking client with a local mirror
//!
//! # Example
//!
//! ```
//! use pixsync::{Grid, ServerConfig, SlotStore, SyncRegistry, SyncStatus};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = pixsync::open_store(&ServerConfig::default())?;
//! let registry = SyncRegistry::new(store.clone());
//! let slots = SlotStore::new(store, registry.clone());
//!
//! assert_eq!(slots.list_slots()?.len(), 10);
//! slots.save_slot(Some(1), Some("Heart".into()), Some(Grid::empty()))?;
//! assert_eq!(registry.status()?, SyncStatus::Pending);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

pub mod error;
pub use error::{Error, Result};

// Storage backends
pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

pub mod slots;
pub mod sync;

pub use slots::SlotStore;
pub use sync::{SyncRegistry, SyncStatus};

// Client-side cache of slots and staged offline edits
pub mod mirror;
pub use mirror::LocalMirror;

// Async-friendly facade (worker-thread backed)
pub mod async_api;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

#[cfg(feature = "client")]
pub use client::{DeviceClient, FlushReport};

/// Width and height of every slot grid
pub const GRID_SIZE: usize = 8;

/// Number of slots; ids run from 1 to `MAX_SLOTS` inclusive
pub const MAX_SLOTS: u32 = 10;

/// Slot identifier (1..=`MAX_SLOTS`)
pub type SlotId = u32;

/// A single grid cell: a color string, or `None` when the cell is empty
pub type Cell = Option<String>;

/// An ordered matrix of optional colors.
///
/// Serialized as a bare JSON array of rows. A grid decoded from the wire is not
/// guaranteed to be 8×8; use [`Grid::is_well_formed`] before accepting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Grid(Vec<Vec<Cell>>);

impl Grid {
    /// An 8×8 grid with every cell empty
    pub fn empty() -> Self {
        Grid(vec![vec![None; GRID_SIZE]; GRID_SIZE])
    }

    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        Grid(rows)
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.0
    }

    /// True when the grid has exactly `GRID_SIZE` rows of `GRID_SIZE` cells
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == GRID_SIZE && self.0.iter().all(|row| row.len() == GRID_SIZE)
    }

    /// Color at `(row, col)`, or `None` for an empty or out-of-range cell
    pub fn get(&self, row: usize, col: usize) -> Option<&str> {
        self.0.get(row)?.get(col)?.as_deref()
    }

    /// Set or clear the cell at `(row, col)`. Returns false when out of range.
    pub fn set(&mut self, row: usize, col: usize, color: Option<String>) -> bool {
        match self.0.get_mut(row).and_then(|r| r.get_mut(col)) {
            Some(cell) => {
                *cell = color;
                true
            }
            None => false,
        }
    }

    /// Number of cells holding a color
    pub fn painted(&self) -> usize {
        self.0.iter().flatten().filter(|c| c.is_some()).count()
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::empty()
    }
}

/// A named, independently saved pixel grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub id: SlotId,
    pub name: String,
    pub grid: Grid,
    /// Milliseconds since the Unix epoch
    pub last_modified: i64,
}

impl Slot {
    /// The slot synthesized for an id that has never been saved
    pub fn blank(id: SlotId, now_ms: i64) -> Self {
        Self {
            id,
            name: default_slot_name(id),
            grid: Grid::empty(),
            last_modified: now_ms,
        }
    }
}

pub(crate) fn default_slot_name(id: SlotId) -> String {
    format!("Slot {}", id)
}

/// Discriminator of the singleton sync record. There is only ever one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncKind {
    #[default]
    #[serde(rename = "global")]
    Global,
}

/// The shared web/device version pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    #[serde(rename = "type")]
    pub kind: SyncKind,
    /// Bumped by one on every successful slot save
    pub web_version: u64,
    /// Last version the device reported having consumed
    pub device_version: u64,
}

impl SyncState {
    pub fn status(&self) -> SyncStatus {
        SyncStatus::between(self.web_version, self.device_version)
    }
}

/// Storage seam for slots and the sync record.
///
/// Implementations must make each method individually atomic. In particular
/// `increment_web_version` is a single read-modify-write under the backend's
/// own lock, never a read followed by a separate write.
pub trait Store: Send + Sync {
    /// All stored slots ordered by ascending id
    fn slots(&self) -> Result<Vec<Slot>>;

    /// Insert the given slots, skipping any whose id already exists
    fn insert_missing(&self, slots: Vec<Slot>) -> Result<()>;

    /// Replace the grid (and the name, when given) of slot `id`, creating it if
    /// absent, and stamp it with `last_modified`
    fn upsert_slot(
        &self,
        id: SlotId,
        name: Option<String>,
        grid: Grid,
        last_modified: i64,
    ) -> Result<Slot>;

    /// The sync record, created with zero counters if absent
    fn sync_state(&self) -> Result<SyncState>;

    /// Overwrite `deviceVersion`, creating the record if absent
    fn set_device_version(&self, version: u64) -> Result<SyncState>;

    /// Add one to `webVersion`, creating the record if absent
    fn increment_web_version(&self) -> Result<SyncState>;
}

/// Configuration for the HTTP server and its store
///
/// # Examples
///
/// ```
/// let cfg = pixsync::ServerConfig::default();
/// assert_eq!(cfg.bind_addr, "127.0.0.1:3000");
/// assert!(cfg.data_path.is_none());
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    pub bind_addr: String,
    /// JSON file backing the store; `None` keeps everything in memory
    pub data_path: Option<PathBuf>,
    /// Number of request-handling threads
    pub workers: usize,
    /// Largest request body accepted, in bytes
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            data_path: None,
            workers: num_cpus::get().max(1),
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Configuration for the device-side HTTP client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the server, without a trailing slash
    pub base_url: String,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// User agent string to send with requests
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            timeout_ms: 10000,
            user_agent: format!("pixsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Open the store described by `config`.
///
/// A configured `data_path` selects the JSON file backend; otherwise state
/// lives in memory for the life of the process.
pub fn open_store(config: &ServerConfig) -> Result<Arc<dyn Store>> {
    match &config.data_path {
        Some(path) => Ok(Arc::new(FileStore::open(path)?)),
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert!(config.workers >= 1);
        assert_eq!(config.max_body_bytes, 65536);
    }

    #[test]
    fn test_empty_grid_shape() {
        let grid = Grid::empty();
        assert!(grid.is_well_formed());
        assert_eq!(grid.rows().len(), GRID_SIZE);
        assert_eq!(grid.painted(), 0);
    }

    #[test]
    fn test_grid_set_get() {
        let mut grid = Grid::empty();
        assert!(grid.set(2, 3, Some("#ff0000".into())));
        assert_eq!(grid.get(2, 3), Some("#ff0000"));
        assert!(!grid.set(8, 0, Some("#000000".into())));
        assert_eq!(grid.painted(), 1);
    }

    #[test]
    fn test_ragged_grid_rejected() {
        let mut rows = Grid::empty().rows().to_vec();
        rows[4].pop();
        assert!(!Grid::from_rows(rows).is_well_formed());
    }

    #[test]
    fn test_wire_shapes() {
        let state = SyncState {
            web_version: 4,
            device_version: 3,
            ..Default::default()
        };
        let v = serde_json::to_value(state).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"type": "global", "webVersion": 4, "deviceVersion": 3})
        );

        let slot = Slot::blank(3, 1_700_000_000_000);
        let v = serde_json::to_value(&slot).unwrap();
        assert_eq!(v["name"], "Slot 3");
        assert_eq!(v["lastModified"], 1_700_000_000_000i64);
        assert_eq!(v["grid"][7][7], serde_json::Value::Null);
    }
}
