//! Sync Version Registry and the synced/pending reconciliation rule.
//!
//! The web side owns `webVersion` (bumped on every slot save); the device
//! owns `deviceVersion` (overwritten with whatever it reports). Status is a
//! pure comparison of the two. Nothing ties a particular save to a particular
//! acknowledgment, so a stale report that happens to equal the current
//! `webVersion` reads as synced.

use crate::{Error, Result, Store, SyncState};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Whether the device has pulled the latest web-side edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Synced,
    Pending,
}

impl SyncStatus {
    /// Synced iff both counters agree
    pub fn between(web_version: u64, device_version: u64) -> Self {
        if web_version == device_version {
            SyncStatus::Synced
        } else {
            SyncStatus::Pending
        }
    }

    pub fn is_synced(self) -> bool {
        self == SyncStatus::Synced
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Synced => f.write_str("synced"),
            SyncStatus::Pending => f.write_str("pending"),
        }
    }
}

/// Status plus the counters it was derived from, as served by `/sync/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: SyncStatus,
    pub web_version: u64,
    pub device_version: u64,
}

impl From<SyncState> for StatusReport {
    fn from(state: SyncState) -> Self {
        Self {
            status: state.status(),
            web_version: state.web_version,
            device_version: state.device_version,
        }
    }
}

/// Accessor for the singleton sync record
#[derive(Clone)]
pub struct SyncRegistry {
    store: Arc<dyn Store>,
}

impl SyncRegistry {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The sync record, created with both counters at zero on first access
    pub fn get_state(&self) -> Result<SyncState> {
        self.store.sync_state()
    }

    /// Record the version the device reports. Overwrites; does not add.
    pub fn set_device_version(&self, device_version: u64) -> Result<SyncState> {
        let state = self.store.set_device_version(device_version)?;
        debug!(
            "Device reported version {} (web {}, {})",
            device_version,
            state.web_version,
            state.status()
        );
        Ok(state)
    }

    /// Atomically add one to `webVersion`
    pub fn bump_web_version(&self) -> Result<SyncState> {
        let state = self.store.increment_web_version()?;
        info!("webVersion is now {}", state.web_version);
        Ok(state)
    }

    pub fn status(&self) -> Result<SyncStatus> {
        Ok(self.get_state()?.status())
    }
}

/// Extract a device version from a JSON value.
///
/// Only non-negative integers are accepted; strings, floats, booleans and
/// `null` are validation errors.
pub fn parse_device_version(value: Option<&serde_json::Value>) -> Result<u64> {
    value
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| Error::ValidationError("Invalid deviceVersion".into()))
}
