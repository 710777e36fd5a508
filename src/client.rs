//! Blocking client for the device side of the sync handshake.
//!
//! A device pulls when the server reports pending, then acknowledges the
//! `webVersion` it observed. Edits made while offline are staged in the
//! `LocalMirror` and pushed by `flush_pending`.

use crate::mirror::LocalMirror;
use crate::sync::StatusReport;
use crate::{ClientConfig, Error, Grid, Result, Slot, SlotId, SyncState};
use log::{debug, info, warn};
use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;

/// What a call to `pull` did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullOutcome {
    /// Sync record after the pull
    pub state: SyncState,
    /// Whether slots were fetched and the version acknowledged
    pub fetched: bool,
}

/// What a call to `flush_pending` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Edits the server accepted
    pub sent: usize,
    /// Edits the server refused with a 4xx, dropped from the queue, with the
    /// server's message
    pub rejected: Vec<(SlotId, String)>,
    /// Edits still staged because the server could not be reached
    pub remaining: usize,
}

pub struct DeviceClient {
    http: Client,
    base_url: String,
    mirror: LocalMirror,
}

impl DeviceClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| {
                Error::ConfigError(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            mirror: LocalMirror::new(),
        })
    }

    pub fn mirror(&self) -> &LocalMirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut LocalMirror {
        &mut self.mirror
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// All ten slots
    pub fn slots(&self) -> Result<Vec<Slot>> {
        let resp = self.http.get(self.url("/slots")).send()?;
        read_json(resp)
    }

    pub fn save_slot(&self, id: SlotId, name: Option<&str>, grid: &Grid) -> Result<Slot> {
        let mut body = json!({ "id": id, "grid": grid });
        if let Some(name) = name {
            body["name"] = json!(name);
        }
        let resp = self.http.post(self.url("/slots")).json(&body).send()?;
        read_json(resp)
    }

    pub fn sync_state(&self) -> Result<SyncState> {
        let resp = self.http.get(self.url("/sync")).send()?;
        read_json(resp)
    }

    pub fn status(&self) -> Result<StatusReport> {
        let resp = self.http.get(self.url("/sync/status")).send()?;
        read_json(resp)
    }

    pub fn report_device_version(&self, version: u64) -> Result<SyncState> {
        let resp = self
            .http
            .post(self.url("/sync"))
            .json(&json!({ "deviceVersion": version }))
            .send()?;
        read_json(resp)
    }

    /// One device pull cycle.
    ///
    /// Acknowledges the `webVersion` read before the slot fetch, so a save that
    /// lands mid-pull leaves the status pending for the next cycle.
    pub fn pull(&mut self) -> Result<PullOutcome> {
        let state = self.sync_state()?;
        if state.status().is_synced() && self.mirror.is_fresh(state.web_version) {
            debug!("Already synced at version {}", state.web_version);
            return Ok(PullOutcome {
                state,
                fetched: false,
            });
        }

        let observed = state.web_version;
        let slots = self.slots()?;
        self.mirror.record_pull(observed, slots);
        let state = self.report_device_version(observed)?;
        info!(
            "Pulled {} slots at version {} ({})",
            self.mirror.len(),
            observed,
            state.status()
        );
        Ok(PullOutcome {
            state,
            fetched: true,
        })
    }

    /// Push staged offline edits.
    ///
    /// An edit the server refuses with a 4xx will never succeed, so it is
    /// dropped and reported rather than retried. A network failure or 5xx stops
    /// the flush with the unsent edits still staged; that is an error only when
    /// nothing at all was processed.
    pub fn flush_pending(&mut self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        for edit in self.mirror.staged() {
            match self.save_slot(edit.id, edit.name.as_deref(), &edit.grid) {
                Ok(saved) => {
                    self.mirror.mark_saved(saved);
                    report.sent += 1;
                }
                Err(Error::HttpError { status, message }) if (400..500).contains(&status) => {
                    warn!("Server rejected staged edit for slot {}: {}", edit.id, message);
                    self.mirror.discard(edit.id);
                    report.rejected.push((edit.id, message));
                }
                Err(e) => {
                    warn!("Could not push staged edit for slot {}: {}", edit.id, e);
                    if report.sent == 0 && report.rejected.is_empty() {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        report.remaining = self.mirror.staged().len();
        Ok(report)
    }
}

fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>()?);
    }
    let message = resp
        .json::<serde_json::Value>()
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());
    Err(Error::HttpError {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized() {
        let c = DeviceClient::new(ClientConfig {
            base_url: "http://localhost:9/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(c.url("/sync"), "http://localhost:9/sync");
    }

    #[test]
    fn unreachable_server_is_network_error() {
        let c = DeviceClient::new(ClientConfig {
            base_url: "http://127.0.0.1:1".into(),
            timeout_ms: 500,
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(c.sync_state(), Err(Error::NetworkError(_))));
    }
}
