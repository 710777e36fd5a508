//! JSON HTTP API over tiny_http.
//!
//! `Api` maps a `(method, url, body)` triple to a status and a JSON body and
//! knows nothing about sockets. `Server` runs a fixed pool of threads that pull
//! requests from one shared tiny_http listener and hand them to `Api`.
//!
//! Routes (each also reachable under `/api`):
//!
//! | Route              | Body                    |
//! |--------------------|-------------------------|
//! | `GET /slots`       |                         |
//! | `POST /slots`      | `{ id, name?, grid }`   |
//! | `GET /sync`        |                         |
//! | `POST /sync`       | `{ deviceVersion }`     |
//! | `GET /sync/status` |                         |

use crate::slots::SaveSlotRequest;
use crate::sync::{parse_device_version, StatusReport};
use crate::{Error, Result, ServerConfig, SlotStore, Store, SyncRegistry};
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A routed response: status code plus JSON body
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn ok<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::from_error(&Error::JsonError(e)),
        }
    }

    fn message(status: u16, msg: &str) -> Self {
        Self {
            status,
            body: json!({ "error": msg }),
        }
    }

    fn from_error(err: &Error) -> Self {
        if err.is_validation() {
            warn!("Rejected request: {}", err);
            Self::message(err.status_code(), &err.to_string())
        } else {
            // Detail stays in the log; callers get a generic message
            error!("Request failed: {}", err);
            Self::message(err.status_code(), "Internal Server Error")
        }
    }

    fn from_result<T: Serialize>(res: Result<T>) -> Self {
        match res {
            Ok(v) => Self::ok(&v),
            Err(e) => Self::from_error(&e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Slots,
    Sync,
    SyncStatus,
}

impl Route {
    fn parse(url: &str) -> Option<Self> {
        let path = url.split(['?', '#']).next().unwrap_or("");
        let path = match path.strip_prefix("/api") {
            Some(rest) if rest.starts_with('/') => rest,
            _ => path,
        };
        match path.trim_end_matches('/') {
            "/slots" => Some(Route::Slots),
            "/sync" => Some(Route::Sync),
            "/sync/status" => Some(Route::SyncStatus),
            _ => None,
        }
    }
}

/// Transport-independent request router
#[derive(Clone)]
pub struct Api {
    slots: SlotStore,
    sync: SyncRegistry,
}

impl Api {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let sync = SyncRegistry::new(store.clone());
        Self {
            slots: SlotStore::new(store, sync.clone()),
            sync,
        }
    }

    pub fn slots(&self) -> &SlotStore {
        &self.slots
    }

    pub fn registry(&self) -> &SyncRegistry {
        &self.sync
    }

    /// Route one request. `method` is the upper-case HTTP method.
    pub fn handle(&self, method: &str, url: &str, body: &[u8]) -> ApiResponse {
        let route = match Route::parse(url) {
            Some(route) => route,
            None => return ApiResponse::message(404, "Not Found"),
        };

        match (method, route) {
            ("GET", Route::Slots) => ApiResponse::from_result(self.slots.list_slots()),
            ("POST", Route::Slots) => ApiResponse::from_result(
                decode::<SaveSlotRequest>(body).and_then(|req| self.slots.save(req)),
            ),
            ("GET", Route::Sync) => ApiResponse::from_result(self.sync.get_state()),
            ("POST", Route::Sync) => ApiResponse::from_result(
                decode::<Value>(body)
                    .and_then(|v| parse_device_version(v.get("deviceVersion")))
                    .and_then(|version| self.sync.set_device_version(version)),
            ),
            ("GET", Route::SyncStatus) => {
                ApiResponse::from_result(self.sync.get_state().map(StatusReport::from))
            }
            _ => ApiResponse::message(405, "Method Not Allowed"),
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| Error::ValidationError(format!("Invalid request body: {}", e)))
}

/// A bound, not yet running, HTTP server
pub struct Server {
    listener: Arc<tiny_http::Server>,
    api: Api,
    workers: usize,
    max_body_bytes: usize,
}

impl Server {
    /// Open the configured store and bind the listener
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let store = crate::open_store(config)?;
        Self::bind(config, Api::new(store))
    }

    pub fn bind(config: &ServerConfig, api: Api) -> Result<Self> {
        if config.workers == 0 {
            return Err(Error::ConfigError("workers must be at least 1".into()));
        }
        let listener = tiny_http::Server::http(config.bind_addr.as_str()).map_err(|e| {
            Error::ConfigError(format!("cannot bind {}: {}", config.bind_addr, e))
        })?;
        Ok(Self {
            listener: Arc::new(listener),
            api,
            workers: config.workers,
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.server_addr().to_ip()
    }

    /// Start the worker threads and return immediately.
    ///
    /// Fails when not a single worker could be started.
    pub fn spawn(self) -> Result<ServerHandle> {
        let addr = self.local_addr();
        let stopping = Arc::new(AtomicBool::new(false));
        info!(
            "Listening on {} with {} workers",
            self.listener.server_addr(),
            self.workers
        );
        let threads = (0..self.workers)
            .map(|n| {
                let listener = self.listener.clone();
                let api = self.api.clone();
                let max_body = self.max_body_bytes;
                let stopping = stopping.clone();
                thread::Builder::new()
                    .name(format!("pixsync-http-{}", n))
                    .spawn(move || worker_loop(&listener, &api, max_body, &stopping))
            })
            .filter_map(|spawned| match spawned {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!("Failed to spawn HTTP worker: {}", e);
                    None
                }
            })
            .collect();
        Ok(ServerHandle {
            listener: self.listener,
            threads: require_workers(threads)?,
            addr,
            stopping,
        })
    }

    /// Serve until the listener is shut down
    pub fn run(self) -> Result<()> {
        self.spawn()?.join()
    }
}

fn require_workers(threads: Vec<JoinHandle<()>>) -> Result<Vec<JoinHandle<()>>> {
    if threads.is_empty() {
        return Err(Error::Other("no HTTP worker threads could be started".into()));
    }
    Ok(threads)
}

fn worker_loop(
    listener: &tiny_http::Server,
    api: &Api,
    max_body: usize,
    stopping: &AtomicBool,
) {
    loop {
        match listener.recv() {
            Ok(request) => handle_request(request, api, max_body),
            // unblock() during shutdown surfaces here as an error
            Err(_) if stopping.load(Ordering::SeqCst) => break,
            Err(e) => warn!("Failed to accept request: {}", e),
        }
    }
}

fn handle_request(mut request: tiny_http::Request, api: &Api, max_body: usize) {
    let method = request.method().to_string().to_ascii_uppercase();
    let url = request.url().to_string();

    let mut body = Vec::new();
    let read = request
        .as_reader()
        .take(max_body as u64 + 1)
        .read_to_end(&mut body);
    let resp = match read {
        Err(e) => {
            warn!("Failed to read body of {} {}: {}", method, url, e);
            ApiResponse::message(400, "Unreadable request body")
        }
        Ok(n) if n > max_body => ApiResponse::message(413, "Request body too large"),
        Ok(_) => api.handle(&method, &url, &body),
    };
    debug!("{} {} -> {}", method, url, resp.status);

    let mut response = tiny_http::Response::from_string(resp.body.to_string())
        .with_status_code(resp.status);
    if let Ok(header) =
        tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
    {
        response = response.with_header(header);
    }
    if let Err(e) = request.respond(response) {
        warn!("Failed to send response for {} {}: {}", method, url, e);
    }
}

/// Running server: worker threads plus the shared listener
pub struct ServerHandle {
    listener: Arc<tiny_http::Server>,
    threads: Vec<JoinHandle<()>>,
    addr: Option<SocketAddr>,
    stopping: Arc<AtomicBool>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    /// `http://host:port` of the bound listener
    pub fn base_url(&self) -> Option<String> {
        self.addr.map(|a| format!("http://{}", a))
    }

    /// Stop accepting requests and wait for the workers to exit
    pub fn shutdown(self) -> Result<()> {
        self.stopping.store(true, Ordering::SeqCst);
        // One unblock per worker blocked in recv()
        for _ in 0..self.threads.len() {
            self.listener.unblock();
        }
        self.join()
    }

    pub fn join(self) -> Result<()> {
        let mut panicked = 0;
        for t in self.threads {
            if t.join().is_err() {
                panicked += 1;
            }
        }
        info!("HTTP server stopped");
        if panicked > 0 {
            return Err(Error::Other(format!("{} HTTP workers panicked", panicked)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Grid, MemoryStore, SyncState};

    fn api() -> Api {
        Api::new(Arc::new(MemoryStore::new()))
    }

    fn save_body(id: u32, grid: &Grid) -> Vec<u8> {
        serde_json::to_vec(&json!({ "id": id, "name": "Art", "grid": grid })).unwrap()
    }

    #[test]
    fn routes_parse_with_prefix_and_query() {
        assert_eq!(Route::parse("/slots"), Some(Route::Slots));
        assert_eq!(Route::parse("/api/slots?x=1"), Some(Route::Slots));
        assert_eq!(Route::parse("/sync/"), Some(Route::Sync));
        assert_eq!(Route::parse("/api/sync/status"), Some(Route::SyncStatus));
        assert_eq!(Route::parse("/apislots"), None);
        assert_eq!(Route::parse("/"), None);
    }

    #[test]
    fn get_slots_returns_ten() {
        let resp = api().handle("GET", "/slots", b"");
        assert_eq!(resp.status, 200);
        let arr = resp.body.as_array().unwrap();
        assert_eq!(arr.len(), 10);
        assert_eq!(arr[0]["id"], 1);
        assert_eq!(arr[9]["name"], "Slot 10");
    }

    #[test]
    fn post_slots_bumps_web_version() {
        let api = api();
        let mut grid = Grid::empty();
        grid.set(1, 1, Some("#abcdef".into()));

        let resp = api.handle("POST", "/slots", &save_body(4, &grid));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["id"], 4);
        assert_eq!(resp.body["grid"][1][1], "#abcdef");

        let sync = api.handle("GET", "/sync", b"");
        let state: SyncState = serde_json::from_value(sync.body).unwrap();
        assert_eq!(state.web_version, 1);
    }

    #[test]
    fn post_slots_without_grid_is_400_and_harmless() {
        let api = api();
        let resp = api.handle("POST", "/slots", br#"{"id": 1, "name": "x"}"#);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error"], "Missing required fields");

        let resp = api.handle("POST", "/slots", b"not json");
        assert_eq!(resp.status, 400);

        let state = api.registry().get_state().unwrap();
        assert_eq!(state.web_version, 0);
    }

    #[test]
    fn post_sync_validates_device_version() {
        let api = api();
        let resp = api.handle("POST", "/sync", br#"{"deviceVersion": "3"}"#);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error"], "Invalid deviceVersion");
        assert_eq!(api.registry().get_state().unwrap().device_version, 0);

        let resp = api.handle("POST", "/sync", br#"{"deviceVersion": 3}"#);
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["deviceVersion"], 3);
        assert_eq!(resp.body["type"], "global");
    }

    #[test]
    fn status_route_reports_pending_after_save() {
        let api = api();
        api.handle("POST", "/slots", &save_body(1, &Grid::empty()));
        let resp = api.handle("GET", "/sync/status", b"");
        assert_eq!(resp.status, 200);
        assert_eq!(
            resp.body,
            json!({ "status": "pending", "webVersion": 1, "deviceVersion": 0 })
        );
    }

    #[test]
    fn empty_worker_pool_is_an_error() {
        assert!(matches!(require_workers(Vec::new()), Err(Error::Other(_))));

        let one = vec![thread::spawn(|| {})];
        let threads = require_workers(one).unwrap();
        assert_eq!(threads.len(), 1);
        for t in threads {
            t.join().unwrap();
        }
    }

    #[test]
    fn unknown_route_and_method() {
        let api = api();
        assert_eq!(api.handle("GET", "/nope", b"").status, 404);
        assert_eq!(api.handle("DELETE", "/slots", b"").status, 405);
        assert_eq!(api.handle("POST", "/sync/status", b"{}").status, 405);
    }
}
