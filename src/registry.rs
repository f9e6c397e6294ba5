//! Registry of the server handles known to a session.
//!
//! Each handle is stored together with its installation path, attribute
//! values and lifecycle slot, so deleting a handle discards its state in the
//! same critical section.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

use crate::bus::{Notification, NotificationBus};
use crate::capability::{CapabilityCatalog, ServerCapability, ServerDetails};
use crate::lifecycle::{discard_process, RuntimeSlot};
use crate::model::{
    CreateServerParams, CreateServerResponse, ServerHandle, ServerStateInfo, StatusCode,
    SERVER_HOME_DIR,
};

/// A registered server and its runtime bookkeeping.
#[derive(Debug)]
pub(crate) struct ServerRecord {
    pub(crate) handle: ServerHandle,
    pub(crate) home: PathBuf,
    pub(crate) attributes: Map<String, Value>,
    pub(crate) runtime: RuntimeSlot,
}

impl ServerRecord {
    /// Capability view of the server, with optional attribute defaults applied.
    pub(crate) fn details(&self, capability: &dyn ServerCapability) -> ServerDetails {
        let mut attributes = self.attributes.clone();
        capability.optional_attributes().apply_defaults(&mut attributes);
        ServerDetails {
            handle: self.handle.clone(),
            home: self.home.clone(),
            attributes,
        }
    }
}

pub(crate) type Records = IndexMap<String, ServerRecord>;

/// Owner of all server handles of a session.
///
/// Lifecycle epochs are drawn from one counter for the whole registry, so a
/// handle re-created under a freed id never shares an epoch with background
/// work of its predecessor.
#[derive(Debug)]
pub struct ServerRegistry {
    records: RwLock<Records>,
    epochs: AtomicU64,
    catalog: Arc<CapabilityCatalog>,
    bus: NotificationBus,
}

impl ServerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(catalog: Arc<CapabilityCatalog>, bus: NotificationBus) -> Self {
        Self {
            records: RwLock::new(IndexMap::new()),
            epochs: AtomicU64::new(0),
            catalog,
            bus,
        }
    }

    /// Registers a new server handle.
    ///
    /// Without an explicit type, the type is inferred by scanning
    /// `params.path`. The installation path is stored as the
    /// `server.home.dir` attribute and the attributes are validated against
    /// the type's schemas. Fails without side effects if `params.id` is
    /// already registered.
    pub async fn create(&self, params: &CreateServerParams) -> CreateServerResponse {
        if params.id.is_empty() {
            return CreateServerResponse::failed(StatusCode::invalid_request(
                "server id is empty",
            ));
        }
        if params.path.is_empty() {
            return CreateServerResponse::failed(StatusCode::invalid_request(
                "server path is empty",
            ));
        }

        let capability = match self.resolve_capability(params) {
            Ok(capability) => capability,
            Err(status) => return CreateServerResponse::failed(status),
        };

        let home = Path::new(&params.path);
        if !home.is_absolute() || !home.is_dir() {
            return CreateServerResponse::failed(StatusCode::error(format!(
                "Server home directory does not exist: {}",
                params.path
            )));
        }

        let mut attributes = params.attributes.clone();
        attributes.insert(SERVER_HOME_DIR.to_string(), Value::from(params.path.clone()));
        let valid = capability
            .required_attributes()
            .require_all(&attributes)
            .and_then(|()| capability.optional_attributes().check_types(&attributes));
        if let Err(e) = valid {
            return CreateServerResponse::failed(StatusCode::error(e.to_string()));
        }

        let handle = ServerHandle {
            id: params.id.clone(),
            server_type: capability.server_type().clone(),
        };

        let mut records = self.records.write().await;
        if records.contains_key(&params.id) {
            return CreateServerResponse::failed(StatusCode::error(format!(
                "Server with id {} already exists",
                params.id
            )));
        }
        records.insert(
            params.id.clone(),
            ServerRecord {
                handle: handle.clone(),
                home: home.to_path_buf(),
                attributes,
                runtime: RuntimeSlot::new(self.next_epoch()),
            },
        );

        info!(server = %handle.id, server_type = %handle.server_type.id, "Server created");
        self.bus.publish(Notification::ServerAdded(handle.clone()));
        CreateServerResponse {
            status: StatusCode::ok(),
            handle: Some(handle),
        }
    }

    fn resolve_capability(
        &self,
        params: &CreateServerParams,
    ) -> Result<Arc<dyn ServerCapability>, StatusCode> {
        let type_id = match params.server_type.as_deref().filter(|t| !t.is_empty()) {
            Some(type_id) => type_id.to_string(),
            None => self
                .catalog
                .detect(Path::new(&params.path))
                .filter(crate::model::ServerBean::is_recognised)
                .map(|bean| bean.server_adapter_type_id)
                .ok_or_else(|| StatusCode::error("Server Type null not found"))?,
        };
        self.catalog
            .get(&type_id)
            .ok_or_else(|| StatusCode::error(format!("Server Type {type_id} not found")))
    }

    /// Removes a server handle, matched by id.
    ///
    /// A still-running process of the server is terminated in the
    /// background; no further state events are published for it.
    pub async fn delete(&self, handle: &ServerHandle) -> StatusCode {
        let mut records = self.records.write().await;
        let Some(mut record) = records.shift_remove(&handle.id) else {
            return StatusCode::error(format!("Server not removed: {}", handle.id));
        };

        if record.runtime.process.is_some() {
            warn!(server = %handle.id, "Deleting server with a live process, terminating it");
            discard_process(&self.bus, &mut record);
        }

        info!(server = %handle.id, "Server deleted");
        self.bus.publish(Notification::ServerRemoved(record.handle));
        StatusCode::ok()
    }

    /// Snapshot of all handles, in creation order.
    pub async fn handles(&self) -> Vec<ServerHandle> {
        self.records
            .read()
            .await
            .values()
            .map(|r| r.handle.clone())
            .collect()
    }

    /// Current state of a handle, `None` if it does not exist.
    pub async fn state(&self, id: &str) -> Option<ServerStateInfo> {
        self.records.read().await.get(id).map(|r| ServerStateInfo {
            server: r.handle.clone(),
            state: r.runtime.state,
            run_mode: r.runtime.mode.clone(),
        })
    }

    /// A lifecycle epoch no record has held before.
    pub(crate) fn next_epoch(&self) -> u64 {
        self.epochs.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Records> {
        self.records.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Records> {
        self.records.write().await
    }
}
