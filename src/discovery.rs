//! Discovery path registry and server-bean scanning.
//!
//! Registry mutations are rejected with a [`StatusCode`]; scanning never
//! fails and answers "nothing found" with an empty sequence instead.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexSet;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::bus::{Notification, NotificationBus};
use crate::capability::CapabilityCatalog;
use crate::model::{DiscoveryPath, ServerBean, StatusCode};

/// The set of paths registered for scanning.
#[derive(Debug)]
pub struct DiscoveryRegistry {
    paths: RwLock<IndexSet<String>>,
    catalog: Arc<CapabilityCatalog>,
    bus: NotificationBus,
}

impl DiscoveryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(catalog: Arc<CapabilityCatalog>, bus: NotificationBus) -> Self {
        Self {
            paths: RwLock::new(IndexSet::new()),
            catalog,
            bus,
        }
    }

    /// Registers a path.
    ///
    /// The path must be absolute, exist, and not be registered yet.
    pub async fn add(&self, filepath: &str) -> StatusCode {
        if filepath.is_empty() {
            return StatusCode::invalid_request("discovery path is empty");
        }
        let path = Path::new(filepath);
        if !path.is_absolute() {
            return StatusCode::error(format!("Discovery path must be absolute: {filepath}"));
        }
        if !path.exists() {
            return StatusCode::error(format!("Discovery path does not exist: {filepath}"));
        }

        let mut paths = self.paths.write().await;
        if !paths.insert(filepath.to_string()) {
            return StatusCode::error(format!("Discovery path already added: {filepath}"));
        }

        info!(path = %filepath, "Discovery path added");
        self.bus
            .publish(Notification::DiscoveryPathAdded(DiscoveryPath::new(filepath)));
        StatusCode::ok()
    }

    /// Unregisters a path.
    pub async fn remove(&self, filepath: &str) -> StatusCode {
        let mut paths = self.paths.write().await;
        if !paths.shift_remove(filepath) {
            return StatusCode::error(format!("Discovery path not found: {filepath}"));
        }

        info!(path = %filepath, "Discovery path removed");
        self.bus
            .publish(Notification::DiscoveryPathRemoved(DiscoveryPath::new(filepath)));
        StatusCode::ok()
    }

    /// Snapshot of the registered paths, in registration order.
    pub async fn list(&self) -> Vec<DiscoveryPath> {
        self.paths
            .read()
            .await
            .iter()
            .map(DiscoveryPath::new)
            .collect()
    }

    /// Scans `filepath` for a server installation.
    ///
    /// Returns an empty sequence for an empty or relative path, the detected
    /// bean for a recognised installation, and a single `UNKNOWN` bean
    /// otherwise. Detection touches the filesystem and runs on the blocking
    /// pool.
    pub async fn find_server_beans(&self, filepath: &str) -> Vec<ServerBean> {
        if filepath.is_empty() || !Path::new(filepath).is_absolute() {
            debug!(path = %filepath, "Ignoring scan of non-absolute path");
            return Vec::new();
        }

        let catalog = Arc::clone(&self.catalog);
        let scanned = filepath.to_string();
        let detected = tokio::task::spawn_blocking(move || catalog.detect(Path::new(&scanned)))
            .await
            .unwrap_or_else(|e| {
                warn!(path = %filepath, error = %e, "Scan task failed");
                None
            });
        let bean = detected.unwrap_or_else(|| ServerBean::unknown(filepath));
        debug!(path = %filepath, category = %bean.type_category, "Scanned path");
        vec![bean]
    }
}
