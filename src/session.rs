//! Session-scoped state shared by every connection.
//!
//! A [`Session`] owns one instance of each registry plus the notification
//! bus. It is created at startup, handed to request handlers by `Arc`, and
//! discarded at shutdown. Each operation comes in a fire-and-return form;
//! the `*_and_wait` forms subscribe to the bus before issuing the call and
//! then wait for the terminal notification.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::bus::{Notification, NotificationBus, Subscription};
use crate::capability::CapabilityCatalog;
use crate::config::Config;
use crate::discovery::DiscoveryRegistry;
use crate::error::WaitError;
use crate::lifecycle::{Launcher, LifecycleSettings, LifecycleStateMachine, OsLauncher};
use crate::model::{
    Attributes, CommandLineDetails, CreateServerParams, CreateServerResponse, DiscoveryPath,
    LaunchAttributesRequest, LaunchMode, LaunchParameters, ServerBean, ServerHandle,
    ServerStartingAttributes, ServerState, ServerStateChange, ServerStateInfo, ServerType,
    StatusCode, StopServerAttributes,
};
use crate::registry::ServerRegistry;

/// All protocol state of one server process.
#[derive(Debug)]
pub struct Session {
    bus: NotificationBus,
    catalog: Arc<CapabilityCatalog>,
    discovery: DiscoveryRegistry,
    registry: Arc<ServerRegistry>,
    lifecycle: LifecycleStateMachine,
}

impl Session {
    /// Creates an empty session.
    #[must_use]
    pub fn new(
        catalog: CapabilityCatalog,
        launcher: Arc<dyn Launcher>,
        settings: LifecycleSettings,
    ) -> Self {
        let bus = NotificationBus::new();
        let catalog = Arc::new(catalog);
        let discovery = DiscoveryRegistry::new(Arc::clone(&catalog), bus.clone());
        let registry = Arc::new(ServerRegistry::new(Arc::clone(&catalog), bus.clone()));
        let lifecycle = LifecycleStateMachine::new(
            Arc::clone(&registry),
            Arc::clone(&catalog),
            launcher,
            bus.clone(),
            settings,
        );
        Self {
            bus,
            catalog,
            discovery,
            registry,
            lifecycle,
        }
    }

    /// Creates a session with the bundled capabilities and real processes.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(
            CapabilityCatalog::with_defaults(),
            Arc::new(OsLauncher),
            LifecycleSettings::default(),
        )
    }

    /// Creates a session from the configuration file.
    ///
    /// Configured discovery paths that cannot be added are logged and
    /// skipped.
    pub async fn from_config(config: &Config) -> Self {
        let session = Self::new(
            CapabilityCatalog::with_defaults(),
            Arc::new(OsLauncher),
            LifecycleSettings::from(&config.lifecycle),
        );
        for path in &config.discovery.paths {
            let status = session.discovery.add(path).await;
            if !status.is_ok() {
                warn!(path = %path, reason = %status.message, "Skipping configured discovery path");
            }
        }
        session
    }

    /// Subscribes to the notification bus.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// The session's notification bus.
    #[must_use]
    pub const fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    /// Registers a discovery path.
    pub async fn add_discovery_path(&self, path: &DiscoveryPath) -> StatusCode {
        self.discovery.add(&path.filepath).await
    }

    /// Unregisters a discovery path.
    pub async fn remove_discovery_path(&self, path: &DiscoveryPath) -> StatusCode {
        self.discovery.remove(&path.filepath).await
    }

    /// Registered discovery paths.
    pub async fn discovery_paths(&self) -> Vec<DiscoveryPath> {
        self.discovery.list().await
    }

    /// Scans a path for server installations.
    pub async fn find_server_beans(&self, path: &DiscoveryPath) -> Vec<ServerBean> {
        self.discovery.find_server_beans(&path.filepath).await
    }

    // ------------------------------------------------------------------
    // Server handles
    // ------------------------------------------------------------------

    /// Known server types.
    #[must_use]
    pub fn server_types(&self) -> Vec<ServerType> {
        self.catalog.server_types()
    }

    /// Registered server handles.
    pub async fn server_handles(&self) -> Vec<ServerHandle> {
        self.registry.handles().await
    }

    /// Registers a server handle.
    pub async fn create_server(&self, params: &CreateServerParams) -> CreateServerResponse {
        self.registry.create(params).await
    }

    /// Removes a server handle.
    pub async fn delete_server(&self, handle: &ServerHandle) -> StatusCode {
        self.registry.delete(handle).await
    }

    /// Current state of a server.
    pub async fn server_state(&self, handle: &ServerHandle) -> Option<ServerStateInfo> {
        self.lifecycle.server_state(&handle.id).await
    }

    // ------------------------------------------------------------------
    // Capability lookups
    // ------------------------------------------------------------------

    /// Launch modes of a type.
    #[must_use]
    pub fn launch_modes(&self, server_type: &ServerType) -> Option<Vec<LaunchMode>> {
        self.catalog.launch_modes(&server_type.id)
    }

    /// Required server attributes of a type.
    #[must_use]
    pub fn required_attributes(&self, server_type: &ServerType) -> Option<Attributes> {
        self.catalog.required_attributes(&server_type.id)
    }

    /// Optional server attributes of a type.
    #[must_use]
    pub fn optional_attributes(&self, server_type: &ServerType) -> Option<Attributes> {
        self.catalog.optional_attributes(&server_type.id)
    }

    /// Required launch attributes of a type and mode.
    #[must_use]
    pub fn required_launch_attributes(&self, request: &LaunchAttributesRequest) -> Option<Attributes> {
        self.catalog
            .required_launch_attributes(&request.server_type_id, &request.mode)
    }

    /// Optional launch attributes of a type and mode.
    #[must_use]
    pub fn optional_launch_attributes(&self, request: &LaunchAttributesRequest) -> Option<Attributes> {
        self.catalog
            .optional_launch_attributes(&request.server_type_id, &request.mode)
    }

    /// Command line a launch would run.
    pub async fn launch_command(&self, params: &LaunchParameters) -> Option<CommandLineDetails> {
        self.lifecycle.launch_command(params).await
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Accepts a managed launch.
    pub async fn start_server(&self, params: &LaunchParameters) -> StatusCode {
        self.lifecycle.start_server(params).await
    }

    /// Accepts a stop.
    pub async fn stop_server(&self, attrs: &StopServerAttributes) -> StatusCode {
        self.lifecycle.stop_server(attrs).await
    }

    /// Records a client-driven start in progress.
    pub async fn server_starting_by_client(&self, attrs: &ServerStartingAttributes) -> StatusCode {
        self.lifecycle.server_starting_by_client(attrs).await
    }

    /// Records a client-driven start that completed.
    pub async fn server_started_by_client(&self, params: &LaunchParameters) -> StatusCode {
        self.lifecycle.server_started_by_client(params).await
    }

    /// Force-stops every server.
    pub async fn shutdown(&self) {
        info!("Shutting down session");
        self.lifecycle.stop_all().await;
    }

    // ------------------------------------------------------------------
    // Waiting forms
    // ------------------------------------------------------------------

    /// Creates a server and waits for its `serverAdded` notification.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] if the creation fails, or the
    /// [`Subscription::wait_for`] errors.
    pub async fn create_server_and_wait(
        &self,
        params: &CreateServerParams,
        timeout: Duration,
    ) -> Result<ServerHandle, WaitError> {
        let mut subscription = self.subscribe();
        let response = self.create_server(params).await;
        if !response.status.is_ok() {
            return Err(WaitError::Rejected(response.status));
        }
        subscription
            .wait_for(
                |event| match event {
                    Notification::ServerAdded(handle) if handle.id == params.id => {
                        Some(handle.clone())
                    }
                    _ => None,
                },
                timeout,
            )
            .await
    }

    /// Deletes a server and waits for its `serverRemoved` notification.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] if the deletion fails, or the
    /// [`Subscription::wait_for`] errors.
    pub async fn delete_server_and_wait(
        &self,
        handle: &ServerHandle,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let mut subscription = self.subscribe();
        let status = self.delete_server(handle).await;
        if !status.is_ok() {
            return Err(WaitError::Rejected(status));
        }
        subscription
            .wait_for(
                |event| match event {
                    Notification::ServerRemoved(removed) if removed.id == handle.id => Some(()),
                    _ => None,
                },
                timeout,
            )
            .await
    }

    /// Starts a server and waits until it is `STARTED`.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] if the start is not accepted and
    /// [`WaitError::Interrupted`] if the launch fails.
    pub async fn start_server_and_wait(
        &self,
        params: &LaunchParameters,
        timeout: Duration,
    ) -> Result<ServerStateChange, WaitError> {
        let mut subscription = self.subscribe();
        let status = self.start_server(params).await;
        if !status.is_ok() {
            return Err(WaitError::Rejected(status));
        }
        subscription
            .wait_for_state(&params.params.id, ServerState::Started, timeout)
            .await
    }

    /// Stops a server and waits until it is `STOPPED`.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] if the stop is not accepted.
    pub async fn stop_server_and_wait(
        &self,
        attrs: &StopServerAttributes,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        let mut subscription = self.subscribe();
        let status = self.stop_server(attrs).await;
        if !status.is_ok() {
            return Err(WaitError::Rejected(status));
        }
        // A forced stop of a stopped server publishes nothing
        if self
            .lifecycle
            .server_state(&attrs.id)
            .await
            .is_some_and(|info| info.state == ServerState::Stopped)
        {
            return Ok(());
        }
        subscription
            .wait_for_state(&attrs.id, ServerState::Stopped, timeout)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::wildfly::WILDFLY_TYPE_ID;
    use crate::config::Config;

    fn wildfly_home() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("jboss-modules.jar"), b"").unwrap();
        std::fs::write(dir.path().join("bin/standalone.sh"), b"#!/bin/sh\n").unwrap();
        std::fs::write(dir.path().join("version.txt"), "WildFly Full 18.0.1.Final\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn from_config_seeds_valid_discovery_paths() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().to_string_lossy().into_owned();
        let config: Config = serde_json::from_value(serde_json::json!({
            "discovery": { "paths": [good, "/definitely/not/here/rsp"] }
        }))
        .unwrap();

        let session = Session::from_config(&config).await;
        assert_eq!(
            session.discovery_paths().await,
            vec![DiscoveryPath::new(dir.path().to_string_lossy())]
        );
    }

    #[tokio::test]
    async fn create_and_delete_wait_for_their_events() {
        let session = Session::with_defaults();
        let home = wildfly_home();
        let timeout = Duration::from_secs(1);

        let handle = session
            .create_server_and_wait(
                &CreateServerParams::new(home.path().to_string_lossy(), "wf"),
                timeout,
            )
            .await
            .unwrap();
        assert_eq!(handle.server_type.id, WILDFLY_TYPE_ID);

        session.delete_server_and_wait(&handle, timeout).await.unwrap();
        let err = session
            .delete_server_and_wait(&handle, timeout)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WaitError::Rejected(StatusCode::error("Server not removed: wf"))
        );
    }

    #[tokio::test]
    async fn waiting_start_on_missing_server_is_rejected() {
        let session = Session::with_defaults();
        let handle = ServerHandle {
            id: "ghost".to_string(),
            server_type: ServerType::default(),
        };
        let err = session
            .start_server_and_wait(&LaunchParameters::new(&handle, "run"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WaitError::Rejected(StatusCode::server_not_found("ghost"))
        );
    }

    #[tokio::test]
    async fn forced_stop_of_stopped_server_returns_immediately() {
        let session = Session::with_defaults();
        let home = wildfly_home();
        session
            .create_server(&CreateServerParams::new(home.path().to_string_lossy(), "wf"))
            .await;

        session
            .stop_server_and_wait(
                &StopServerAttributes {
                    id: "wf".to_string(),
                    force: true,
                },
                Duration::from_millis(10),
            )
            .await
            .unwrap();
    }

    #[test]
    fn schema_lookups_by_type() {
        let session = Session::with_defaults();
        let wildfly = ServerType {
            id: WILDFLY_TYPE_ID.to_string(),
            ..ServerType::default()
        };
        assert_eq!(session.launch_modes(&wildfly).unwrap().len(), 2);
        assert!(session.required_attributes(&wildfly).is_some());
        assert!(session
            .launch_modes(&ServerType {
                id: "nope".to_string(),
                ..ServerType::default()
            })
            .is_none());
        assert!(session
            .required_launch_attributes(&LaunchAttributesRequest {
                server_type_id: WILDFLY_TYPE_ID.to_string(),
                mode: "debug".to_string(),
            })
            .is_some());
    }
}
