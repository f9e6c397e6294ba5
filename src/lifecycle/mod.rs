//! Per-server run state and the transitions between states.
//!
//! Every transition happens while holding the registry write guard and
//! publishes its `serverStateChange` before the guard is released, so the
//! events of one server reach subscribers in transition order.
//!
//! Launches, stops and client-requested polling run as background tasks.
//! Each accepted transition gives the server a fresh epoch from the
//! registry; a background task only applies a transition while the epoch
//! it was started under is still current, so a later stop or delete always
//! supersedes pending work, even if the id is re-created meanwhile.
//!
//! ```text
//!   STOPPED ──start──▶ STARTING ──alive after grace──▶ STARTED
//!      ▲                   │                              │
//!      │             launch failed                   stop / exit
//!      │                   ▼                              ▼
//!      └────────────── STOPPED ◀──── terminated ──── STOPPING
//! ```

pub mod launcher;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{Notification, NotificationBus};
use crate::capability::{CapabilityCatalog, ServerCapability, ServerDetails};
use crate::config::LifecycleConfig;
use crate::error::LaunchError;
use crate::model::{
    CommandLineDetails, LaunchParameters, ServerHandle, ServerProcess, ServerStartingAttributes,
    ServerState, ServerStateChange, ServerStateInfo, StatusCode, StopServerAttributes,
};
use crate::registry::{Records, ServerRecord, ServerRegistry};

pub use launcher::{Launcher, OsLauncher, RunningProcess, TERMINATE_GRACE};

/// Timing of managed launches and polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// How long a launched process must stay alive to count as started.
    pub startup_grace: Duration,
    /// Interval between liveness checks.
    pub poll_interval: Duration,
    /// How long client-requested polling waits for a response.
    pub startup_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from(&LifecycleConfig::default())
    }
}

impl From<&LifecycleConfig> for LifecycleSettings {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            startup_grace: Duration::from_millis(config.startup_grace_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            startup_timeout: Duration::from_millis(config.startup_timeout_ms),
        }
    }
}

/// Runtime bookkeeping of one server handle.
pub(crate) struct RuntimeSlot {
    pub(crate) state: ServerState,
    pub(crate) mode: Option<String>,
    pub(crate) process: Option<Box<dyn RunningProcess>>,
    pub(crate) epoch: u64,
}

impl RuntimeSlot {
    /// A stopped slot starting at `epoch`.
    pub(crate) const fn new(epoch: u64) -> Self {
        Self {
            state: ServerState::Stopped,
            mode: None,
            process: None,
            epoch,
        }
    }
}

impl std::fmt::Debug for RuntimeSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeSlot")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("process", &self.process.as_ref().map(|p| p.id()))
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Sets the state of `record` and publishes the change.
fn enter(bus: &NotificationBus, record: &mut ServerRecord, state: ServerState) {
    record.runtime.state = state;
    info!(server = %record.handle.id, %state, "Server state changed");
    bus.publish(Notification::ServerStateChange(ServerStateChange {
        server: record.handle.clone(),
        state,
    }));
}

/// The record of `id`, if it still belongs to `epoch`.
fn current<'a>(records: &'a mut Records, id: &str, epoch: u64) -> Option<&'a mut ServerRecord> {
    records
        .get_mut(id)
        .filter(|record| record.runtime.epoch == epoch)
}

/// Takes the process of `record`, announces its termination and stops it in
/// the background.
pub(crate) fn discard_process(bus: &NotificationBus, record: &mut ServerRecord) {
    let Some(mut process) = record.runtime.process.take() else {
        return;
    };
    bus.publish(Notification::ServerProcessTerminated(ServerProcess {
        server: record.handle.clone(),
        process_id: process.id(),
    }));
    let id = record.handle.id.clone();
    tokio::spawn(async move {
        if let Err(e) = process.terminate().await {
            warn!(server = %id, error = %e, "Failed to terminate server process");
        }
    });
}

fn process_exited(record: &mut ServerRecord) -> bool {
    record.runtime.process.as_mut().map_or(true, |process| {
        process.has_exited().unwrap_or_else(|e| {
            warn!(server = %record.handle.id, error = %e, "Cannot query server process, assuming it exited");
            true
        })
    })
}

/// Drives the run state of every server in a registry.
#[derive(Clone)]
pub struct LifecycleStateMachine {
    registry: Arc<ServerRegistry>,
    catalog: Arc<CapabilityCatalog>,
    launcher: Arc<dyn Launcher>,
    bus: NotificationBus,
    settings: LifecycleSettings,
}

impl LifecycleStateMachine {
    /// Creates a state machine over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<ServerRegistry>,
        catalog: Arc<CapabilityCatalog>,
        launcher: Arc<dyn Launcher>,
        bus: NotificationBus,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            registry,
            catalog,
            launcher,
            bus,
            settings,
        }
    }

    /// Timing in effect.
    #[must_use]
    pub const fn settings(&self) -> LifecycleSettings {
        self.settings
    }

    /// Accepts a managed launch of a stopped server.
    ///
    /// The launch is validated before any transition. On acceptance the
    /// server enters `STARTING` and the process is spawned in the
    /// background; `STARTED` (or `STOPPED` on failure) follows as a
    /// notification.
    pub async fn start_server(&self, params: &LaunchParameters) -> StatusCode {
        let id = params.params.id.as_str();
        if id.is_empty() {
            return StatusCode::invalid_request("server id is empty");
        }

        let mut records = self.registry.write().await;
        let Some(record) = records.get_mut(id) else {
            return StatusCode::server_not_found(id);
        };
        if record.runtime.state != ServerState::Stopped {
            return StatusCode::error(format!(
                "Server {id} is already {}",
                record.runtime.state.describe()
            ));
        }

        let command = match self.prepare_launch(record, params) {
            Ok(command) => command,
            Err(e) => {
                debug!(server = %id, error = %e, "Rejected launch");
                return StatusCode::error(e.to_string());
            }
        };

        record.runtime.epoch = self.registry.next_epoch();
        record.runtime.mode = Some(params.mode.clone());
        let epoch = record.runtime.epoch;
        let handle = record.handle.clone();
        enter(&self.bus, record, ServerState::Starting);
        drop(records);

        let machine = self.clone();
        tokio::spawn(async move { machine.run_launch(handle, epoch, command).await });
        StatusCode::ok()
    }

    /// Builds the command a launch of `params` would run, without launching.
    ///
    /// Returns `None` if the handle does not exist or the launch is invalid.
    pub async fn launch_command(&self, params: &LaunchParameters) -> Option<CommandLineDetails> {
        let records = self.registry.read().await;
        let record = records.get(&params.params.id)?;
        self.prepare_launch(record, params)
            .map_err(|e| debug!(server = %record.handle.id, error = %e, "No launch command"))
            .ok()
    }

    fn prepare_launch(
        &self,
        record: &ServerRecord,
        params: &LaunchParameters,
    ) -> Result<CommandLineDetails, LaunchError> {
        let type_id = &record.handle.server_type.id;
        let capability = self
            .catalog
            .get(type_id)
            .ok_or_else(|| LaunchError::UnknownType {
                server_type: type_id.clone(),
            })?;
        let mode = params.mode.as_str();
        if !capability.supports_mode(mode) {
            return Err(LaunchError::UnsupportedMode {
                mode: mode.to_string(),
                server_type: type_id.clone(),
            });
        }

        let required = capability
            .required_launch_attributes(mode)
            .unwrap_or_default();
        let optional = capability
            .optional_launch_attributes(mode)
            .unwrap_or_default();
        let mut attributes: Map<String, Value> = params.params.attributes.clone();
        required.apply_defaults(&mut attributes);
        optional.apply_defaults(&mut attributes);
        required.require_all(&attributes)?;
        required.check_types(&attributes)?;
        optional.check_types(&attributes)?;

        capability.launch_command(&record.details(capability.as_ref()), mode, &attributes)
    }

    async fn run_launch(self, handle: ServerHandle, epoch: u64, command: CommandLineDetails) {
        let process = match self.launcher.launch(&command) {
            Ok(process) => process,
            Err(e) => {
                warn!(server = %handle.id, error = %e, "Failed to launch server");
                self.settle_stopped(&handle, epoch, None).await;
                return;
            }
        };

        {
            let mut records = self.registry.write().await;
            let Some(record) = current(&mut records, &handle.id, epoch) else {
                debug!(server = %handle.id, "Launch superseded, terminating process");
                terminate_detached(handle.id.clone(), process);
                return;
            };
            let created = ServerProcess {
                server: record.handle.clone(),
                process_id: process.id(),
            };
            record.runtime.process = Some(process);
            self.bus.publish(Notification::ServerProcessCreated(created));
        }

        tokio::time::sleep(self.settings.startup_grace).await;

        {
            let mut records = self.registry.write().await;
            let Some(record) = current(&mut records, &handle.id, epoch) else {
                return;
            };
            if process_exited(record) {
                info!(server = %handle.id, "Server process exited during startup");
                self.release_process(record);
                enter(&self.bus, record, ServerState::Stopped);
                return;
            }
            if record.runtime.state == ServerState::Starting {
                enter(&self.bus, record, ServerState::Started);
            }
        }

        self.monitor(&handle.id, epoch).await;
    }

    /// Polls a running process until it exits or the epoch moves on.
    async fn monitor(&self, id: &str, epoch: u64) {
        loop {
            tokio::time::sleep(self.settings.poll_interval).await;

            let mut records = self.registry.write().await;
            let Some(record) = current(&mut records, id, epoch) else {
                return;
            };
            if process_exited(record) {
                info!(server = %id, "Server process exited");
                self.release_process(record);
                enter(&self.bus, record, ServerState::Stopped);
                return;
            }
        }
    }

    /// Drops the process of `record` and announces its termination.
    fn release_process(&self, record: &mut ServerRecord) {
        if let Some(process) = record.runtime.process.take() {
            self.bus
                .publish(Notification::ServerProcessTerminated(ServerProcess {
                    server: record.handle.clone(),
                    process_id: process.id(),
                }));
        }
    }

    async fn settle_stopped(
        &self,
        handle: &ServerHandle,
        epoch: u64,
        terminated: Option<ServerProcess>,
    ) {
        let mut records = self.registry.write().await;
        if let Some(process) = terminated {
            self.bus
                .publish(Notification::ServerProcessTerminated(process));
        }
        if let Some(record) = current(&mut records, &handle.id, epoch) {
            if record.runtime.state != ServerState::Stopped {
                enter(&self.bus, record, ServerState::Stopped);
            }
        }
    }

    /// Accepts a stop.
    ///
    /// Without `force`, only a `STARTED` server can be stopped. A forced
    /// stop of a server that is already stopped succeeds without events.
    pub async fn stop_server(&self, attrs: &StopServerAttributes) -> StatusCode {
        let id = attrs.id.as_str();
        if id.is_empty() {
            return StatusCode::invalid_request("server id is empty");
        }

        let mut records = self.registry.write().await;
        let Some(record) = records.get_mut(id) else {
            return StatusCode::server_not_found(id);
        };

        let state = record.runtime.state;
        match state {
            ServerState::Started => {}
            ServerState::Stopped if attrs.force => {
                debug!(server = %id, "Forced stop of a stopped server");
                discard_process(&self.bus, record);
                return StatusCode::ok();
            }
            ServerState::Stopped => {
                return StatusCode::error(format!("Server {id} is already stopped"));
            }
            _ if attrs.force => {}
            _ => {
                return StatusCode::error(format!(
                    "Server {id} cannot be stopped while {}",
                    state.describe()
                ));
            }
        }

        record.runtime.epoch = self.registry.next_epoch();
        let epoch = record.runtime.epoch;
        let handle = record.handle.clone();
        let process = record.runtime.process.take();
        if state != ServerState::Stopping {
            enter(&self.bus, record, ServerState::Stopping);
        }
        drop(records);

        let machine = self.clone();
        tokio::spawn(async move { machine.run_stop(handle, epoch, process).await });
        StatusCode::ok()
    }

    async fn run_stop(
        self,
        handle: ServerHandle,
        epoch: u64,
        process: Option<Box<dyn RunningProcess>>,
    ) {
        let terminated = match process {
            Some(process) => Some(terminate(&handle, process).await),
            None => None,
        };
        self.settle_stopped(&handle, epoch, terminated).await;
    }

    /// Records that a client is starting the server itself.
    ///
    /// With `initiate_polling`, the capability is asked repeatedly whether
    /// the runtime responds; it becomes `STARTED` when it does, `STOPPED`
    /// when the startup timeout elapses first.
    pub async fn server_starting_by_client(&self, attrs: &ServerStartingAttributes) -> StatusCode {
        let id = attrs.request.params.id.as_str();
        if id.is_empty() {
            return StatusCode::invalid_request("server id is empty");
        }

        let mut records = self.registry.write().await;
        let Some(record) = records.get_mut(id) else {
            return StatusCode::server_not_found(id);
        };

        let capability = if attrs.initiate_polling {
            let type_id = &record.handle.server_type.id;
            let Some(capability) = self.catalog.get(type_id) else {
                return StatusCode::error(format!("Server Type {type_id} not found"));
            };
            Some(capability)
        } else {
            None
        };

        match record.runtime.state {
            ServerState::Stopped => {
                record.runtime.epoch = self.registry.next_epoch();
                record.runtime.mode = Some(attrs.request.mode.clone());
                enter(&self.bus, record, ServerState::Starting);
            }
            ServerState::Starting if record.runtime.process.is_some() => {
                return StatusCode::error(format!("Server {id} is already being launched"));
            }
            ServerState::Starting => {}
            state => {
                return StatusCode::error(format!(
                    "Server {id} cannot be marked starting while {}",
                    state.describe()
                ));
            }
        }

        if let Some(capability) = capability {
            let details = record.details(capability.as_ref());
            let epoch = record.runtime.epoch;
            drop(records);

            let machine = self.clone();
            tokio::spawn(async move { machine.poll_until_responding(epoch, capability, details).await });
        }
        StatusCode::ok()
    }

    async fn poll_until_responding(
        self,
        epoch: u64,
        capability: Arc<dyn ServerCapability>,
        details: ServerDetails,
    ) {
        let id = details.handle.id.clone();
        let deadline = Instant::now() + self.settings.startup_timeout;
        loop {
            let probe_capability = Arc::clone(&capability);
            let probe_details = details.clone();
            let responding = tokio::task::spawn_blocking(move || {
                probe_capability.is_responding(&probe_details)
            })
            .await
            .unwrap_or(false);

            let mut records = self.registry.write().await;
            let Some(record) = current(&mut records, &id, epoch) else {
                return;
            };
            if record.runtime.state != ServerState::Starting {
                return;
            }
            if responding {
                enter(&self.bus, record, ServerState::Started);
                return;
            }
            if Instant::now() >= deadline {
                warn!(server = %id, timeout = ?self.settings.startup_timeout, "Server did not respond in time");
                record.runtime.epoch = self.registry.next_epoch();
                discard_process(&self.bus, record);
                enter(&self.bus, record, ServerState::Stopped);
                return;
            }
            drop(records);

            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    /// Records that a client has started the server itself.
    pub async fn server_started_by_client(&self, params: &LaunchParameters) -> StatusCode {
        let id = params.params.id.as_str();
        if id.is_empty() {
            return StatusCode::invalid_request("server id is empty");
        }

        let mut records = self.registry.write().await;
        let Some(record) = records.get_mut(id) else {
            return StatusCode::server_not_found(id);
        };

        match record.runtime.state {
            ServerState::Started => {}
            ServerState::Starting => {
                record.runtime.mode = Some(params.mode.clone());
                enter(&self.bus, record, ServerState::Started);
            }
            ServerState::Stopped => {
                record.runtime.epoch = self.registry.next_epoch();
                record.runtime.mode = Some(params.mode.clone());
                enter(&self.bus, record, ServerState::Started);
            }
            state => {
                return StatusCode::error(format!(
                    "Server {id} cannot be marked started while {}",
                    state.describe()
                ));
            }
        }
        StatusCode::ok()
    }

    /// Current state of a server, `None` if the handle does not exist.
    pub async fn server_state(&self, id: &str) -> Option<ServerStateInfo> {
        self.registry.state(id).await
    }

    /// Stops every server that is not stopped and waits for their processes.
    ///
    /// Used on shutdown; each affected server publishes `STOPPING` and
    /// `STOPPED`.
    pub async fn stop_all(&self) {
        let mut processes = Vec::new();
        {
            let mut records = self.registry.write().await;
            for record in records.values_mut() {
                if record.runtime.state == ServerState::Stopped && record.runtime.process.is_none() {
                    continue;
                }
                record.runtime.epoch = self.registry.next_epoch();
                if record.runtime.state != ServerState::Stopping {
                    enter(&self.bus, record, ServerState::Stopping);
                }
                if let Some(process) = record.runtime.process.take() {
                    processes.push((record.handle.clone(), process));
                }
            }
        }

        // Each process gets its own SIGTERM grace period, concurrently
        let count = processes.len();
        let mut stopping = JoinSet::new();
        for (handle, process) in processes {
            stopping.spawn(async move { terminate(&handle, process).await });
        }
        let mut terminated = Vec::with_capacity(count);
        while let Some(result) = stopping.join_next().await {
            match result {
                Ok(process) => terminated.push(process),
                Err(e) => warn!(error = %e, "Terminate task failed"),
            }
        }

        let mut records = self.registry.write().await;
        for process in terminated {
            self.bus
                .publish(Notification::ServerProcessTerminated(process));
        }
        for record in records.values_mut() {
            if record.runtime.state == ServerState::Stopping {
                enter(&self.bus, record, ServerState::Stopped);
            }
        }
        info!(processes = count, "Stopped all servers");
    }
}

impl std::fmt::Debug for LifecycleStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleStateMachine")
            .field("catalog", &self.catalog)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Stops `process` and describes it for the bus.
async fn terminate(handle: &ServerHandle, mut process: Box<dyn RunningProcess>) -> ServerProcess {
    let process_id = process.id();
    match process.terminate().await {
        Ok(()) => debug!(server = %handle.id, pid = %process_id, "Server process terminated"),
        Err(e) => warn!(server = %handle.id, error = %e, "Failed to terminate server process"),
    }
    ServerProcess {
        server: handle.clone(),
        process_id,
    }
}

fn terminate_detached(id: String, mut process: Box<dyn RunningProcess>) {
    tokio::spawn(async move {
        if let Err(e) = process.terminate().await {
            warn!(server = %id, error = %e, "Failed to terminate superseded process");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::bus::Subscription;
    use crate::capability::wildfly::{ATTR_DEBUG_PORT, ATTR_HTTP_PORT};
    use crate::model::CreateServerParams;

    struct FakeProcess {
        alive: Arc<AtomicBool>,
    }

    #[async_trait]
    impl RunningProcess for FakeProcess {
        fn id(&self) -> String {
            "4242".to_string()
        }

        fn has_exited(&mut self) -> io::Result<bool> {
            Ok(!self.alive.load(Ordering::SeqCst))
        }

        async fn terminate(&mut self) -> io::Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        alive: Arc<AtomicBool>,
        launches: AtomicUsize,
        fail: bool,
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, _details: &CommandLineDetails) -> io::Result<Box<dyn RunningProcess>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            }
            self.alive.store(true, Ordering::SeqCst);
            Ok(Box::new(FakeProcess {
                alive: Arc::clone(&self.alive),
            }))
        }
    }

    fn settings() -> LifecycleSettings {
        LifecycleSettings {
            startup_grace: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            startup_timeout: Duration::from_millis(50),
        }
    }

    struct Fixture {
        machine: LifecycleStateMachine,
        launcher: Arc<FakeLauncher>,
        bus: NotificationBus,
        handle: ServerHandle,
        home: tempfile::TempDir,
    }

    fn create_params(home: &Path) -> CreateServerParams {
        CreateServerParams::new(home.to_string_lossy(), "wf")
            .with_type("wildfly")
            .with_attribute(ATTR_HTTP_PORT, 1.into())
    }

    async fn fixture(launcher: FakeLauncher) -> Fixture {
        let home = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(home.path().join("bin")).unwrap();
        std::fs::write(home.path().join("jboss-modules.jar"), b"").unwrap();
        std::fs::write(home.path().join("bin/standalone.sh"), b"#!/bin/sh\n").unwrap();

        let bus = NotificationBus::new();
        let catalog = Arc::new(CapabilityCatalog::with_defaults());
        let registry = Arc::new(ServerRegistry::new(Arc::clone(&catalog), bus.clone()));
        let handle = registry
            .create(&create_params(home.path()))
            .await
            .handle
            .unwrap();

        let launcher = Arc::new(launcher);
        let machine = LifecycleStateMachine::new(
            registry,
            catalog,
            Arc::clone(&launcher) as Arc<dyn Launcher>,
            bus.clone(),
            settings(),
        );
        Fixture {
            machine,
            launcher,
            bus,
            handle,
            home,
        }
    }

    async fn states(sub: &mut Subscription, count: usize) -> Vec<ServerState> {
        let mut seen = Vec::new();
        while seen.len() < count {
            let event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
                .await
                .unwrap()
                .unwrap();
            if let Notification::ServerStateChange(change) = event {
                seen.push(change.state);
            }
        }
        seen
    }

    #[tokio::test]
    async fn start_then_stop_publishes_states_in_order() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();

        let status = f.machine.start_server(&LaunchParameters::new(&f.handle, "run")).await;
        assert!(status.is_ok());
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Starting, ServerState::Started]
        );
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 1);

        let status = f
            .machine
            .stop_server(&StopServerAttributes {
                id: "wf".to_string(),
                force: false,
            })
            .await;
        assert!(status.is_ok());
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Stopping, ServerState::Stopped]
        );
        assert!(!f.launcher.alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn start_on_unknown_handle_is_rejected_without_events() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();
        let mut missing = f.handle.clone();
        missing.id = "missing".to_string();

        let status = f.machine.start_server(&LaunchParameters::new(&missing, "run")).await;
        assert_eq!(status.message, "Server missing does not exist");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let f = fixture(FakeLauncher::default()).await;
        let params = LaunchParameters::new(&f.handle, "run");
        assert!(f.machine.start_server(&params).await.is_ok());

        let again = f.machine.start_server(&params).await;
        assert!(!again.is_ok());
        assert!(again.message.starts_with("Server wf is already "));
    }

    #[tokio::test]
    async fn invalid_launch_makes_no_transition() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();

        let status = f.machine.start_server(&LaunchParameters::new(&f.handle, "profile")).await;
        assert_eq!(
            status.message,
            "Launch mode profile is not supported by server type wildfly"
        );

        let status = f.machine.start_server(&LaunchParameters::new(&f.handle, "debug")).await;
        assert_eq!(status.message, "Missing required attribute: debug.port");

        assert!(sub.try_recv().is_none());
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn debug_launch_with_port_is_accepted() {
        let f = fixture(FakeLauncher::default()).await;
        let params =
            LaunchParameters::new(&f.handle, "debug").with_attribute(ATTR_DEBUG_PORT, 8787.into());
        let command = f.machine.launch_command(&params).await.unwrap();
        assert!(command.cmd_line.iter().any(|arg| arg == "--debug"));
        assert!(f.machine.start_server(&params).await.is_ok());
        let state = f.machine.server_state("wf").await.unwrap();
        assert_eq!(state.run_mode.as_deref(), Some("debug"));
    }

    #[tokio::test]
    async fn failed_launch_settles_stopped() {
        let f = fixture(FakeLauncher {
            fail: true,
            ..FakeLauncher::default()
        })
        .await;
        let mut sub = f.bus.subscribe();

        assert!(f.machine.start_server(&LaunchParameters::new(&f.handle, "run")).await.is_ok());
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Starting, ServerState::Stopped]
        );
    }

    #[tokio::test]
    async fn process_exit_is_a_server_initiated_stop() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();
        assert!(f.machine.start_server(&LaunchParameters::new(&f.handle, "run")).await.is_ok());
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Starting, ServerState::Started]
        );

        f.launcher.alive.store(false, Ordering::SeqCst);
        assert_eq!(states(&mut sub, 1).await, vec![ServerState::Stopped]);
    }

    #[tokio::test]
    async fn stop_rules_without_force() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();

        let stopped = f
            .machine
            .stop_server(&StopServerAttributes {
                id: "wf".to_string(),
                force: false,
            })
            .await;
        assert_eq!(stopped.message, "Server wf is already stopped");

        let forced = f
            .machine
            .stop_server(&StopServerAttributes {
                id: "wf".to_string(),
                force: true,
            })
            .await;
        assert!(forced.is_ok());
        assert!(sub.try_recv().is_none());

        let missing = f
            .machine
            .stop_server(&StopServerAttributes {
                id: "nope".to_string(),
                force: true,
            })
            .await;
        assert_eq!(missing.message, "Server nope does not exist");
    }

    #[tokio::test]
    async fn forced_stop_supersedes_pending_launch() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();
        assert!(f.machine.start_server(&LaunchParameters::new(&f.handle, "run")).await.is_ok());

        let status = f
            .machine
            .stop_server(&StopServerAttributes {
                id: "wf".to_string(),
                force: true,
            })
            .await;
        assert!(status.is_ok());
        assert_eq!(
            states(&mut sub, 3).await,
            vec![ServerState::Starting, ServerState::Stopping, ServerState::Stopped]
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            f.machine.server_state("wf").await.unwrap().state,
            ServerState::Stopped
        );
    }

    #[tokio::test]
    async fn client_asserted_transitions() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();
        let request = LaunchParameters::new(&f.handle, "run");

        let starting = f
            .machine
            .server_starting_by_client(&ServerStartingAttributes {
                initiate_polling: false,
                request: request.clone(),
            })
            .await;
        assert!(starting.is_ok());
        assert!(f.machine.server_started_by_client(&request).await.is_ok());
        assert!(f.machine.server_started_by_client(&request).await.is_ok());

        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Starting, ServerState::Started]
        );
        assert!(sub.try_recv().is_none());
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn polling_without_response_times_out_to_stopped() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();
        let status = f
            .machine
            .server_starting_by_client(&ServerStartingAttributes {
                initiate_polling: true,
                request: LaunchParameters::new(&f.handle, "run"),
            })
            .await;
        assert!(status.is_ok());
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Starting, ServerState::Stopped]
        );
    }

    /// The fixture's machine with a startup grace long enough to act within.
    fn slow_start(machine: &LifecycleStateMachine) -> LifecycleStateMachine {
        LifecycleStateMachine {
            settings: LifecycleSettings {
                startup_grace: Duration::from_millis(200),
                ..settings()
            },
            ..machine.clone()
        }
    }

    fn remaining_states(sub: &mut Subscription) -> Vec<ServerState> {
        std::iter::from_fn(|| sub.try_recv())
            .filter_map(|event| match event {
                Notification::ServerStateChange(change) => Some(change.state),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn recreated_handle_ignores_work_of_deleted_one() {
        let f = fixture(FakeLauncher::default()).await;
        let machine = slow_start(&f.machine);
        let mut sub = f.bus.subscribe();
        assert!(machine.start_server(&LaunchParameters::new(&f.handle, "run")).await.is_ok());
        sub.wait_for(
            |event| matches!(event, Notification::ServerProcessCreated(_)).then_some(()),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        // Delete within the startup grace, then reuse the id at once
        assert!(machine.registry.delete(&f.handle).await.is_ok());
        tokio::time::sleep(Duration::from_millis(2)).await;
        let handle = machine
            .registry
            .create(&create_params(f.home.path()))
            .await
            .handle
            .unwrap();
        assert!(machine.start_server(&LaunchParameters::new(&handle, "run")).await.is_ok());
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Starting, ServerState::Started]
        );

        f.launcher.alive.store(false, Ordering::SeqCst);
        assert_eq!(states(&mut sub, 1).await, vec![ServerState::Stopped]);

        // Outlive the first launch's grace period and a few polls
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(remaining_states(&mut sub).is_empty());
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_cannot_mark_managed_launch_as_starting() {
        let f = fixture(FakeLauncher::default()).await;
        let machine = slow_start(&f.machine);
        let mut sub = f.bus.subscribe();
        let request = LaunchParameters::new(&f.handle, "run");
        assert!(machine.start_server(&request).await.is_ok());
        sub.wait_for(
            |event| matches!(event, Notification::ServerProcessCreated(_)).then_some(()),
            Duration::from_secs(2),
        )
        .await
        .unwrap();

        let status = machine
            .server_starting_by_client(&ServerStartingAttributes {
                initiate_polling: true,
                request,
            })
            .await;
        assert_eq!(status.message, "Server wf is already being launched");

        assert_eq!(states(&mut sub, 1).await, vec![ServerState::Started]);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(remaining_states(&mut sub).is_empty());
        assert!(f.launcher.alive.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn forced_stop_releases_leftover_process() {
        let f = fixture(FakeLauncher::default()).await;
        let alive = Arc::new(AtomicBool::new(true));
        {
            let mut records = f.machine.registry.write().await;
            records["wf"].runtime.process = Some(Box::new(FakeProcess {
                alive: Arc::clone(&alive),
            }));
        }
        let mut sub = f.bus.subscribe();

        let status = f
            .machine
            .stop_server(&StopServerAttributes {
                id: "wf".to_string(),
                force: true,
            })
            .await;
        assert!(status.is_ok());
        assert!(matches!(
            sub.try_recv(),
            Some(Notification::ServerProcessTerminated(p)) if p.server.id == "wf"
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!alive.load(Ordering::SeqCst));
        assert!(remaining_states(&mut sub).is_empty());
    }

    #[tokio::test]
    async fn polling_with_unknown_type_makes_no_transition() {
        let f = fixture(FakeLauncher::default()).await;
        {
            let mut records = f.machine.registry.write().await;
            records["wf"].handle.server_type.id = "retired".to_string();
        }
        let mut sub = f.bus.subscribe();

        let status = f
            .machine
            .server_starting_by_client(&ServerStartingAttributes {
                initiate_polling: true,
                request: LaunchParameters::new(&f.handle, "run"),
            })
            .await;
        assert_eq!(status.message, "Server Type retired not found");
        assert!(sub.try_recv().is_none());
        assert_eq!(
            f.machine.server_state("wf").await.unwrap().state,
            ServerState::Stopped
        );
    }

    #[tokio::test]
    async fn stop_all_stops_running_servers() {
        let f = fixture(FakeLauncher::default()).await;
        let mut sub = f.bus.subscribe();
        assert!(f.machine.start_server(&LaunchParameters::new(&f.handle, "run")).await.is_ok());
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Starting, ServerState::Started]
        );

        f.machine.stop_all().await;
        assert_eq!(
            states(&mut sub, 2).await,
            vec![ServerState::Stopping, ServerState::Stopped]
        );
        assert!(!f.launcher.alive.load(Ordering::SeqCst));
    }
}
