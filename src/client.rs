//! Protocol client.
//!
//! [`RspClient`] speaks the same line protocol as the server. Responses are
//! matched to their requests by id; notifications are re-published on a
//! client-local [`NotificationBus`], so the waiting call forms work the same
//! way they do in-process: subscribe, issue the call, wait for the event.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bus::{Notification, NotificationBus, Subscription};
use crate::error::{ClientError, WaitError};
use crate::model::{
    Attributes, CommandLineDetails, CreateServerParams, CreateServerResponse, DiscoveryPath,
    LaunchAttributesRequest, LaunchMode, LaunchParameters, ServerBean, ServerHandle,
    ServerStartingAttributes, ServerState, ServerStateChange, ServerStateInfo, ServerType,
    StatusCode, StopServerAttributes,
};
use crate::protocol::jsonrpc::{
    parse_server_message, JsonRpcErrorData, JsonRpcReply, OutgoingRequest, RequestId,
    ServerMessage,
};
use crate::protocol::methods;
use crate::protocol::transport::{LineReader, LineWriter};

type Reply = Result<Value, JsonRpcErrorData>;

/// In-flight requests keyed by id; `None` once the connection is gone.
type Pending = Arc<Mutex<Option<HashMap<i64, oneshot::Sender<Reply>>>>>;

type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// A connection to an RSP server.
pub struct RspClient {
    writer: Mutex<LineWriter<BoxedWriter>>,
    pending: Pending,
    next_id: AtomicI64,
    bus: NotificationBus,
    reader: JoinHandle<()>,
}

impl fmt::Debug for RspClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RspClient")
            .field("next_id", &self.next_id)
            .field("subscribers", &self.bus.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl Drop for RspClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl RspClient {
    /// Connects to a server listening on TCP.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self::from_stream(reader, writer))
    }

    /// Wraps an already-connected byte stream.
    pub fn from_stream<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let bus = NotificationBus::new();
        let reader = tokio::spawn(read_loop(
            LineReader::new(reader),
            Arc::clone(&pending),
            bus.clone(),
        ));

        Self {
            writer: Mutex::new(LineWriter::new(Box::new(writer))),
            pending,
            next_id: AtomicI64::new(1),
            bus,
            reader,
        }
    }

    /// Subscribes to notifications received from now on.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Sends a request and decodes its result.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] if the server answers with a JSON-RPC
    /// error, [`ClientError::Closed`] if the connection goes away first, and
    /// [`ClientError::Decode`] if the result has an unexpected shape.
    pub async fn call<P, T>(&self, method: &str, params: Option<&P>) -> Result<T, ClientError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let params = params
            .map(serde_json::to_value)
            .transpose()
            .map_err(|source| ClientError::Encode {
                method: method.to_string(),
                source,
            })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(pending) => pending.insert(id, tx),
            None => return Err(ClientError::Closed),
        };

        let request = OutgoingRequest::new(RequestId::Number(id), method, params);
        debug!(id, method, "Sending request");
        if let Err(e) = self.writer.lock().await.write_request(&request).await {
            if let Some(pending) = self.pending.lock().await.as_mut() {
                pending.remove(&id);
            }
            return Err(e.into());
        }

        let result = rx
            .await
            .map_err(|_| ClientError::Closed)?
            .map_err(|error| ClientError::Rpc {
                code: error.code,
                message: error.message,
            })?;

        serde_json::from_value(result).map_err(|source| ClientError::Decode {
            method: method.to_string(),
            source,
        })
    }

    async fn call_without_params<T: DeserializeOwned>(&self, method: &str) -> Result<T, ClientError> {
        self.call::<Value, T>(method, None).await
    }

    // ==================== Discovery ====================

    /// Registers a discovery path.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn add_discovery_path(&self, path: &DiscoveryPath) -> Result<StatusCode, ClientError> {
        self.call(methods::ADD_DISCOVERY_PATH, Some(path)).await
    }

    /// Unregisters a discovery path.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn remove_discovery_path(
        &self,
        path: &DiscoveryPath,
    ) -> Result<StatusCode, ClientError> {
        self.call(methods::REMOVE_DISCOVERY_PATH, Some(path)).await
    }

    /// Registered discovery paths.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn discovery_paths(&self) -> Result<Vec<DiscoveryPath>, ClientError> {
        self.call_without_params(methods::GET_DISCOVERY_PATHS).await
    }

    /// Scans a path for server installations.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn find_server_beans(
        &self,
        path: &DiscoveryPath,
    ) -> Result<Vec<ServerBean>, ClientError> {
        self.call(methods::FIND_SERVER_BEANS, Some(path)).await
    }

    // ==================== Server handles ====================

    /// Known server types.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn server_types(&self) -> Result<Vec<ServerType>, ClientError> {
        self.call_without_params(methods::GET_SERVER_TYPES).await
    }

    /// Registered server handles.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn server_handles(&self) -> Result<Vec<ServerHandle>, ClientError> {
        self.call_without_params(methods::GET_SERVER_HANDLES).await
    }

    /// Registers a server handle.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn create_server(
        &self,
        params: &CreateServerParams,
    ) -> Result<CreateServerResponse, ClientError> {
        self.call(methods::CREATE_SERVER, Some(params)).await
    }

    /// Removes a server handle.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn delete_server(&self, handle: &ServerHandle) -> Result<StatusCode, ClientError> {
        self.call(methods::DELETE_SERVER, Some(handle)).await
    }

    /// Current state of a server, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn server_state(
        &self,
        handle: &ServerHandle,
    ) -> Result<Option<ServerStateInfo>, ClientError> {
        self.call(methods::GET_SERVER_STATE, Some(handle)).await
    }

    // ==================== Capability lookups ====================

    /// Launch modes of a server type.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn launch_modes(
        &self,
        server_type: &ServerType,
    ) -> Result<Option<Vec<LaunchMode>>, ClientError> {
        self.call(methods::GET_LAUNCH_MODES, Some(server_type)).await
    }

    /// Attributes required to create a server of a type.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn required_attributes(
        &self,
        server_type: &ServerType,
    ) -> Result<Option<Attributes>, ClientError> {
        self.call(methods::GET_REQUIRED_ATTRIBUTES, Some(server_type))
            .await
    }

    /// Optional attributes of a server type.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn optional_attributes(
        &self,
        server_type: &ServerType,
    ) -> Result<Option<Attributes>, ClientError> {
        self.call(methods::GET_OPTIONAL_ATTRIBUTES, Some(server_type))
            .await
    }

    /// Attributes required to launch in a mode.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn required_launch_attributes(
        &self,
        request: &LaunchAttributesRequest,
    ) -> Result<Option<Attributes>, ClientError> {
        self.call(methods::GET_REQUIRED_LAUNCH_ATTRIBUTES, Some(request))
            .await
    }

    /// Optional attributes of a launch mode.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn optional_launch_attributes(
        &self,
        request: &LaunchAttributesRequest,
    ) -> Result<Option<Attributes>, ClientError> {
        self.call(methods::GET_OPTIONAL_LAUNCH_ATTRIBUTES, Some(request))
            .await
    }

    /// Command line the server would run for a launch.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn launch_command(
        &self,
        params: &LaunchParameters,
    ) -> Result<Option<CommandLineDetails>, ClientError> {
        self.call(methods::GET_LAUNCH_COMMAND, Some(params)).await
    }

    // ==================== Lifecycle ====================

    /// Asks the server to launch a server.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn start_server(&self, params: &LaunchParameters) -> Result<StatusCode, ClientError> {
        self.call(methods::START_SERVER_ASYNC, Some(params)).await
    }

    /// Asks the server to stop a server.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn stop_server(&self, attrs: &StopServerAttributes) -> Result<StatusCode, ClientError> {
        self.call(methods::STOP_SERVER, Some(attrs)).await
    }

    /// Reports that the client is launching a server itself.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn server_starting_by_client(
        &self,
        attrs: &ServerStartingAttributes,
    ) -> Result<StatusCode, ClientError> {
        self.call(methods::SERVER_STARTING_BY_CLIENT, Some(attrs))
            .await
    }

    /// Reports that a client-launched server is up.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn server_started_by_client(
        &self,
        params: &LaunchParameters,
    ) -> Result<StatusCode, ClientError> {
        self.call(methods::SERVER_STARTED_BY_CLIENT, Some(params))
            .await
    }

    /// Asks the server process to stop every server and exit.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn shutdown(&self) -> Result<StatusCode, ClientError> {
        self.call_without_params(methods::SHUTDOWN).await
    }

    /// Round-trips an empty request.
    ///
    /// # Errors
    ///
    /// See [`RspClient::call`].
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.call_without_params::<Value>(methods::PING)
            .await
            .map(|_| ())
    }

    // ==================== Waiting forms ====================

    /// Creates a server and waits for its `serverAdded` notification.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] (wrapped) if the creation fails.
    pub async fn create_server_and_wait(
        &self,
        params: &CreateServerParams,
        timeout: Duration,
    ) -> Result<ServerHandle, ClientError> {
        let mut subscription = self.subscribe();
        let response = self.create_server(params).await?;
        accepted(response.status)?;
        let handle = subscription
            .wait_for(
                |event| match event {
                    Notification::ServerAdded(handle) if handle.id == params.id => {
                        Some(handle.clone())
                    }
                    _ => None,
                },
                timeout,
            )
            .await?;
        Ok(handle)
    }

    /// Deletes a server and waits for its `serverRemoved` notification.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] (wrapped) if the deletion fails.
    pub async fn delete_server_and_wait(
        &self,
        handle: &ServerHandle,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let mut subscription = self.subscribe();
        accepted(self.delete_server(handle).await?)?;
        subscription
            .wait_for(
                |event| match event {
                    Notification::ServerRemoved(removed) if removed.id == handle.id => Some(()),
                    _ => None,
                },
                timeout,
            )
            .await?;
        Ok(())
    }

    /// Starts a server and waits until it is `STARTED`.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] (wrapped) if the start is not
    /// accepted and [`WaitError::Interrupted`] if the launch fails.
    pub async fn start_server_and_wait(
        &self,
        params: &LaunchParameters,
        timeout: Duration,
    ) -> Result<ServerStateChange, ClientError> {
        let mut subscription = self.subscribe();
        accepted(self.start_server(params).await?)?;
        Ok(subscription
            .wait_for_state(&params.params.id, ServerState::Started, timeout)
            .await?)
    }

    /// Stops a server and waits until it is `STOPPED`.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Rejected`] (wrapped) if the stop is not accepted.
    pub async fn stop_server_and_wait(
        &self,
        attrs: &StopServerAttributes,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let mut subscription = self.subscribe();
        accepted(self.stop_server(attrs).await?)?;

        // A forced stop of a stopped server publishes nothing
        let handle = ServerHandle {
            id: attrs.id.clone(),
            server_type: ServerType::default(),
        };
        if self
            .server_state(&handle)
            .await?
            .is_some_and(|info| info.state == ServerState::Stopped)
        {
            return Ok(());
        }

        subscription
            .wait_for_state(&attrs.id, ServerState::Stopped, timeout)
            .await?;
        Ok(())
    }
}

fn accepted(status: StatusCode) -> Result<(), WaitError> {
    if status.is_ok() {
        Ok(())
    } else {
        Err(WaitError::Rejected(status))
    }
}

/// Routes incoming lines until the connection closes.
async fn read_loop<R: AsyncRead + Unpin>(
    mut reader: LineReader<R>,
    pending: Pending,
    bus: NotificationBus,
) {
    loop {
        let line = match reader.read_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read from server");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_server_message(&line) {
            Ok(ServerMessage::Reply(reply)) => complete(&pending, reply).await,
            Ok(ServerMessage::Notification(notification)) => {
                let params = notification.params.unwrap_or(Value::Null);
                match Notification::from_parts(&notification.method, params) {
                    Ok(Some(event)) => bus.publish(event),
                    Ok(None) => debug!(method = %notification.method, "Ignoring notification"),
                    Err(e) => {
                        warn!(method = %notification.method, error = %e, "Malformed notification");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Unparseable message from server"),
        }
    }

    // Dropping the senders wakes every caller still waiting
    pending.lock().await.take();
    debug!("Server connection closed");
}

async fn complete(pending: &Pending, reply: JsonRpcReply) {
    let Some(RequestId::Number(id)) = reply.id else {
        if let Some(error) = reply.error {
            warn!(code = error.code, message = %error.message, "Uncorrelated error from server");
        }
        return;
    };

    let sender = pending.lock().await.as_mut().and_then(|p| p.remove(&id));
    let Some(sender) = sender else {
        warn!(id, "Response to unknown request");
        return;
    };

    let result = match reply.error {
        Some(error) => Err(error),
        None => Ok(reply.result.unwrap_or(Value::Null)),
    };
    if sender.send(result).is_err() {
        debug!(id, "Caller stopped waiting for response");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RspServer;
    use crate::session::Session;

    /// A client wired to an in-memory single-client server.
    fn connected() -> (RspClient, tokio::task::JoinHandle<std::io::Result<()>>) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let server = RspServer::new(Arc::new(Session::with_defaults()));
        let serving =
            tokio::spawn(async move { server.serve_stream(server_read, server_write).await });

        let (client_read, client_write) = tokio::io::split(client_side);
        (RspClient::from_stream(client_read, client_write), serving)
    }

    #[tokio::test]
    async fn ping_and_empty_queries() {
        let (client, _serving) = connected();
        client.ping().await.unwrap();
        assert!(client.server_handles().await.unwrap().is_empty());
        assert!(client.discovery_paths().await.unwrap().is_empty());
        assert_eq!(client.server_types().await.unwrap()[0].id, "wildfly");
    }

    #[tokio::test]
    async fn unknown_method_surfaces_as_rpc_error() {
        let (client, _serving) = connected();
        let err = client
            .call_without_params::<Value>("server/frobnicate")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Rpc { code: -32601, .. }));
    }

    #[tokio::test]
    async fn discovery_notifications_reach_subscribers() {
        let (client, _serving) = connected();
        let dir = tempfile::tempdir().unwrap();
        let path = DiscoveryPath::new(dir.path().to_string_lossy());

        let mut events = client.subscribe();
        assert!(client.add_discovery_path(&path).await.unwrap().is_ok());
        let added = events
            .wait_for(
                |event| match event {
                    Notification::DiscoveryPathAdded(added) => Some(added.clone()),
                    _ => None,
                },
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(added, path);
    }

    #[tokio::test]
    async fn rejected_waiting_call_does_not_wait() {
        let (client, _serving) = connected();
        let handle = ServerHandle {
            id: "ghost".to_string(),
            server_type: ServerType::default(),
        };
        let err = client
            .delete_server_and_wait(&handle, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Wait(WaitError::Rejected(_))));
    }

    #[tokio::test]
    async fn calls_fail_once_server_is_gone() {
        let (client, serving) = connected();
        assert!(client.shutdown().await.unwrap().is_ok());
        serving.await.unwrap().unwrap();

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::Closed | ClientError::Io(_)));
    }
}
