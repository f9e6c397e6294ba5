//! Runtime Server Protocol wire binding.
//!
//! The protocol is JSON-RPC 2.0 with one message per line. Clients send
//! requests under the `server/` namespace; the server pushes bus events as
//! notifications under the `client/` namespace.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          RspServer                           │
//! │                                                              │
//! │   ┌─────────────┐    ┌────────────────┐    ┌─────────────┐   │
//! │   │  Transport  │───▶│ RequestHandler │───▶│   Session   │   │
//! │   │ (tcp/stdio) │    │   (dispatch)   │    │ (registries)│   │
//! │   └─────────────┘    └────────────────┘    └─────────────┘   │
//! │          ▲                                        │          │
//! │          │          notifications                 ▼          │
//! │          └───────────────────────────────  NotificationBus   │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod handler;
pub mod jsonrpc;
pub mod server;
pub mod transport;

pub use handler::RequestHandler;
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, SERVER_NAME};
pub use server::RspServer;
pub use transport::{LineReader, LineWriter};

/// Method names of requests and notifications.
pub mod methods {
    pub const ADD_DISCOVERY_PATH: &str = "server/addDiscoveryPath";
    pub const REMOVE_DISCOVERY_PATH: &str = "server/removeDiscoveryPath";
    pub const GET_DISCOVERY_PATHS: &str = "server/getDiscoveryPaths";
    pub const FIND_SERVER_BEANS: &str = "server/findServerBeans";
    pub const GET_SERVER_TYPES: &str = "server/getServerTypes";
    pub const GET_SERVER_HANDLES: &str = "server/getServerHandles";
    pub const CREATE_SERVER: &str = "server/createServer";
    pub const DELETE_SERVER: &str = "server/deleteServer";
    pub const GET_SERVER_STATE: &str = "server/getServerState";
    pub const GET_LAUNCH_MODES: &str = "server/getLaunchModes";
    pub const GET_REQUIRED_ATTRIBUTES: &str = "server/getRequiredAttributes";
    pub const GET_OPTIONAL_ATTRIBUTES: &str = "server/getOptionalAttributes";
    pub const GET_REQUIRED_LAUNCH_ATTRIBUTES: &str = "server/getRequiredLaunchAttributes";
    pub const GET_OPTIONAL_LAUNCH_ATTRIBUTES: &str = "server/getOptionalLaunchAttributes";
    pub const GET_LAUNCH_COMMAND: &str = "server/getLaunchCommand";
    pub const START_SERVER_ASYNC: &str = "server/startServerAsync";
    pub const STOP_SERVER: &str = "server/stopServer";
    pub const SERVER_STARTING_BY_CLIENT: &str = "server/serverStartingByClient";
    pub const SERVER_STARTED_BY_CLIENT: &str = "server/serverStartedByClient";
    pub const SHUTDOWN: &str = "server/shutdown";
    pub const PING: &str = "ping";

    pub const DISCOVERY_PATH_ADDED: &str = "client/discoveryPathAdded";
    pub const DISCOVERY_PATH_REMOVED: &str = "client/discoveryPathRemoved";
    pub const SERVER_ADDED: &str = "client/serverAdded";
    pub const SERVER_REMOVED: &str = "client/serverRemoved";
    pub const SERVER_STATE_CHANGE: &str = "client/serverStateChange";
    pub const SERVER_PROCESS_CREATED: &str = "client/serverProcessCreated";
    pub const SERVER_PROCESS_TERMINATED: &str = "client/serverProcessTerminated";
}
