//! rsp-server: Runtime Server Protocol server and client
//!
//! The protocol lets a tooling process discover, create, launch and tear
//! down runtime server instances (application servers) that it does not
//! host itself.
//!
//! # Architecture
//!
//! One long-lived server process owns a [`session::Session`]; every client
//! connection drives it through JSON-RPC requests and receives its events as
//! notifications:
//!
//! - **Discovery**: paths registered for scanning, and detection of server
//!   installations under a path
//! - **Server registry**: client-named server handles bound to a type
//! - **Capabilities**: per server type launch modes, attribute schemas and
//!   command construction (WildFly is bundled)
//! - **Lifecycle**: the `STOPPED → STARTING → STARTED → STOPPING` state
//!   machine, managed or client-driven
//! - **Notification bus**: fan-out of state changes to all clients
//!
//! # Modules
//!
//! - [`bus`]: Notification bus
//! - [`capability`]: Server type plugins
//! - [`client`]: Protocol client with waiting call forms
//! - [`config`]: Configuration loading and validation
//! - [`discovery`]: Discovery path registry
//! - [`error`]: Error types
//! - [`lifecycle`]: Run state machine and process launching
//! - [`model`]: Wire data model
//! - [`protocol`]: JSON-RPC binding and connection handling
//! - [`registry`]: Server handle registry
//! - [`session`]: Session state shared by all connections

pub mod bus;
pub mod capability;
pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod protocol;
pub mod registry;
pub mod session;
