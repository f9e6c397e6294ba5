//! Error types for rsp-server.
//!
//! Expected protocol failures (duplicate ids, unknown handles and so on) are
//! not errors in this sense: they travel to clients as [`StatusCode`] values.
//! The types here cover configuration, capability and transport failures,
//! plus the outcomes of the waiting call forms.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::{AttributeType, ServerState, StatusCode};

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// An attribute value that does not satisfy its schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    /// A required attribute has no value.
    #[error("Missing required attribute: {name}")]
    Missing {
        /// Attribute name.
        name: String,
    },

    /// An attribute value has the wrong JSON type.
    #[error("Attribute {name} must be of type {expected}")]
    WrongType {
        /// Attribute name.
        name: String,
        /// Declared type.
        expected: AttributeType,
    },
}

/// Reasons a launch command cannot be built.
#[derive(Error, Debug)]
pub enum LaunchError {
    /// Launch attributes failed validation.
    #[error(transparent)]
    Attribute(#[from] AttributeError),

    /// No capability is registered for the server type.
    #[error("Server Type {server_type} not found")]
    UnknownType {
        /// Server type id.
        server_type: String,
    },

    /// The server type has no such launch mode.
    #[error("Launch mode {mode} is not supported by server type {server_type}")]
    UnsupportedMode {
        /// Requested mode.
        mode: String,
        /// Server type id.
        server_type: String,
    },

    /// The installation is missing the files needed to launch it.
    #[error("Server installation is not launchable: {path}")]
    NotLaunchable {
        /// The file that was expected.
        path: PathBuf,
    },
}

/// Outcome of a waiting call form that did not reach its terminal event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    /// The underlying call was not accepted.
    #[error("request rejected: {}", .0.message)]
    Rejected(StatusCode),

    /// No matching notification arrived in time.
    #[error("timed out after {0:?} waiting for notification")]
    Timeout(Duration),

    /// The server settled in another terminal state.
    #[error("server reached {0} instead of the awaited state")]
    Interrupted(ServerState),

    /// Events were dropped because the subscriber fell behind.
    #[error("missed {0} notifications while waiting")]
    Lagged(u64),

    /// The notification source went away.
    #[error("notification channel closed")]
    Closed,
}

/// Errors raised by [`crate::client::RspClient`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connecting, reading or writing failed.
    #[error("transport failure")]
    Io(#[from] std::io::Error),

    /// The connection closed before a response arrived.
    #[error("connection closed")]
    Closed,

    /// The server answered with a JSON-RPC error.
    #[error("server returned error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i32,
        /// Error message.
        message: String,
    },

    /// The request parameters could not be serialised.
    #[error("failed to encode parameters of {method}")]
    Encode {
        /// Method being called.
        method: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The response result did not have the expected shape.
    #[error("failed to decode response to {method}")]
    Decode {
        /// Method that was called.
        method: String,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A waiting call form did not complete.
    #[error(transparent)]
    Wait(#[from] WaitError),
}
