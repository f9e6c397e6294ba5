//! The uniform result object of every mutating call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a mutating protocol call.
///
/// A severity of [`StatusCode::OK`] means success; anything greater is a
/// failure whose `message` is stable enough for callers to match on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode {
    /// Severity of the outcome (0 = ok).
    pub severity: u32,
    /// Human-readable description of the outcome.
    pub message: String,
}

impl StatusCode {
    /// Success.
    pub const OK: u32 = 0;
    /// Informational failure.
    pub const INFO: u32 = 1;
    /// Warning.
    pub const WARNING: u32 = 2;
    /// Error.
    pub const ERROR: u32 = 4;
    /// Cancelled operation.
    pub const CANCEL: u32 = 8;

    /// Creates a status with an explicit severity.
    #[must_use]
    pub fn new(severity: u32, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }

    /// The canonical success status.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(Self::OK, "ok")
    }

    /// An error status with the given message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Self::ERROR, message)
    }

    /// Status for a request naming a server handle that is not registered.
    #[must_use]
    pub fn server_not_found(id: &str) -> Self {
        Self::error(format!("Server {id} does not exist"))
    }

    /// Status for a null or structurally invalid mutating request.
    #[must_use]
    pub fn invalid_request(detail: &str) -> Self {
        Self::error(format!("Invalid request: {detail}"))
    }

    /// Returns `true` if the severity denotes success.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.severity == Self::OK
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}
