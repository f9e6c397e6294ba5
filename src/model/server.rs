//! Server types, handles, states and detection results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bean category reported when no installation signature matches.
pub const UNKNOWN_TYPE_CATEGORY: &str = "UNKNOWN";

/// A kind of runtime server, registered by a capability plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerType {
    /// Unique type identifier.
    pub id: String,
    /// Name shown to users.
    #[serde(default)]
    pub visible_name: String,
    /// Longer description of the type.
    #[serde(default)]
    pub description: String,
}

impl ServerType {
    /// Creates a server type.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        visible_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            visible_name: visible_name.into(),
            description: description.into(),
        }
    }
}

/// A configured (not necessarily running) server instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerHandle {
    /// Client-chosen identifier, unique within the session.
    pub id: String,
    /// Type of the server. Requests naming a server by id may omit it.
    #[serde(rename = "type", default)]
    pub server_type: ServerType,
}

/// Run state of a server handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerState {
    /// State cannot be determined (no such handle).
    Unknown,
    /// Launch accepted, not yet up.
    Starting,
    /// Up and running.
    Started,
    /// Stop accepted, not yet down.
    Stopping,
    /// Not running.
    Stopped,
}

impl ServerState {
    /// Lower-case adjective used in status messages.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Starting => "starting",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "UNKNOWN",
            Self::Starting => "STARTING",
            Self::Started => "STARTED",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// A filesystem location registered for server-bean scanning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryPath {
    /// Absolute path.
    pub filepath: String,
}

impl DiscoveryPath {
    /// Creates a discovery path.
    #[must_use]
    pub fn new(filepath: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
        }
    }
}

/// Result of scanning a path for a runtime installation.
///
/// Empty strings stand for fields the detection could not fill.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerBean {
    /// The scanned path.
    pub location: String,
    /// Broad family of the installation, or `UNKNOWN`.
    pub type_category: String,
    /// Product name of the installation.
    pub specific_type: String,
    /// Display name (usually the directory name).
    pub name: String,
    /// Major.minor version.
    pub version: String,
    /// Complete version string.
    pub full_version: String,
    /// Server type id that can manage this installation.
    pub server_adapter_type_id: String,
}

impl ServerBean {
    /// Bean reported for a path that matches no installation signature.
    #[must_use]
    pub fn unknown(location: impl Into<String>) -> Self {
        let location = location.into();
        let name = std::path::Path::new(&location)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            location,
            type_category: UNKNOWN_TYPE_CATEGORY.to_string(),
            name,
            ..Self::default()
        }
    }

    /// Returns `true` if the bean identifies a manageable installation.
    #[must_use]
    pub fn is_recognised(&self) -> bool {
        self.type_category != UNKNOWN_TYPE_CATEGORY && !self.server_adapter_type_id.is_empty()
    }
}

/// Payload of the `serverStateChange` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStateChange {
    /// The server whose state changed.
    pub server: ServerHandle,
    /// The state entered.
    pub state: ServerState,
}

/// Result of `getServerState`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStateInfo {
    /// The server.
    pub server: ServerHandle,
    /// Its current state.
    pub state: ServerState,
    /// Launch mode of the current or last run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_mode: Option<String>,
}

/// Payload of the process creation/termination notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerProcess {
    /// The server owning the process.
    pub server: ServerHandle,
    /// Operating system process id.
    pub process_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_serialises_type_field() {
        let handle = ServerHandle {
            id: "wf".to_string(),
            server_type: ServerType::new("wildfly", "WildFly", "WildFly server"),
        };
        let json = serde_json::to_value(&handle).unwrap();
        assert_eq!(json["type"]["visibleName"], "WildFly");
    }

    #[test]
    fn unknown_bean_has_empty_version() {
        let bean = ServerBean::unknown("/tmp/nothing-here");
        assert_eq!(bean.type_category, UNKNOWN_TYPE_CATEGORY);
        assert_eq!(bean.name, "nothing-here");
        assert!(bean.version.is_empty());
        assert!(!bean.is_recognised());
    }

    #[test]
    fn state_wire_names() {
        let json = serde_json::to_string(&ServerState::Starting).unwrap();
        assert_eq!(json, "\"STARTING\"");
        assert_eq!(ServerState::Stopped.to_string(), "STOPPED");
    }
}
