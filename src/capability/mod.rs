//! Server type capabilities.
//!
//! A capability is the plugin that knows one kind of runtime: how to
//! recognise an installation on disk, which launch modes and attributes it
//! supports, and how to build its command line. The protocol core only talks
//! to capabilities through [`ServerCapability`] and the lookup helpers of
//! [`CapabilityCatalog`].
//!
//! # Bundled Capabilities
//!
//! - [`wildfly`]: WildFly application server

pub mod wildfly;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::LaunchError;
use crate::model::{
    Attributes, CommandLineDetails, LaunchMode, ServerBean, ServerHandle, ServerType,
};

pub use wildfly::WildFlyCapability;

/// What a capability needs to know about a configured server.
#[derive(Debug, Clone)]
pub struct ServerDetails {
    /// The server handle.
    pub handle: ServerHandle,
    /// Installation directory.
    pub home: PathBuf,
    /// Server attribute values, with schema defaults applied.
    pub attributes: Map<String, Value>,
}

impl ServerDetails {
    /// Returns a string attribute.
    #[must_use]
    pub fn string_attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }

    /// Returns an integer attribute.
    #[must_use]
    pub fn int_attribute(&self, name: &str) -> Option<i64> {
        self.attributes.get(name).and_then(Value::as_i64)
    }
}

/// Behaviour of one server type.
pub trait ServerCapability: Send + Sync {
    /// The type this capability manages.
    fn server_type(&self) -> &ServerType;

    /// Recognises an installation of this type at `path`.
    fn detect(&self, path: &Path) -> Option<ServerBean>;

    /// Supported launch modes.
    fn launch_modes(&self) -> Vec<LaunchMode>;

    /// Attributes every server of this type must have.
    fn required_attributes(&self) -> Attributes;

    /// Attributes a server of this type may have.
    fn optional_attributes(&self) -> Attributes;

    /// Attributes a launch in `mode` must supply, `None` for unknown modes.
    fn required_launch_attributes(&self, mode: &str) -> Option<Attributes>;

    /// Attributes a launch in `mode` may supply, `None` for unknown modes.
    fn optional_launch_attributes(&self, mode: &str) -> Option<Attributes>;

    /// Builds the command line that launches `server` in `mode`.
    ///
    /// `attributes` are the launch attribute values, already validated and
    /// with defaults applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the installation cannot be launched.
    fn launch_command(
        &self,
        server: &ServerDetails,
        mode: &str,
        attributes: &Map<String, Value>,
    ) -> Result<CommandLineDetails, LaunchError>;

    /// Returns `true` if the running server answers requests.
    ///
    /// Used when a client asks the server to poll a runtime it launched
    /// itself. May block briefly.
    fn is_responding(&self, server: &ServerDetails) -> bool {
        let _ = server;
        false
    }

    /// Returns `true` if `mode` is one of the launch modes.
    fn supports_mode(&self, mode: &str) -> bool {
        self.launch_modes().iter().any(|m| m.mode == mode)
    }
}

/// Registry of the capabilities known to a session, keyed by type id.
#[derive(Default, Clone)]
pub struct CapabilityCatalog {
    capabilities: IndexMap<String, Arc<dyn ServerCapability>>,
}

impl CapabilityCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the bundled capabilities.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut catalog = Self::new();
        catalog.register(Arc::new(WildFlyCapability::new()));
        catalog
    }

    /// Registers a capability, replacing any with the same type id.
    pub fn register(&mut self, capability: Arc<dyn ServerCapability>) {
        let id = capability.server_type().id.clone();
        if self.capabilities.insert(id.clone(), capability).is_some() {
            tracing::warn!(server_type = %id, "Replaced existing capability");
        }
    }

    /// Looks up a capability by type id.
    #[must_use]
    pub fn get(&self, type_id: &str) -> Option<Arc<dyn ServerCapability>> {
        self.capabilities.get(type_id).cloned()
    }

    /// All registered server types, in registration order.
    #[must_use]
    pub fn server_types(&self) -> Vec<ServerType> {
        self.capabilities
            .values()
            .map(|c| c.server_type().clone())
            .collect()
    }

    /// Runs every capability's detection on `path`; the first match wins.
    #[must_use]
    pub fn detect(&self, path: &Path) -> Option<ServerBean> {
        self.capabilities.values().find_map(|c| c.detect(path))
    }

    /// Launch modes of a type.
    #[must_use]
    pub fn launch_modes(&self, type_id: &str) -> Option<Vec<LaunchMode>> {
        self.get(type_id).map(|c| c.launch_modes())
    }

    /// Required server attributes of a type.
    #[must_use]
    pub fn required_attributes(&self, type_id: &str) -> Option<Attributes> {
        self.get(type_id).map(|c| c.required_attributes())
    }

    /// Optional server attributes of a type.
    #[must_use]
    pub fn optional_attributes(&self, type_id: &str) -> Option<Attributes> {
        self.get(type_id).map(|c| c.optional_attributes())
    }

    /// Required launch attributes of a type and mode.
    #[must_use]
    pub fn required_launch_attributes(&self, type_id: &str, mode: &str) -> Option<Attributes> {
        self.get(type_id)
            .and_then(|c| c.required_launch_attributes(mode))
    }

    /// Optional launch attributes of a type and mode.
    #[must_use]
    pub fn optional_launch_attributes(&self, type_id: &str, mode: &str) -> Option<Attributes> {
        self.get(type_id)
            .and_then(|c| c.optional_launch_attributes(mode))
    }
}

impl std::fmt::Debug for CapabilityCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCatalog")
            .field("types", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_wildfly() {
        let catalog = CapabilityCatalog::with_defaults();
        let types = catalog.server_types();
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].id, wildfly::WILDFLY_TYPE_ID);
    }

    #[test]
    fn unknown_type_lookups_are_none() {
        let catalog = CapabilityCatalog::with_defaults();
        assert!(catalog.launch_modes("nope").is_none());
        assert!(catalog.required_attributes("nope").is_none());
        assert!(catalog.optional_attributes("nope").is_none());
        assert!(catalog.required_launch_attributes("nope", "run").is_none());
    }

    #[test]
    fn unknown_mode_lookups_are_none() {
        let catalog = CapabilityCatalog::with_defaults();
        assert!(catalog
            .required_launch_attributes(wildfly::WILDFLY_TYPE_ID, "profile")
            .is_none());
        assert!(catalog
            .optional_launch_attributes(wildfly::WILDFLY_TYPE_ID, "run")
            .is_some());
    }

    #[test]
    fn detection_on_empty_directory_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = CapabilityCatalog::with_defaults();
        assert!(catalog.detect(dir.path()).is_none());
    }
}
