//! Attribute schemas and launch request/response types.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::server::ServerHandle;
use super::status::StatusCode;
use crate::error::AttributeError;

/// Attribute holding the installation directory of a server.
pub const SERVER_HOME_DIR: &str = "server.home.dir";

/// A named way to run a server type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchMode {
    /// Mode name, e.g. `run` or `debug`.
    pub mode: String,
    /// Description of the mode.
    #[serde(default)]
    pub desc: String,
}

impl LaunchMode {
    /// Creates a launch mode.
    #[must_use]
    pub fn new(mode: impl Into<String>, desc: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            desc: desc.into(),
        }
    }
}

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    /// JSON string.
    String,
    /// JSON integer.
    Int,
    /// JSON boolean.
    Bool,
    /// JSON array.
    List,
    /// JSON object.
    Map,
}

impl AttributeType {
    /// Returns `true` if `value` is of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
        };
        f.write_str(name)
    }
}

/// Declaration of one attribute in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    /// Value type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// What the attribute controls.
    #[serde(default)]
    pub description: String,
    /// Value used when the client supplies none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_val: Option<Value>,
}

impl Attribute {
    /// Creates an attribute without a default.
    #[must_use]
    pub fn new(attr_type: AttributeType, description: impl Into<String>) -> Self {
        Self {
            attr_type,
            description: description.into(),
            default_val: None,
        }
    }

    /// Sets the default value.
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default_val = Some(value);
        self
    }
}

/// An attribute schema: attribute name to declaration, in declaration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attributes {
    /// The declared attributes.
    #[serde(default)]
    pub attributes: IndexMap<String, Attribute>,
}

impl Attributes {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute declaration.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    /// Returns `true` if the schema declares nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Looks up a declaration.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Fills in defaults for declared attributes absent from `values`.
    pub fn apply_defaults(&self, values: &mut Map<String, Value>) {
        for (name, attribute) in &self.attributes {
            if let Some(default) = &attribute.default_val {
                values
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
    }

    /// Checks that every declared attribute is present and well-typed.
    ///
    /// # Errors
    ///
    /// Returns the first missing or mistyped attribute.
    pub fn require_all(&self, values: &Map<String, Value>) -> Result<(), AttributeError> {
        for (name, attribute) in &self.attributes {
            match values.get(name) {
                None | Some(Value::Null) => {
                    return Err(AttributeError::Missing { name: name.clone() })
                }
                Some(value) => check_type(name, attribute, value)?,
            }
        }
        Ok(())
    }

    /// Checks that declared attributes present in `values` are well-typed.
    ///
    /// # Errors
    ///
    /// Returns the first mistyped attribute.
    pub fn check_types(&self, values: &Map<String, Value>) -> Result<(), AttributeError> {
        for (name, attribute) in &self.attributes {
            if let Some(value) = values.get(name).filter(|v| !v.is_null()) {
                check_type(name, attribute, value)?;
            }
        }
        Ok(())
    }
}

fn check_type(name: &str, attribute: &Attribute, value: &Value) -> Result<(), AttributeError> {
    if attribute.attr_type.accepts(value) {
        Ok(())
    } else {
        Err(AttributeError::WrongType {
            name: name.to_string(),
            expected: attribute.attr_type,
        })
    }
}

/// Identifies a server and carries attribute values for it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAttributes {
    /// Server handle id.
    pub id: String,
    /// Server type id (informational for launch requests).
    #[serde(default)]
    pub server_type: String,
    /// Attribute values.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A start or command-construction request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchParameters {
    /// Launch mode.
    pub mode: String,
    /// Target server and launch attribute values.
    pub params: ServerAttributes,
}

impl LaunchParameters {
    /// Creates launch parameters with no launch attributes.
    #[must_use]
    pub fn new(handle: &ServerHandle, mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            params: ServerAttributes {
                id: handle.id.clone(),
                server_type: handle.server_type.id.clone(),
                attributes: Map::new(),
            },
        }
    }

    /// Adds a launch attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.attributes.insert(name.into(), value);
        self
    }
}

/// Query for the launch attribute schemas of a type and mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchAttributesRequest {
    /// Server type id.
    pub server_type_id: String,
    /// Launch mode.
    pub mode: String,
}

/// Parameters of `stopServer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopServerAttributes {
    /// Server handle id.
    pub id: String,
    /// Stop regardless of the nominal state.
    #[serde(default)]
    pub force: bool,
}

/// Parameters of `serverStartingByClient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStartingAttributes {
    /// Ask the server to poll until the runtime responds.
    #[serde(default)]
    pub initiate_polling: bool,
    /// The launch the client performed itself.
    pub request: LaunchParameters,
}

/// Command line built by a capability for a launch.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineDetails {
    /// Program followed by its arguments.
    pub cmd_line: Vec<String>,
    /// Working directory of the process.
    pub working_dir: String,
    /// Extra environment entries as `KEY=VALUE`.
    #[serde(default)]
    pub envp: Vec<String>,
    /// Free-form launch properties.
    #[serde(default)]
    pub properties: IndexMap<String, String>,
}

/// Parameters of `createServer`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerParams {
    /// Client-chosen handle id.
    pub id: String,
    /// Installation directory.
    pub path: String,
    /// Server type id; inferred from the installation when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_type: Option<String>,
    /// Additional server attribute values.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl CreateServerParams {
    /// Creates parameters that let the server infer the type.
    #[must_use]
    pub fn new(path: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the server type explicitly.
    #[must_use]
    pub fn with_type(mut self, server_type: impl Into<String>) -> Self {
        self.server_type = Some(server_type.into());
        self
    }

    /// Adds a server attribute value.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }
}

/// Result of `createServer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateServerResponse {
    /// Outcome of the call.
    pub status: StatusCode,
    /// The created handle on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<ServerHandle>,
}

impl CreateServerResponse {
    /// A failed creation.
    #[must_use]
    pub const fn failed(status: StatusCode) -> Self {
        Self {
            status,
            handle: None,
        }
    }
}
