//! WildFly application server capability.
//!
//! # Detection
//!
//! A directory is a WildFly installation when it contains
//! `jboss-modules.jar` and `bin/standalone.sh`. The version comes from
//! `version.txt`:
//!
//! ```text
//! WildFly Full 18.0.1.Final (WildFly Core 10.0.3.Final)
//! ```
//!
//! or, for distributions without that file, from the product manifest under
//! `modules/system/layers/base/org/jboss/as/product/*/dir/META-INF/`.
//!
//! # Launching
//!
//! ```text
//! <home>/bin/standalone.sh -b <host> [-c <config>] [--debug <port>]
//! ```
//!
//! run from `<home>/bin`, with `JAVA_OPTS` set from `vm.args` when present.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{json, Map, Value};

use super::{ServerCapability, ServerDetails};
use crate::error::LaunchError;
use crate::model::{
    Attribute, AttributeType, Attributes, CommandLineDetails, LaunchMode, ServerBean, ServerType,
    SERVER_HOME_DIR,
};

/// Type id of the WildFly capability.
pub const WILDFLY_TYPE_ID: &str = "wildfly";

/// Bean category reported for WildFly installations.
pub const WILDFLY_TYPE_CATEGORY: &str = "JBOSS";

/// Server attribute: address the server binds to.
pub const ATTR_HOST: &str = "server.host";
/// Server attribute: HTTP port used to probe a running server.
pub const ATTR_HTTP_PORT: &str = "server.http.port";
/// Server attribute: JVM arguments.
pub const ATTR_VM_ARGS: &str = "vm.args";
/// Launch attribute: debugger port (debug mode only).
pub const ATTR_DEBUG_PORT: &str = "debug.port";
/// Launch attribute: server configuration file.
pub const ATTR_SERVER_CONFIG: &str = "server.config";

const MODE_RUN: &str = "run";
const MODE_DEBUG: &str = "debug";

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

static VERSION_TXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^WildFly(?:\s+Full)?\s+(?P<full>(?P<major>\d+)\.(?P<minor>\d+)\.\S+)")
        .expect("version.txt pattern is valid")
});

static MANIFEST_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^JBoss-Product-Release-Version:\s*(?P<full>(?P<major>\d+)\.(?P<minor>\d+)\S*)")
        .expect("manifest pattern is valid")
});

/// Detection and launch rules for WildFly.
#[derive(Debug, Clone)]
pub struct WildFlyCapability {
    server_type: ServerType,
}

impl WildFlyCapability {
    /// Creates the capability.
    #[must_use]
    pub fn new() -> Self {
        Self {
            server_type: ServerType::new(
                WILDFLY_TYPE_ID,
                "WildFly",
                "A server adapter capable of discovering and controlling a WildFly runtime instance.",
            ),
        }
    }

    fn start_script(home: &Path) -> PathBuf {
        let name = if cfg!(windows) {
            "standalone.bat"
        } else {
            "standalone.sh"
        };
        home.join("bin").join(name)
    }
}

impl Default for WildFlyCapability {
    fn default() -> Self {
        Self::new()
    }
}

/// Version as `(major.minor, full)`.
fn read_version(home: &Path) -> Option<(String, String)> {
    if let Ok(text) = std::fs::read_to_string(home.join("version.txt")) {
        if let Some(found) = VERSION_TXT.captures(text.trim_start()) {
            return Some((
                format!("{}.{}", &found["major"], &found["minor"]),
                found["full"].to_string(),
            ));
        }
    }

    let pattern = format!(
        "{}/modules/system/layers/base/org/jboss/as/product/*/dir/META-INF/MANIFEST.MF",
        glob::Pattern::escape(&home.to_string_lossy())
    );
    let manifests = glob::glob(&pattern).ok()?;
    manifests
        .filter_map(Result::ok)
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .find_map(|text| {
            MANIFEST_VERSION.captures(&text).map(|found| {
                (
                    format!("{}.{}", &found["major"], &found["minor"]),
                    found["full"].to_string(),
                )
            })
        })
}

impl ServerCapability for WildFlyCapability {
    fn server_type(&self) -> &ServerType {
        &self.server_type
    }

    fn detect(&self, path: &Path) -> Option<ServerBean> {
        if !path.join("jboss-modules.jar").is_file() || !path.join("bin/standalone.sh").is_file() {
            return None;
        }
        let (version, full_version) = read_version(path)?;

        Some(ServerBean {
            location: path.to_string_lossy().into_owned(),
            type_category: WILDFLY_TYPE_CATEGORY.to_string(),
            specific_type: "WildFly".to_string(),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            version,
            full_version,
            server_adapter_type_id: WILDFLY_TYPE_ID.to_string(),
        })
    }

    fn launch_modes(&self) -> Vec<LaunchMode> {
        vec![
            LaunchMode::new(MODE_RUN, "Run the server in the foreground."),
            LaunchMode::new(MODE_DEBUG, "Run the server with a remote debugger port open."),
        ]
    }

    fn required_attributes(&self) -> Attributes {
        Attributes::new().with(
            SERVER_HOME_DIR,
            Attribute::new(
                AttributeType::String,
                "A filesystem path pointing to a WildFly installation",
            ),
        )
    }

    fn optional_attributes(&self) -> Attributes {
        Attributes::new()
            .with(
                ATTR_HOST,
                Attribute::new(AttributeType::String, "Address the server binds to")
                    .with_default(json!("localhost")),
            )
            .with(
                ATTR_HTTP_PORT,
                Attribute::new(AttributeType::Int, "HTTP port used to check the server is up")
                    .with_default(json!(8080)),
            )
            .with(
                ATTR_VM_ARGS,
                Attribute::new(AttributeType::String, "Arguments passed to the JVM"),
            )
    }

    fn required_launch_attributes(&self, mode: &str) -> Option<Attributes> {
        match mode {
            MODE_RUN => Some(Attributes::new()),
            MODE_DEBUG => Some(Attributes::new().with(
                ATTR_DEBUG_PORT,
                Attribute::new(AttributeType::Int, "Port the debugger connects to"),
            )),
            _ => None,
        }
    }

    fn optional_launch_attributes(&self, mode: &str) -> Option<Attributes> {
        self.supports_mode(mode).then(|| {
            Attributes::new().with(
                ATTR_SERVER_CONFIG,
                Attribute::new(
                    AttributeType::String,
                    "Server configuration file, e.g. standalone-full.xml",
                ),
            )
        })
    }

    fn launch_command(
        &self,
        server: &ServerDetails,
        mode: &str,
        attributes: &Map<String, Value>,
    ) -> Result<CommandLineDetails, LaunchError> {
        let script = Self::start_script(&server.home);
        if !script.is_file() {
            return Err(LaunchError::NotLaunchable { path: script });
        }

        let host = server.string_attribute(ATTR_HOST).unwrap_or("localhost");
        let mut cmd_line = vec![
            script.to_string_lossy().into_owned(),
            "-b".to_string(),
            host.to_string(),
        ];

        if let Some(config) = attributes.get(ATTR_SERVER_CONFIG).and_then(Value::as_str) {
            cmd_line.push("-c".to_string());
            cmd_line.push(config.to_string());
        }

        if mode == MODE_DEBUG {
            if let Some(port) = attributes.get(ATTR_DEBUG_PORT).and_then(Value::as_i64) {
                cmd_line.push("--debug".to_string());
                cmd_line.push(port.to_string());
            }
        }

        let envp = server
            .string_attribute(ATTR_VM_ARGS)
            .filter(|args| !args.is_empty())
            .map(|args| vec![format!("JAVA_OPTS={args}")])
            .unwrap_or_default();

        let mut properties = indexmap::IndexMap::new();
        properties.insert("launch.mode".to_string(), mode.to_string());

        Ok(CommandLineDetails {
            cmd_line,
            working_dir: server.home.join("bin").to_string_lossy().into_owned(),
            envp,
            properties,
        })
    }

    fn is_responding(&self, server: &ServerDetails) -> bool {
        let host = server.string_attribute(ATTR_HOST).unwrap_or("localhost");
        let Some(port) = server
            .int_attribute(ATTR_HTTP_PORT)
            .and_then(|p| u16::try_from(p).ok())
        else {
            return false;
        };

        let Ok(addresses) = (host, port).to_socket_addrs() else {
            return false;
        };
        addresses
            .into_iter()
            .any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
    }
}
