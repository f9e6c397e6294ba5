//! Protocol data model.
//!
//! Every type here is part of the wire contract and serialises to the
//! camel-cased JSON shapes clients expect.

mod launch;
mod server;
mod status;

pub use launch::{
    Attribute, AttributeType, Attributes, CommandLineDetails, CreateServerParams,
    CreateServerResponse, LaunchAttributesRequest, LaunchMode, LaunchParameters,
    ServerAttributes, ServerStartingAttributes, StopServerAttributes, SERVER_HOME_DIR,
};
pub use server::{
    DiscoveryPath, ServerBean, ServerHandle, ServerProcess, ServerState, ServerStateChange,
    ServerStateInfo, ServerType, UNKNOWN_TYPE_CATEGORY,
};
pub use status::StatusCode;
