//! Request dispatch.
//!
//! Maps each protocol method onto a [`Session`] operation. Malformed or
//! missing parameters never become JSON-RPC errors: queries answer with
//! their "nothing found" value and mutating calls with a failed
//! [`StatusCode`].

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::model::{
    CreateServerParams, CreateServerResponse, DiscoveryPath, LaunchAttributesRequest,
    LaunchParameters, ServerHandle, ServerStartingAttributes, ServerType, StatusCode,
    StopServerAttributes,
};
use crate::protocol::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::protocol::methods;
use crate::session::Session;

/// Decodes the request parameters, treating absent and `null` alike.
fn parse<T: DeserializeOwned>(req: &JsonRpcRequest) -> Result<T, String> {
    req.params
        .as_ref()
        .filter(|p| !p.is_null())
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "missing params".to_string())
}

fn respond<T: Serialize>(id: RequestId, result: &T) -> Result<JsonRpcResponse, JsonRpcError> {
    serde_json::to_value(result)
        .map(|value| JsonRpcResponse::success(id.clone(), value))
        .map_err(|e| JsonRpcError::internal_error(id, format!("Failed to encode result: {e}")))
}

/// Dispatches requests of one connection to the shared session.
#[derive(Debug, Clone)]
pub struct RequestHandler {
    session: Arc<Session>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl RequestHandler {
    /// Creates a handler; `server/shutdown` sets `shutdown` to `true`.
    #[must_use]
    pub const fn new(session: Arc<Session>, shutdown: Arc<watch::Sender<bool>>) -> Self {
        Self { session, shutdown }
    }

    /// The session requests operate on.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Handles one request.
    ///
    /// # Errors
    ///
    /// Returns a JSON-RPC error for unknown methods, or if the result
    /// cannot be encoded.
    #[allow(clippy::too_many_lines)] // one arm per protocol method
    pub async fn handle(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        debug!(method = %req.method, id = %req.id, "Handling request");
        let id = req.id.clone();
        let session = &self.session;

        match req.method.as_str() {
            methods::ADD_DISCOVERY_PATH => {
                let status = match parse::<DiscoveryPath>(req) {
                    Ok(path) => session.add_discovery_path(&path).await,
                    Err(detail) => StatusCode::invalid_request(&detail),
                };
                respond(id, &status)
            }
            methods::REMOVE_DISCOVERY_PATH => {
                let status = match parse::<DiscoveryPath>(req) {
                    Ok(path) => session.remove_discovery_path(&path).await,
                    Err(detail) => StatusCode::invalid_request(&detail),
                };
                respond(id, &status)
            }
            methods::GET_DISCOVERY_PATHS => respond(id, &session.discovery_paths().await),
            methods::FIND_SERVER_BEANS => {
                let beans = match parse::<DiscoveryPath>(req) {
                    Ok(path) => session.find_server_beans(&path).await,
                    Err(_) => Vec::new(),
                };
                respond(id, &beans)
            }

            methods::GET_SERVER_TYPES => respond(id, &session.server_types()),
            methods::GET_SERVER_HANDLES => respond(id, &session.server_handles().await),
            methods::CREATE_SERVER => {
                let response = match parse::<CreateServerParams>(req) {
                    Ok(params) => session.create_server(&params).await,
                    Err(detail) => {
                        CreateServerResponse::failed(StatusCode::invalid_request(&detail))
                    }
                };
                respond(id, &response)
            }
            methods::DELETE_SERVER => {
                let status = match parse::<ServerHandle>(req) {
                    Ok(handle) => session.delete_server(&handle).await,
                    Err(detail) => StatusCode::invalid_request(&detail),
                };
                respond(id, &status)
            }
            methods::GET_SERVER_STATE => {
                let state = match parse::<ServerHandle>(req) {
                    Ok(handle) => session.server_state(&handle).await,
                    Err(_) => None,
                };
                respond(id, &state)
            }

            methods::GET_LAUNCH_MODES => respond(
                id,
                &parse::<ServerType>(req)
                    .ok()
                    .and_then(|t| session.launch_modes(&t)),
            ),
            methods::GET_REQUIRED_ATTRIBUTES => respond(
                id,
                &parse::<ServerType>(req)
                    .ok()
                    .and_then(|t| session.required_attributes(&t)),
            ),
            methods::GET_OPTIONAL_ATTRIBUTES => respond(
                id,
                &parse::<ServerType>(req)
                    .ok()
                    .and_then(|t| session.optional_attributes(&t)),
            ),
            methods::GET_REQUIRED_LAUNCH_ATTRIBUTES => respond(
                id,
                &parse::<LaunchAttributesRequest>(req)
                    .ok()
                    .and_then(|r| session.required_launch_attributes(&r)),
            ),
            methods::GET_OPTIONAL_LAUNCH_ATTRIBUTES => respond(
                id,
                &parse::<LaunchAttributesRequest>(req)
                    .ok()
                    .and_then(|r| session.optional_launch_attributes(&r)),
            ),
            methods::GET_LAUNCH_COMMAND => {
                let command = match parse::<LaunchParameters>(req) {
                    Ok(params) => session.launch_command(&params).await,
                    Err(_) => None,
                };
                respond(id, &command)
            }

            methods::START_SERVER_ASYNC => {
                let status = match parse::<LaunchParameters>(req) {
                    Ok(params) => session.start_server(&params).await,
                    Err(detail) => StatusCode::invalid_request(&detail),
                };
                respond(id, &status)
            }
            methods::STOP_SERVER => {
                let status = match parse::<StopServerAttributes>(req) {
                    Ok(attrs) => session.stop_server(&attrs).await,
                    Err(detail) => StatusCode::invalid_request(&detail),
                };
                respond(id, &status)
            }
            methods::SERVER_STARTING_BY_CLIENT => {
                let status = match parse::<ServerStartingAttributes>(req) {
                    Ok(attrs) => session.server_starting_by_client(&attrs).await,
                    Err(detail) => StatusCode::invalid_request(&detail),
                };
                respond(id, &status)
            }
            methods::SERVER_STARTED_BY_CLIENT => {
                let status = match parse::<LaunchParameters>(req) {
                    Ok(params) => session.server_started_by_client(&params).await,
                    Err(detail) => StatusCode::invalid_request(&detail),
                };
                respond(id, &status)
            }

            methods::SHUTDOWN => {
                info!("Shutdown requested by client");
                self.shutdown.send_replace(true);
                respond(id, &StatusCode::ok())
            }
            methods::PING => Ok(JsonRpcResponse::success(id, json!({}))),

            _ => Err(JsonRpcError::method_not_found(id, &req.method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::protocol::jsonrpc::ErrorCode;

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        }))
        .unwrap()
    }

    fn handler() -> (RequestHandler, watch::Receiver<bool>) {
        let (shutdown, requested) = watch::channel(false);
        (
            RequestHandler::new(Arc::new(Session::with_defaults()), Arc::new(shutdown)),
            requested,
        )
    }

    async fn call(handler: &RequestHandler, method: &str, params: Value) -> Value {
        handler.handle(&request(method, params)).await.unwrap().result
    }

    // ==================== Invalid input policy ====================

    #[tokio::test]
    async fn mutating_call_with_null_params_fails_softly() {
        let (handler, _) = handler();
        for method in [
            methods::ADD_DISCOVERY_PATH,
            methods::REMOVE_DISCOVERY_PATH,
            methods::DELETE_SERVER,
            methods::START_SERVER_ASYNC,
            methods::STOP_SERVER,
            methods::SERVER_STARTING_BY_CLIENT,
            methods::SERVER_STARTED_BY_CLIENT,
        ] {
            let result = call(&handler, method, Value::Null).await;
            assert!(result["severity"].as_u64().unwrap() > 0, "{method}");
            assert!(
                result["message"].as_str().unwrap().starts_with("Invalid request: "),
                "{method}"
            );
        }

        let created = call(&handler, methods::CREATE_SERVER, json!({"bogus": 1})).await;
        assert!(created["status"]["severity"].as_u64().unwrap() > 0);
        assert!(created.get("handle").is_none());
    }

    #[tokio::test]
    async fn query_with_null_params_finds_nothing() {
        let (handler, _) = handler();
        assert_eq!(call(&handler, methods::FIND_SERVER_BEANS, Value::Null).await, json!([]));
        assert_eq!(call(&handler, methods::GET_SERVER_STATE, Value::Null).await, Value::Null);
        assert_eq!(call(&handler, methods::GET_LAUNCH_MODES, Value::Null).await, Value::Null);
        assert_eq!(call(&handler, methods::GET_LAUNCH_COMMAND, Value::Null).await, Value::Null);
        assert_eq!(
            call(&handler, methods::GET_REQUIRED_LAUNCH_ATTRIBUTES, json!(42)).await,
            Value::Null
        );
    }

    #[tokio::test]
    async fn unknown_method_is_a_protocol_error() {
        let (handler, _) = handler();
        let err = handler
            .handle(&request("server/frobnicate", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.error.code, ErrorCode::MethodNotFound.code());
    }

    // ==================== Lookups ====================

    #[tokio::test]
    async fn server_types_and_launch_modes() {
        let (handler, _) = handler();
        let types = call(&handler, methods::GET_SERVER_TYPES, Value::Null).await;
        assert_eq!(types[0]["id"], "wildfly");

        let modes = call(&handler, methods::GET_LAUNCH_MODES, json!({"id": "wildfly"})).await;
        assert_eq!(modes.as_array().unwrap().len(), 2);

        let unknown = call(&handler, methods::GET_LAUNCH_MODES, json!({"id": "tomcat"})).await;
        assert!(unknown.is_null());
    }

    #[tokio::test]
    async fn stop_unknown_server_reports_missing() {
        let (handler, _) = handler();
        let status = call(&handler, methods::STOP_SERVER, json!({"id": "x", "force": false})).await;
        assert_eq!(status["message"], "Server x does not exist");
    }

    // ==================== Shutdown ====================

    #[tokio::test]
    async fn shutdown_sets_flag_and_pings_answer() {
        let (handler, requested) = handler();
        assert_eq!(call(&handler, methods::PING, Value::Null).await, json!({}));
        assert!(!*requested.borrow());

        let status = call(&handler, methods::SHUTDOWN, Value::Null).await;
        assert_eq!(status["severity"], 0);
        assert!(*requested.borrow());
    }
}
