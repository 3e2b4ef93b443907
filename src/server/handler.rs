//! MCP method handling shared by stateful and stateless servers.

use super::ServerMode;
use crate::error::RouteError;
use crate::protocol::{
    Implementation, InitializeResult, ListToolsResult, ProtocolVersion, RequestKind,
    ServerCapabilities, ServerInfoResult, LATEST_PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::session::Session;
use crate::tools::ToolSet;
use serde_json::Value;
use tracing::{debug, info};

/// Answers MCP requests. Session bookkeeping is the router's job; the handler
/// only reads and updates the session it is given.
pub struct McpHandler {
    tools: ToolSet,
    server_info: Implementation,
    mode: ServerMode,
}

impl McpHandler {
    pub fn new(tools: ToolSet, server_info: Implementation, mode: ServerMode) -> Self {
        Self {
            tools,
            server_info,
            mode,
        }
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    fn instructions(&self) -> String {
        match self.mode {
            ServerMode::Stateful => "Dice server. Call initialize once; the returned \
                 Mcp-Session-Id header must accompany every later request. Send DELETE to \
                 end the session."
                .to_string(),
            ServerMode::Stateless => "Dice server. Every request is independent; no session \
                 header is issued."
                .to_string(),
        }
    }

    fn negotiate_version(requested: Option<&ProtocolVersion>) -> ProtocolVersion {
        requested
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .cloned()
            .unwrap_or(LATEST_PROTOCOL_VERSION)
    }

    fn initialize(
        &self,
        requested: Option<&ProtocolVersion>,
        session: Option<&Session>,
    ) -> Result<Value, RouteError> {
        if let Some(session) = session {
            if session.mark_initialized() {
                return Err(RouteError::invalid_request(
                    "Invalid Request: Server already initialized",
                ));
            }
        }
        let result = InitializeResult {
            protocol_version: Self::negotiate_version(requested),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: self.server_info.clone(),
            instructions: Some(self.instructions()),
            ..Default::default()
        };
        serde_json::to_value(result).map_err(|e| RouteError::Internal(e.to_string()))
    }

    /// Handle one request. `Ok(None)` means there is nothing to send back
    /// (notifications).
    pub fn handle(
        &self,
        kind: RequestKind,
        session: Option<&Session>,
    ) -> Result<Option<Value>, RouteError> {
        let session_id = session.map(Session::id).unwrap_or("-");
        match kind {
            RequestKind::Initialize(params) => {
                info!(
                    session_id,
                    client = %params.client_info.name,
                    protocol_version = ?params.protocol_version,
                    "Initialize"
                );
                self.initialize(Some(&params.protocol_version), session)
                    .map(Some)
            }
            RequestKind::LegacyInitialize => {
                info!(session_id, "Initialize (no handshake params)");
                self.initialize(None, session).map(Some)
            }
            RequestKind::ServerInfo => {
                let result = ServerInfoResult {
                    server: self.server_info.clone(),
                    mode: self.mode.to_string(),
                    session: session.map(Session::summary),
                };
                serde_json::to_value(result)
                    .map(Some)
                    .map_err(|e| RouteError::Internal(e.to_string()))
            }
            RequestKind::ListTools => {
                serde_json::to_value(ListToolsResult::with_all_items(self.tools.list()))
                    .map(Some)
                    .map_err(|e| RouteError::Internal(e.to_string()))
            }
            RequestKind::CallTool(params) => {
                if let Some(session) = session {
                    let calls = session.record_tool_call();
                    debug!(session_id, tool = %params.name, calls, "Tool call");
                }
                let result = self.tools.call(&params.name, params.arguments.as_ref())?;
                serde_json::to_value(result)
                    .map(Some)
                    .map_err(|e| RouteError::Internal(e.to_string()))
            }
            RequestKind::Notification(method) => {
                debug!(session_id, method = %method, "Notification");
                Ok(None)
            }
            RequestKind::Terminate => Err(RouteError::invalid_request(
                "Session teardown must be sent as HTTP DELETE",
            )),
            RequestKind::Malformed { method, reason } => Err(RouteError::invalid_params(
                format!("Invalid params for {method}: {reason}"),
            )),
            RequestKind::Unknown(method) => Err(RouteError::method_not_found(&method)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        error_codes, implementation, CallToolRequestParams, InitializeRequestParams,
    };
    use serde_json::json;

    fn handler(mode: ServerMode) -> McpHandler {
        McpHandler::new(
            ToolSet::builtin(),
            implementation("test-server", "1.0.0"),
            mode,
        )
    }

    fn init_params(version: &str) -> InitializeRequestParams {
        serde_json::from_value(json!({
            "protocolVersion": version,
            "capabilities": {},
            "clientInfo": {"name": "test-client", "version": "1.0.0"}
        }))
        .expect("initialize params")
    }

    #[test]
    fn initialize_negotiates_version() {
        let h = handler(ServerMode::Stateless);
        let result = h
            .handle(RequestKind::Initialize(init_params("2024-11-05")), None)
            .unwrap()
            .unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "test-server");

        let result = h
            .handle(RequestKind::Initialize(init_params("1999-01-01")), None)
            .unwrap()
            .unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
    }

    #[test]
    fn second_initialize_on_session_is_rejected() {
        let h = handler(ServerMode::Stateful);
        let session = Session::new("s".to_string());
        assert!(h.handle(RequestKind::LegacyInitialize, Some(&session)).is_ok());
        let err = h
            .handle(RequestKind::Initialize(init_params("2025-03-26")), Some(&session))
            .unwrap_err();
        assert_eq!(err.to_error_data().code, error_codes::INVALID_REQUEST);
    }

    #[test]
    fn tool_calls_are_counted_per_session() {
        let h = handler(ServerMode::Stateful);
        let a = Session::new("a".to_string());
        let b = Session::new("b".to_string());
        let call = || {
            let params: CallToolRequestParams =
                serde_json::from_value(json!({"name": "dice"})).expect("call params");
            RequestKind::CallTool(params)
        };
        h.handle(call(), Some(&a)).unwrap();
        h.handle(call(), Some(&a)).unwrap();
        assert_eq!(a.tool_calls(), 2);
        assert_eq!(b.tool_calls(), 0);

        let info = h.handle(RequestKind::ServerInfo, Some(&b)).unwrap().unwrap();
        assert_eq!(info["mode"], "stateful");
        assert_eq!(info["session"]["toolCalls"], 0);
    }

    #[test]
    fn notifications_and_unknown_methods() {
        let h = handler(ServerMode::Stateless);
        assert_eq!(
            h.handle(RequestKind::Notification("notifications/initialized".into()), None)
                .unwrap(),
            None
        );
        let err = h
            .handle(RequestKind::Unknown("prompts/list".into()), None)
            .unwrap_err();
        assert_eq!(err.to_error_data().code, error_codes::METHOD_NOT_FOUND);
    }
}
