//! JSON-RPC 2.0 envelope for the MCP subset served over HTTP.
//!
//! MCP payloads (initialize, tools, content, errors) are the `rmcp::model`
//! types. This module adds the request/response envelope the router reads
//! before any session exists, the `server/info` payload, and the closed
//! [`RequestKind`] classification. Everything downstream (router, handler,
//! client) matches on `RequestKind` instead of raw method strings.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ErrorCode, ErrorData, Implementation,
    InitializeRequestParams, InitializeResult, JsonObject, ListToolsResult, ProtocolVersion,
    ServerCapabilities, Tool,
};

/// Header carrying the session identifier on requests and responses.
pub const HEADER_SESSION_ID: &str = "mcp-session-id";
pub const EVENT_STREAM_MIME_TYPE: &str = "text/event-stream";
pub const JSON_MIME_TYPE: &str = "application/json";

pub const JSONRPC_VERSION: &str = "2.0";
pub const LATEST_PROTOCOL_VERSION: ProtocolVersion = ProtocolVersion::V_2025_03_26;
pub const SUPPORTED_PROTOCOL_VERSIONS: [ProtocolVersion; 2] =
    [ProtocolVersion::V_2025_03_26, ProtocolVersion::V_2024_11_05];

/// JSON-RPC error codes used on the wire.
pub mod error_codes {
    use super::ErrorCode;

    pub const PARSE_ERROR: ErrorCode = ErrorCode::PARSE_ERROR;
    pub const INVALID_REQUEST: ErrorCode = ErrorCode::INVALID_REQUEST;
    pub const METHOD_NOT_FOUND: ErrorCode = ErrorCode::METHOD_NOT_FOUND;
    pub const INVALID_PARAMS: ErrorCode = ErrorCode::INVALID_PARAMS;
    pub const INTERNAL_ERROR: ErrorCode = ErrorCode::INTERNAL_ERROR;
    /// Implementation-defined server error; used for "no valid session",
    /// malformed handshakes and "method not allowed" (told apart by the
    /// HTTP status).
    pub const SERVER_ERROR: ErrorCode = ErrorCode(-32000);
}

/// Method names understood by the server.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const SERVER_INFO: &str = "server/info";
    pub const NOTIFICATION_PREFIX: &str = "notifications/";
}

/// JSON-RPC request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// A JSON-RPC request or notification (a notification has no `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(RequestId::Number(id)),
            method: method.into(),
            params,
        }
    }

    pub fn notification(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.into(),
            params: None,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A JSON-RPC response. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    /// `null` when the request id could not be determined.
    pub id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, error: ErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Split into the success payload or the error object.
    pub fn into_result(self) -> Result<Value, ErrorData> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Server or client identity with every optional field left empty.
pub fn implementation(name: impl Into<String>, version: impl Into<String>) -> Implementation {
    Implementation {
        name: name.into(),
        version: version.into(),
        ..Default::default()
    }
}

/// All text items of a tool result joined with newlines.
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.raw.as_text().map(|t| t.text.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether a tool result is flagged `isError`.
pub fn is_tool_error(result: &CallToolResult) -> bool {
    result.is_error.unwrap_or(false)
}

/// Per-session counters reported by `server/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub tool_calls: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfoResult {
    #[serde(flatten)]
    pub server: Implementation,
    /// `"stateful"` or `"stateless"`.
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSummary>,
}

/// Closed classification of an inbound message.
#[derive(Debug, Clone)]
pub enum RequestKind {
    /// `initialize` with well-formed params.
    Initialize(InitializeRequestParams),
    /// The literal `initialize` method sent without params, accepted from
    /// older callers that skip the handshake payload.
    LegacyInitialize,
    /// `server/info`; answerable with or without a session.
    ServerInfo,
    ListTools,
    CallTool(CallToolRequestParams),
    /// Any `notifications/*` message.
    Notification(String),
    /// Explicit session teardown (HTTP `DELETE`, never a JSON method).
    Terminate,
    /// A known method whose params are present but could not be decoded.
    Malformed { method: String, reason: String },
    Unknown(String),
}

impl RequestKind {
    pub fn classify(request: &JsonRpcRequest) -> Self {
        let params = request.params.clone().unwrap_or(Value::Null);
        let malformed = |e: serde_json::Error| RequestKind::Malformed {
            method: request.method.clone(),
            reason: e.to_string(),
        };
        match request.method.as_str() {
            methods::INITIALIZE if params.is_null() => RequestKind::LegacyInitialize,
            methods::INITIALIZE => serde_json::from_value(params)
                .map(RequestKind::Initialize)
                .unwrap_or_else(malformed),
            methods::SERVER_INFO => RequestKind::ServerInfo,
            methods::TOOLS_LIST => RequestKind::ListTools,
            methods::TOOLS_CALL => serde_json::from_value(params)
                .map(RequestKind::CallTool)
                .unwrap_or_else(malformed),
            m if m.starts_with(methods::NOTIFICATION_PREFIX) => {
                RequestKind::Notification(m.to_string())
            }
            other => RequestKind::Unknown(other.to_string()),
        }
    }

    /// Whether a request of this kind may create a session when it arrives
    /// without one.
    pub fn opens_session(&self) -> bool {
        matches!(
            self,
            RequestKind::Initialize(_) | RequestKind::LegacyInitialize | RequestKind::ServerInfo
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest::new(1, method, Some(params))
    }

    #[test]
    fn initialize_with_params_is_canonical() {
        let req = request(
            "initialize",
            json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0.0"}
            }),
        );
        match RequestKind::classify(&req) {
            RequestKind::Initialize(params) => {
                assert_eq!(params.protocol_version, ProtocolVersion::V_2025_03_26);
                assert_eq!(params.client_info.name, "test");
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn bare_initialize_is_legacy() {
        for req in [
            JsonRpcRequest::new(1, "initialize", None),
            request("initialize", Value::Null),
        ] {
            assert!(matches!(
                RequestKind::classify(&req),
                RequestKind::LegacyInitialize
            ));
        }
        assert!(RequestKind::LegacyInitialize.opens_session());
    }

    #[test]
    fn undecodable_initialize_is_malformed() {
        let req = request(
            "initialize",
            json!({"protocolVersion": 42, "clientInfo": "bogus"}),
        );
        let kind = RequestKind::classify(&req);
        assert!(matches!(
            &kind,
            RequestKind::Malformed { method, .. } if method == "initialize"
        ));
        assert!(!kind.opens_session());
    }

    #[test]
    fn tool_call_without_name_is_malformed() {
        let req = request("tools/call", json!({"arguments": {"sides": 6}}));
        assert!(matches!(
            RequestKind::classify(&req),
            RequestKind::Malformed { .. }
        ));
    }

    #[test]
    fn notifications_and_unknown_methods() {
        let note = JsonRpcRequest::notification(methods::INITIALIZED);
        assert!(note.is_notification());
        assert!(matches!(
            RequestKind::classify(&note),
            RequestKind::Notification(m) if m == "notifications/initialized"
        ));
        let unknown = request("resources/list", json!({}));
        assert!(matches!(
            RequestKind::classify(&unknown),
            RequestKind::Unknown(m) if m == "resources/list"
        ));
        assert!(!RequestKind::ListTools.opens_session());
        assert!(!RequestKind::Terminate.opens_session());
    }

    #[test]
    fn error_response_serializes_null_id() {
        let resp = JsonRpcResponse::error(
            None,
            ErrorData::new(error_codes::SERVER_ERROR, "Method not allowed.", None),
        );
        let wire = serde_json::to_value(&resp).unwrap();
        assert_eq!(wire["jsonrpc"], "2.0");
        assert_eq!(wire["id"], Value::Null);
        assert_eq!(wire["error"]["code"], -32000);
        assert_eq!(wire["error"]["message"], "Method not allowed.");
        assert!(wire.get("result").is_none());
    }

    #[test]
    fn tool_result_wire_shape() {
        let ok = CallToolResult::success(vec![Content::text("4")]);
        let wire = serde_json::to_value(&ok).unwrap();
        assert_eq!(wire["content"], json!([{"type": "text", "text": "4"}]));
        assert_eq!(result_text(&ok), "4");
        assert!(!is_tool_error(&ok));

        let parsed: CallToolResult =
            serde_json::from_value(json!({"content": [], "isError": true})).unwrap();
        assert!(is_tool_error(&parsed));
    }
}
