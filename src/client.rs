//! Client side of the session protocol.
//!
//! [`ClientSessionManager`] holds at most one HTTP transport and at most one
//! session id. The id is learned from the `Mcp-Session-Id` response header of
//! `initialize` and attached to every later request until the session is
//! terminated.

use crate::protocol::{
    error_codes, implementation, is_tool_error, methods, result_text, CallToolResult, ErrorData,
    Implementation, JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerInfoResult, Tool,
    EVENT_STREAM_MIME_TYPE, HEADER_SESSION_ID, JSON_MIME_TYPE, LATEST_PROTOCOL_VERSION,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Timeout for a single HTTP exchange with the server.
const HTTP_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Not connected")]
    NotConnected,
    #[error("No session to terminate")]
    NoSession,
    #[error("Server error {code} (HTTP {status}): {message}")]
    Rpc {
        status: u16,
        code: i32,
        message: String,
    },
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Tool call failed: {0}")]
    ToolFailed(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

impl ClientError {
    /// Whether the server refused the request because the session id is
    /// missing or unknown.
    pub fn is_session_rejected(&self) -> bool {
        matches!(
            self,
            ClientError::Rpc { status: 400 | 404, code, .. }
                if *code == error_codes::SERVER_ERROR.0
        )
    }
}

/// Result of [`ClientSessionManager::terminate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// The server ended the session; the held id and transport are gone.
    Terminated,
    /// The server does not support teardown (stateless). The held id is
    /// cleared.
    NotSupported,
    /// The server answered with an unexpected status; the id is kept.
    Retained { session_id: String, status: u16 },
}

/// Decoded body of one POST exchange.
struct Exchange {
    status: StatusCode,
    session_id: Option<String>,
    message: Option<JsonRpcResponse>,
}

/// Connection and session state for one MCP server.
pub struct ClientSessionManager {
    url: String,
    client_info: Implementation,
    /// HTTP transport, present after a successful `connect`.
    transport: RwLock<Option<Client>>,
    /// Session id issued by the server.
    session_id: RwLock<Option<String>>,
    next_id: AtomicI64,
}

impl ClientSessionManager {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_info: implementation("dice-mcp-client", env!("CARGO_PKG_VERSION")),
            transport: RwLock::new(None),
            session_id: RwLock::new(None),
            next_id: AtomicI64::new(1),
        }
    }

    /// Start with a previously issued session id. `connect` will try to
    /// re-attach to it before opening a new one.
    pub fn with_session_id(url: impl Into<String>, session_id: impl Into<String>) -> Self {
        let mut manager = Self::new(url);
        *manager.session_id.get_mut() = Some(session_id.into());
        manager
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn session_id(&self) -> Option<String> {
        self.session_id.read().await.clone()
    }

    pub async fn is_connected(&self) -> bool {
        self.transport.read().await.is_some()
    }

    /// Open the transport and establish a session.
    ///
    /// A held id is checked with `server/info`; if the server no longer
    /// knows it, the id is dropped and a fresh `initialize` handshake runs.
    /// The transport is kept only once the handshake succeeds.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
            .build()?;
        self.handshake(&client).await?;
        *self.transport.write().await = Some(client);

        match self.session_id().await {
            Some(id) => info!(session_id = %id, "Connected"),
            None => info!("Connected without a session"),
        }
        Ok(())
    }

    async fn handshake(&self, client: &Client) -> Result<(), ClientError> {
        if let Some(held) = self.session_id().await {
            match self.call(client, methods::SERVER_INFO, None).await {
                Ok((_, Some(_))) => {
                    info!(session_id = %held, "Re-attached to session");
                    return Ok(());
                }
                Ok((_, None)) => {
                    info!(session_id = %held, "Server issues no sessions; dropping held id");
                    *self.session_id.write().await = None;
                    return Ok(());
                }
                Err(e) if e.is_session_rejected() => {
                    info!(session_id = %held, "Held session rejected; starting a new one");
                    *self.session_id.write().await = None;
                }
                Err(e) => return Err(e),
            }
        }

        let params = json!({
            "protocolVersion": LATEST_PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": self.client_info,
        });
        let (result, _) = self.call(client, methods::INITIALIZE, Some(params)).await?;
        debug!(?result, "Initialize result");
        self.notify(client, methods::INITIALIZED).await
    }

    /// Drop the local transport. The held session id is kept so a later
    /// `connect` can re-attach.
    pub async fn disconnect(&self) {
        *self.transport.write().await = None;
        debug!("Transport dropped");
    }

    async fn transport(&self) -> Result<Client, ClientError> {
        self.transport
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)
    }

    async fn post(
        &self,
        client: &Client,
        request: &JsonRpcRequest,
    ) -> Result<Exchange, ClientError> {
        let mut builder = client
            .post(&self.url)
            .header(CONTENT_TYPE, JSON_MIME_TYPE)
            .header(ACCEPT, format!("{JSON_MIME_TYPE}, {EVENT_STREAM_MIME_TYPE}"))
            .json(request);
        if let Some(id) = self.session_id().await {
            builder = builder.header(HEADER_SESSION_ID, id);
        }

        let response = builder.send().await?;
        let status = response.status();
        let session_id = response
            .headers()
            .get(HEADER_SESSION_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with(EVENT_STREAM_MIME_TYPE));
        let body = response.text().await?;

        let message = if body.trim().is_empty() {
            None
        } else {
            let payload = if is_sse {
                sse_data(&body).ok_or_else(|| {
                    ClientError::Transport("event stream carried no message".to_string())
                })?
            } else {
                body.clone()
            };
            match serde_json::from_str::<JsonRpcResponse>(&payload) {
                Ok(message) => Some(message),
                Err(_) if !status.is_success() => {
                    return Err(ClientError::Http {
                        status: status.as_u16(),
                        body,
                    })
                }
                Err(e) => {
                    return Err(ClientError::Transport(format!("invalid response: {e}")));
                }
            }
        };

        Ok(Exchange {
            status,
            session_id,
            message,
        })
    }

    /// Send one request over the connected transport and return its `result`.
    pub async fn issue_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, ClientError> {
        let client = self.transport().await?;
        let (result, _) = self.call(&client, method, params).await?;
        Ok(result)
    }

    /// One request/response exchange. Returns the `result` and the session
    /// id header of the response, which also replaces the held id.
    async fn call(
        &self,
        client: &Client,
        method: &str,
        params: Option<Value>,
    ) -> Result<(Value, Option<String>), ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let exchange = self.post(client, &request).await?;

        if let Some(issued) = exchange.session_id.as_deref() {
            let mut held = self.session_id.write().await;
            if held.as_deref() != Some(issued) {
                debug!(session_id = %issued, "Session id issued");
                *held = Some(issued.to_string());
            }
        }

        let status = exchange.status.as_u16();
        let result = match exchange.message {
            Some(message) => message.into_result().map_err(|e| rpc_error(status, e))?,
            None if exchange.status.is_success() => Value::Null,
            None => {
                return Err(ClientError::Http {
                    status,
                    body: String::new(),
                })
            }
        };
        Ok((result, exchange.session_id))
    }

    async fn notify(&self, client: &Client, method: &str) -> Result<(), ClientError> {
        let exchange = self
            .post(client, &JsonRpcRequest::notification(method))
            .await?;
        if exchange.status.is_success() {
            return Ok(());
        }
        let status = exchange.status.as_u16();
        Err(match exchange.message.and_then(|m| m.error) {
            Some(error) => rpc_error(status, error),
            None => ClientError::Http {
                status,
                body: String::new(),
            },
        })
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let result = self.issue_request(method, params).await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Transport(format!("unexpected {method} result: {e}")))
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        let result: ListToolsResult = self.request_as(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    /// Call a tool. A result flagged `isError` becomes [`ClientError::ToolFailed`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<CallToolResult, ClientError> {
        let params = json!({"name": name, "arguments": arguments});
        let result: CallToolResult = self.request_as(methods::TOOLS_CALL, Some(params)).await?;
        if is_tool_error(&result) {
            return Err(ClientError::ToolFailed(result_text(&result)));
        }
        Ok(result)
    }

    /// Roll the `dice` tool and parse the face.
    pub async fn roll_dice(&self, sides: u64) -> Result<u64, ClientError> {
        let mut arguments = Map::new();
        arguments.insert("sides".to_string(), json!(sides));
        let result = self.call_tool("dice", arguments).await?;
        let text = result_text(&result);
        text.trim()
            .parse()
            .map_err(|_| ClientError::ToolFailed(format!("unexpected dice output: {text}")))
    }

    pub async fn server_info(&self) -> Result<ServerInfoResult, ClientError> {
        self.request_as(methods::SERVER_INFO, None).await
    }

    /// Ask the server to end the held session with HTTP `DELETE`.
    pub async fn terminate(&self) -> Result<TerminateOutcome, ClientError> {
        let Some(session_id) = self.session_id().await else {
            return Err(ClientError::NoSession);
        };
        let client = self.transport().await?;

        let response = client
            .delete(&self.url)
            .header(HEADER_SESSION_ID, &session_id)
            .send()
            .await?;
        let status = response.status();

        if status.is_success() {
            *self.session_id.write().await = None;
            *self.transport.write().await = None;
            info!(session_id = %session_id, "Session terminated");
            Ok(TerminateOutcome::Terminated)
        } else if status == StatusCode::METHOD_NOT_ALLOWED {
            *self.session_id.write().await = None;
            info!(session_id = %session_id, "Server does not support session termination");
            Ok(TerminateOutcome::NotSupported)
        } else {
            warn!(
                session_id = %session_id,
                status = status.as_u16(),
                "Session termination failed; keeping session id"
            );
            Ok(TerminateOutcome::Retained {
                session_id,
                status: status.as_u16(),
            })
        }
    }
}

fn rpc_error(status: u16, error: ErrorData) -> ClientError {
    ClientError::Rpc {
        status,
        code: error.code.0,
        message: error.message.into_owned(),
    }
}

/// Join the `data:` lines of the first complete event in an SSE body.
fn sse_data(body: &str) -> Option<String> {
    let mut data: Vec<&str> = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            if !data.is_empty() {
                break;
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        }
    }
    if data.is_empty() {
        None
    } else {
        Some(data.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sse_data_takes_first_event() {
        let body = "id: s-0_0\nevent: message\ndata: {\"a\":1}\n\n\
                    event: message\ndata: {\"b\":2}\n\n";
        assert_eq!(sse_data(body).as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn sse_data_joins_multiline_payloads() {
        let body = "event: message\ndata: {\"a\":\ndata:1}\n\n";
        assert_eq!(sse_data(body).as_deref(), Some("{\"a\":\n1}"));
        assert_eq!(sse_data(": keep-alive\n\n"), None);
    }

    #[test]
    fn session_rejection_is_recognised() {
        let rejected = ClientError::Rpc {
            status: 400,
            code: error_codes::SERVER_ERROR.0,
            message: "Bad Request: No valid session ID provided".to_string(),
        };
        assert!(rejected.is_session_rejected());

        let not_allowed = ClientError::Rpc {
            status: 405,
            code: error_codes::SERVER_ERROR.0,
            message: "Method not allowed.".to_string(),
        };
        assert!(!not_allowed.is_session_rejected());
        assert!(!ClientError::NotConnected.is_session_rejected());
    }

    #[tokio::test]
    async fn requests_require_connect() {
        let client = ClientSessionManager::new("http://127.0.0.1:9/mcp");
        assert!(matches!(
            client.list_tools().await,
            Err(ClientError::NotConnected)
        ));
        assert!(matches!(client.terminate().await, Err(ClientError::NoSession)));

        let held = ClientSessionManager::with_session_id("http://127.0.0.1:9/mcp", "abc");
        assert_eq!(held.session_id().await.as_deref(), Some("abc"));
        assert!(matches!(held.terminate().await, Err(ClientError::NotConnected)));
        assert_eq!(held.session_id().await.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn failed_connect_leaves_client_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ClientSessionManager::new(format!("http://{addr}/mcp"));
        assert!(matches!(
            client.connect().await,
            Err(ClientError::Transport(_))
        ));
        assert!(!client.is_connected().await);
        assert!(matches!(
            client.list_tools().await,
            Err(ClientError::NotConnected)
        ));

        let held = ClientSessionManager::with_session_id(format!("http://{addr}/mcp"), "abc");
        assert!(held.connect().await.is_err());
        assert!(!held.is_connected().await);
        assert_eq!(held.session_id().await.as_deref(), Some("abc"));
    }
}
