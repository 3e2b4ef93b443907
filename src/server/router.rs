//! Request router: decides, per request, which session (if any) serves it.
//!
//! Stateful precedence:
//!
//! 1. **Continue** - a session id was sent and resolves.
//! 2. **Create** - no session id, and the request opens sessions
//!    (`initialize`, legacy `initialize`, `server/info`).
//! 3. **Reject** - an unresolvable id, or no id on a request that needs one.
//! 4. **Teardown** - `DELETE` with a resolvable id.
//!
//! Stateless routers skip all of this and serve every request from one shared
//! handler.

use super::handler::McpHandler;
use super::ServerMode;
use crate::error::RouteError;
use crate::protocol::{methods, JsonRpcRequest, JsonRpcResponse, RequestId, RequestKind};
use crate::session::{EventId, Session, SessionId, SessionRegistry};
use hyper::http::StatusCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Routing decision for one request.
#[derive(Debug)]
pub enum Route {
    Continue(Arc<Session>),
    Create,
    Teardown(Arc<Session>),
    Reject(RouteError),
}

/// Framing-agnostic reply handed to the transport adapter.
#[derive(Debug)]
pub struct RouterReply {
    pub status: StatusCode,
    /// Value for the session id response header.
    pub session_id: Option<SessionId>,
    /// `None` for accepted notifications and successful teardown.
    pub message: Option<JsonRpcResponse>,
    /// Event id under which `message` was buffered for resumption.
    pub event_id: Option<EventId>,
}

impl RouterReply {
    fn ok(message: JsonRpcResponse) -> Self {
        Self {
            status: StatusCode::OK,
            session_id: None,
            message: Some(message),
            event_id: None,
        }
    }

    fn accepted() -> Self {
        Self {
            status: StatusCode::ACCEPTED,
            session_id: None,
            message: None,
            event_id: None,
        }
    }

    /// Structured error reply. Internal errors are logged with full detail.
    pub fn error(err: RouteError, id: Option<RequestId>) -> Self {
        match &err {
            RouteError::Internal(detail) => {
                error!(error = %detail, "Error handling MCP request")
            }
            other => debug!(error = %other, "Rejecting MCP request"),
        }
        Self {
            status: err.status(),
            session_id: None,
            message: Some(JsonRpcResponse::error(id, err.to_error_data())),
            event_id: None,
        }
    }

    fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

pub struct Router {
    mode: ServerMode,
    registry: Arc<SessionRegistry>,
    handler: McpHandler,
}

impl Router {
    pub fn new(handler: McpHandler) -> Self {
        Self::with_registry(handler, Arc::new(SessionRegistry::new()))
    }

    /// Build a router over an existing registry.
    pub fn with_registry(handler: McpHandler, registry: Arc<SessionRegistry>) -> Self {
        Self {
            mode: handler.mode(),
            registry,
            handler,
        }
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Classify a request against the registry. Stateful mode only.
    pub fn classify(&self, session_id: Option<&str>, kind: &RequestKind) -> Route {
        let resolved = session_id.map(|id| self.registry.get(id));
        match (kind, resolved) {
            (RequestKind::Terminate, Some(Ok(session))) => Route::Teardown(session),
            (RequestKind::Terminate, _) => Route::Reject(RouteError::SessionNotFound),
            (_, Some(Ok(session))) => Route::Continue(session),
            (_, Some(Err(_))) => Route::Reject(RouteError::SessionNotFound),
            (RequestKind::Malformed { method, reason }, None) if method == methods::INITIALIZE => {
                Route::Reject(RouteError::bad_request(format!(
                    "Invalid initialize params: {reason}"
                )))
            }
            (kind, None) if kind.opens_session() => Route::Create,
            (_, None) => Route::Reject(RouteError::SessionNotFound),
        }
    }

    /// Handle a JSON-RPC message delivered by `POST`.
    pub async fn handle_post(
        &self,
        session_id: Option<&str>,
        request: JsonRpcRequest,
    ) -> RouterReply {
        let id = request.id.clone();
        let kind = RequestKind::classify(&request);

        match self.mode {
            ServerMode::Stateless => match self.handler.handle(kind, None) {
                Ok(Some(result)) => RouterReply::ok(JsonRpcResponse::success(id, result)),
                Ok(None) => RouterReply::accepted(),
                Err(err) => RouterReply::error(err, id),
            },
            ServerMode::Stateful => match self.classify(session_id, &kind) {
                Route::Continue(session) => match self.dispatch(&session, id.clone(), kind).await {
                    Ok(reply) => reply.with_session(session.id()),
                    Err(err) => RouterReply::error(err, id),
                },
                Route::Create => self.create_and_dispatch(id, kind).await,
                Route::Teardown(_) => RouterReply::error(
                    RouteError::invalid_request("Session teardown must be sent as HTTP DELETE"),
                    id,
                ),
                Route::Reject(err) => {
                    if let Some(sid) = session_id {
                        debug!(session_id = %sid, method = %request.method, "Unknown session");
                    }
                    RouterReply::error(err, id)
                }
            },
        }
    }

    async fn create_and_dispatch(&self, id: Option<RequestId>, kind: RequestKind) -> RouterReply {
        let session_id = self.registry.create();
        let session = match self.registry.get(&session_id) {
            Ok(session) => session,
            Err(e) => {
                return RouterReply::error(
                    RouteError::Internal(format!("new session vanished: {e}")),
                    id,
                )
            }
        };
        info!(session_id = %session_id, "Initializing new session");

        match self.dispatch(&session, id.clone(), kind).await {
            Ok(reply) => reply.with_session(&session_id),
            Err(err) => {
                // The creating request failed, so the session was never handed out.
                self.registry.remove(&session_id).await;
                RouterReply::error(err, id)
            }
        }
    }

    /// Run one request on a session's binding, buffering the response.
    async fn dispatch(
        &self,
        session: &Session,
        id: Option<RequestId>,
        kind: RequestKind,
    ) -> Result<RouterReply, RouteError> {
        let _gate = session
            .acquire()
            .await
            .map_err(|_| RouteError::SessionNotFound)?;

        let Some(result) = self.handler.handle(kind, Some(session))? else {
            return Ok(RouterReply::accepted());
        };
        let message = JsonRpcResponse::success(id, result);
        let stream_id = session.open_stream();
        let event =
            serde_json::to_value(&message).map_err(|e| RouteError::Internal(e.to_string()))?;
        let event_id = session.record_event(&stream_id, event);

        let mut reply = RouterReply::ok(message);
        reply.event_id = Some(event_id);
        Ok(reply)
    }

    /// Handle an HTTP `DELETE` (explicit teardown).
    pub async fn handle_delete(&self, session_id: Option<&str>) -> RouterReply {
        if self.mode == ServerMode::Stateless {
            return RouterReply::error(RouteError::MethodNotAllowed, None);
        }
        match self.classify(session_id, &RequestKind::Terminate) {
            Route::Teardown(session) => {
                info!(session_id = %session.id(), "Closing session");
                drop(session);
                if let Some(sid) = session_id {
                    if self.registry.remove(sid).await.is_none() {
                        warn!(
                            session_id = %sid,
                            "Session already removed by a concurrent teardown"
                        );
                    }
                }
                RouterReply {
                    status: StatusCode::OK,
                    session_id: None,
                    message: None,
                    event_id: None,
                }
            }
            Route::Reject(err) => RouterReply::error(err, None),
            Route::Continue(_) | Route::Create => RouterReply::error(
                RouteError::Internal("teardown classified as non-teardown".to_string()),
                None,
            ),
        }
    }

    /// Reply for HTTP methods the endpoint never supports (`GET`, ...).
    pub fn handle_unsupported(&self) -> RouterReply {
        RouterReply::error(RouteError::MethodNotAllowed, None)
    }

    /// Close every live session. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        self.registry.drain().await
    }
}
