//! HTTP transport adapter.
//!
//! Turns hyper requests into router calls and router replies into HTTP
//! responses, framed either as a single JSON document or as a Server-Sent
//! Events stream. Routing does not depend on the framing chosen here.

use super::router::{Router, RouterReply};
use crate::error::RouteError;
use crate::protocol::{
    JsonRpcRequest, EVENT_STREAM_MIME_TYPE, HEADER_SESSION_ID, JSON_MIME_TYPE,
};
use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full, LengthLimitError, Limited};
use hyper::http::{
    header::{
        ACCEPT, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
        ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ALLOW,
        CACHE_CONTROL, CONTENT_TYPE, ORIGIN, VARY,
    },
    HeaderMap, HeaderValue, Method, Request, Response, StatusCode,
};
use serde_json::Value;
use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_service::Service;
use tracing::{debug, warn};

pub type HttpBody = BoxBody<Bytes, Infallible>;
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, Infallible>> + Send>>;

/// Value used when a client sends no `Accept` header.
const DEFAULT_ACCEPT: &str = "application/json, text/event-stream";
const ALLOWED_METHODS: &str = "GET, POST, DELETE, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Accept, Mcp-Session-Id, Last-Event-Id";
const EXPOSED_HEADERS: &str = "Mcp-Session-Id";
const PREFLIGHT_MAX_AGE_SECS: &str = "86400";
/// Largest accepted `POST` body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Endpoint path, e.g. `/mcp`.
    pub path: String,
    /// Always answer with `application/json`, never SSE.
    pub json_response: bool,
    /// Bodies above this size are answered with 413.
    pub max_body_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            path: "/mcp".to_string(),
            json_response: false,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// hyper/tower service serving the MCP endpoint.
#[derive(Clone)]
pub struct McpHttpService {
    router: Arc<Router>,
    config: Arc<TransportConfig>,
}

impl McpHttpService {
    pub fn new(router: Arc<Router>, config: TransportConfig) -> Self {
        Self {
            router,
            config: Arc::new(config),
        }
    }

    async fn handle<B>(
        router: Arc<Router>,
        config: Arc<TransportConfig>,
        req: Request<B>,
    ) -> Response<HttpBody>
    where
        B: http_body::Body + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if req.uri().path() != config.path {
            return plain(StatusCode::NOT_FOUND, "Not Found");
        }

        let session_id = header_str(req.headers(), HEADER_SESSION_ID).map(str::to_string);
        let accept = header_str(req.headers(), ACCEPT.as_str())
            .unwrap_or(DEFAULT_ACCEPT)
            .to_string();

        let method = req.method().clone();
        match method {
            Method::POST => {
                let content_type = header_str(req.headers(), CONTENT_TYPE.as_str()).unwrap_or("");
                if !content_type.contains(JSON_MIME_TYPE) {
                    return error_response(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        RouteError::invalid_request(
                            "Unsupported Media Type: Content-Type must be application/json",
                        ),
                    );
                }
                if !accepts(&accept, JSON_MIME_TYPE) && !accepts(&accept, EVENT_STREAM_MIME_TYPE) {
                    return error_response(
                        StatusCode::NOT_ACCEPTABLE,
                        RouteError::invalid_request(
                            "Not Acceptable: Client must accept application/json or \
                             text/event-stream",
                        ),
                    );
                }

                let body = match Limited::new(req.into_body(), config.max_body_bytes)
                    .collect()
                    .await
                {
                    Ok(collected) => collected.to_bytes(),
                    Err(e) if e.is::<LengthLimitError>() => {
                        warn!(limit = config.max_body_bytes, "Request body too large");
                        return error_response(
                            StatusCode::PAYLOAD_TOO_LARGE,
                            RouteError::invalid_request("Payload Too Large"),
                        );
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read request body");
                        return reply_to_response(
                            RouterReply::error(RouteError::Transport(e.to_string()), None),
                            false,
                        );
                    }
                };
                let request = match parse_request(&body) {
                    Ok(request) => request,
                    Err(err) => return reply_to_response(RouterReply::error(err, None), false),
                };
                debug!(method = %request.method, session_id = ?session_id, "Received MCP request");

                let reply = router.handle_post(session_id.as_deref(), request).await;
                let sse = !config.json_response && accepts(&accept, EVENT_STREAM_MIME_TYPE);
                reply_to_response(reply, sse)
            }
            Method::DELETE => {
                let reply = router.handle_delete(session_id.as_deref()).await;
                reply_to_response(reply, false)
            }
            _ => {
                debug!(method = %method, "Received unsupported MCP request");
                let mut resp = reply_to_response(router.handle_unsupported(), false);
                resp.headers_mut()
                    .insert(ALLOW, HeaderValue::from_static("POST, DELETE"));
                resp
            }
        }
    }
}

impl<B> Service<Request<B>> for McpHttpService
where
    B: http_body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = Response<HttpBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let router = self.router.clone();
        let config = self.config.clone();
        Box::pin(async move { Ok::<_, Infallible>(Self::handle(router, config, req).await) })
    }
}

/// Rejects requests from origins outside the allow-list and adds CORS headers
/// for allowed ones. Requests without an `Origin` header pass through.
#[derive(Clone)]
pub struct OriginCheckService<S> {
    inner: S,
    allowed_origins: Arc<HashSet<String>>,
}

impl<S> OriginCheckService<S> {
    pub fn new(inner: S, allowed_origins: Arc<HashSet<String>>) -> Self {
        Self {
            inner,
            allowed_origins,
        }
    }

    fn is_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains("*") || self.allowed_origins.contains(origin)
    }
}

fn add_cors_headers(headers: &mut HeaderMap, origin: &str) {
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
}

impl<B, S> Service<Request<B>> for OriginCheckService<S>
where
    B: http_body::Body + Send + 'static,
    S: Service<Request<B>, Response = Response<HttpBody>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = Response<HttpBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let origin = header_str(req.headers(), ORIGIN.as_str()).map(str::to_string);
        if let Some(origin) = origin.as_deref() {
            if !self.is_allowed(origin) {
                warn!(origin, "Rejected request from disallowed origin");
                return Box::pin(async {
                    Ok::<_, Infallible>(plain(StatusCode::FORBIDDEN, "Forbidden"))
                });
            }
        }

        if req.method() == Method::OPTIONS {
            let mut resp = empty(StatusCode::OK);
            let headers = resp.headers_mut();
            headers.insert(
                ACCESS_CONTROL_ALLOW_METHODS,
                HeaderValue::from_static(ALLOWED_METHODS),
            );
            headers.insert(
                ACCESS_CONTROL_ALLOW_HEADERS,
                HeaderValue::from_static(ALLOWED_HEADERS),
            );
            headers.insert(
                ACCESS_CONTROL_MAX_AGE,
                HeaderValue::from_static(PREFLIGHT_MAX_AGE_SECS),
            );
            if let Some(origin) = origin.as_deref() {
                add_cors_headers(headers, origin);
            }
            return Box::pin(async { Ok::<_, Infallible>(resp) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move {
            let mut resp = inner.call(req).await?;
            if let Some(origin) = origin.as_deref() {
                add_cors_headers(resp.headers_mut(), origin);
            }
            Ok::<_, Infallible>(resp)
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn accepts(accept: &str, mime: &str) -> bool {
    accept.split(',').any(|part| {
        let media = part.split(';').next().unwrap_or("").trim();
        media == mime || media == "*/*"
    })
}

fn parse_request(body: &[u8]) -> Result<JsonRpcRequest, RouteError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| RouteError::parse_error(format!("Parse error: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| RouteError::invalid_request(format!("Invalid Request: {e}")))
}

fn plain(status: StatusCode, text: &'static str) -> Response<HttpBody> {
    let mut resp = Response::new(Full::new(Bytes::from_static(text.as_bytes())).boxed());
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    resp
}

fn empty(status: StatusCode) -> Response<HttpBody> {
    let mut resp = Response::new(Empty::<Bytes>::new().boxed());
    *resp.status_mut() = status;
    resp
}

fn error_response(status: StatusCode, err: RouteError) -> Response<HttpBody> {
    let mut reply = RouterReply::error(err, None);
    reply.status = status;
    reply_to_response(reply, false)
}

/// Frame a JSON-RPC message as one SSE `message` event.
fn sse_frame(event_id: Option<&str>, data: &str) -> String {
    let mut frame = String::new();
    if let Some(id) = event_id {
        frame.push_str("id: ");
        frame.push_str(id);
        frame.push('\n');
    }
    frame.push_str("event: message\n");
    for line in data.lines() {
        frame.push_str("data: ");
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

/// Render a router reply. Errors are always sent as JSON; successful
/// messages use SSE framing when `sse` is set.
fn reply_to_response(reply: RouterReply, sse: bool) -> Response<HttpBody> {
    let mut resp = match &reply.message {
        None => empty(reply.status),
        Some(message) => {
            let json = match serde_json::to_string(message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize response");
                    return error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        RouteError::Internal(e.to_string()),
                    );
                }
            };
            if sse && reply.is_success() {
                let mut resp = Response::new(
                    Full::new(Bytes::from(sse_frame(reply.event_id.as_deref(), &json))).boxed(),
                );
                let headers = resp.headers_mut();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM_MIME_TYPE));
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
                resp
            } else {
                let mut resp = Response::new(Full::new(Bytes::from(json)).boxed());
                resp.headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(JSON_MIME_TYPE));
                resp
            }
        }
    };
    *resp.status_mut() = reply.status;
    if let Some(session_id) = reply.session_id.as_deref() {
        if let Ok(value) = HeaderValue::from_str(session_id) {
            resp.headers_mut().insert(HEADER_SESSION_ID, value);
        }
    }
    resp
}
