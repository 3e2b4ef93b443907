//! MCP server over Streamable HTTP.
//!
//! The server runs a hyper `http1` connection per accepted socket. Each
//! request goes through [`OriginCheckService`] and [`McpHttpService`] into the
//! [`Router`], which resolves sessions and hands the request to the shared
//! [`McpHandler`].

pub mod handler;
pub mod router;
pub mod transport;

pub use handler::McpHandler;
pub use router::{Route, Router, RouterReply};
pub use transport::{HttpBody, McpHttpService, OriginCheckService, TransportConfig};

use crate::protocol::{implementation, Implementation};
use crate::session::SessionRegistry;
use crate::tools::ToolSet;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Default grace period for in-flight work during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Whether the server tracks sessions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerMode {
    Stateful,
    Stateless,
}

impl std::fmt::Display for ServerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerMode::Stateful => write!(f, "stateful"),
            ServerMode::Stateless => write!(f, "stateless"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub mode: ServerMode,
    pub transport: TransportConfig,
    /// Allowed `Origin` values; `*` allows any.
    pub allowed_origins: Vec<String>,
    pub shutdown_grace: Duration,
    pub server_info: Implementation,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            mode: ServerMode::Stateful,
            transport: TransportConfig::default(),
            allowed_origins: vec![
                "http://localhost".to_string(),
                "http://127.0.0.1".to_string(),
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            server_info: implementation("dice-mcp", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ServerConfig {
    pub fn stateless(mut self) -> Self {
        self.mode = ServerMode::Stateless;
        self.server_info.name = "stateless-server".to_string();
        self
    }
}

/// MCP HTTP server (stateful or stateless).
pub struct McpHttpServer {
    config: ServerConfig,
    router: Arc<Router>,
}

impl McpHttpServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_tools(config, ToolSet::builtin())
    }

    pub fn with_tools(config: ServerConfig, tools: ToolSet) -> Self {
        info!(mode = %config.mode, "Creating MCP server");
        let handler = McpHandler::new(tools, config.server_info.clone(), config.mode);
        let router = Arc::new(Router::with_registry(
            handler,
            Arc::new(SessionRegistry::new()),
        ));
        Self { config, router }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The full service stack for one connection.
    pub fn service(&self) -> OriginCheckService<McpHttpService> {
        let allowed_origins: HashSet<String> = self
            .config
            .allowed_origins
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        OriginCheckService::new(
            McpHttpService::new(self.router.clone(), self.config.transport.clone()),
            Arc::new(allowed_origins),
        )
    }

    /// Bind the configured address and serve in a background task.
    pub async fn start(self) -> std::io::Result<ServerHandle> {
        let listener = TcpListener::bind(self.config.bind).await?;
        let local_addr = listener.local_addr()?;
        info!(
            "{} server is running on http://{local_addr}{}",
            self.config.mode, self.config.transport.path
        );
        let cancel = CancellationToken::new();
        let registry = self.router.registry().clone();
        let task = tokio::spawn(self.serve(listener, cancel.clone()));
        Ok(ServerHandle {
            local_addr,
            cancel,
            registry,
            task,
        })
    }

    /// Accept connections until `shutdown` is cancelled, then drain sessions
    /// and wait (bounded by the grace period) for in-flight connections.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        let service = self.service();
        let tracker = TaskTracker::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutting down server...");
                    break;
                }
                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let svc = service.clone();
                    let conn_shutdown = shutdown.clone();
                    tracker.spawn(async move {
                        let io = TokioIo::new(stream);
                        let conn = http1::Builder::new()
                            .serve_connection(io, TowerToHyperService::new(svc));
                        tokio::pin!(conn);
                        let result = tokio::select! {
                            res = conn.as_mut() => res,
                            _ = conn_shutdown.cancelled() => {
                                conn.as_mut().graceful_shutdown();
                                conn.await
                            }
                        };
                        if let Err(err) = result {
                            error!(peer = %peer, "http connection error: {err}");
                        }
                    });
                }
            }
        }

        tracker.close();
        let grace = self.config.shutdown_grace;
        match tokio::time::timeout(grace, self.router.shutdown()).await {
            Ok(closed) => info!(sessions = closed, "Closed all session transports"),
            Err(_) => warn!(?grace, "Timed out closing session transports"),
        }
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(
                connections = tracker.len(),
                "Grace period elapsed with connections still open"
            );
        }
        info!("Server shutdown complete");
        Ok(())
    }
}

/// Handle to a server started with [`McpHttpServer::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    registry: Arc<SessionRegistry>,
    task: JoinHandle<std::io::Result<()>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint URL, e.g. `http://127.0.0.1:3000/mcp`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.local_addr, path)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting, drain sessions, and wait for the server task.
    pub async fn shutdown(self) -> std::io::Result<()> {
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(std::io::Error::other(e)),
        }
    }
}
