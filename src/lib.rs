//! Session-addressed MCP over Streamable HTTP
//!
//! This library provides an MCP (Model Context Protocol) server and client
//! that speak JSON-RPC 2.0 over HTTP POST, with replies framed as SSE or plain
//! JSON. Sessions are addressed by the `Mcp-Session-Id` header.
//!
//! # Architecture
//!
//! - **SessionRegistry**: Owns every live session. Identifiers are UUIDv4 and
//!   never reused, even after teardown.
//!
//! - **Router**: Decides, per request, whether to continue an existing
//!   session, create a new one, tear one down, or reject the request.
//!   Stateless routers never consult the registry.
//!
//! - **McpHandler**: Answers `initialize`, `tools/list`, `tools/call` and
//!   `server/info` for whichever session the router resolved.
//!
//! - **McpHttpServer**: hyper accept loop with origin checking, SSE/JSON
//!   framing and graceful shutdown.
//!
//! - **ClientSessionManager**: Client side. Holds at most one transport and
//!   one session id and terminates sessions explicitly.
//!
//! # Tools
//!
//! - `dice`: Roll a die with `sides` faces (default 6)

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod tools;

pub use client::{ClientError, ClientSessionManager, TerminateOutcome};
pub use error::{RouteError, ToolError};
pub use server::{McpHttpServer, Router, ServerConfig, ServerHandle, ServerMode};
pub use session::{Session, SessionError, SessionId, SessionRegistry};
pub use tools::{DiceTool, Tool, ToolSet};
