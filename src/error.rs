//! Error types for the MCP server.
//!
//! Tool execution errors are returned with `isError: true` in a
//! `CallToolResult`, while routing and protocol errors (no valid session,
//! malformed requests, unsupported HTTP methods) become JSON-RPC error
//! responses with a matching HTTP status.

use crate::protocol::{error_codes, CallToolResult, Content, ErrorCode, ErrorData};
use hyper::http::StatusCode;
use thiserror::Error;

/// Tool execution errors - returned with is_error: true in CallToolResult
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        CallToolResult::error(vec![Content::text(self.to_string())])
    }
}

/// Failure while routing or answering one HTTP exchange.
#[derive(Error, Debug)]
pub enum RouteError {
    /// Malformed or out-of-sequence request. The connection stays usable.
    #[error("{message}")]
    Protocol { code: ErrorCode, message: String },

    /// A session id was required but absent, or supplied but unresolvable.
    #[error("Bad Request: No valid session ID provided")]
    SessionNotFound,

    #[error("Method not allowed.")]
    MethodNotAllowed,

    /// I/O failure while reading the HTTP exchange.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Unexpected failure; the detail is logged but never sent to the client.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RouteError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: error_codes::PARSE_ERROR,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: error_codes::INVALID_REQUEST,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: error_codes::INVALID_PARAMS,
            message: message.into(),
        }
    }

    /// A handshake that cannot be honoured; answered with 400 and the
    /// server error code.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: error_codes::SERVER_ERROR,
            message: format!("Bad Request: {}", message.into()),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::Protocol {
            code: error_codes::METHOD_NOT_FOUND,
            message: format!("Method not found: {method}"),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            RouteError::Protocol { .. } => StatusCode::BAD_REQUEST,
            RouteError::SessionNotFound => StatusCode::BAD_REQUEST,
            RouteError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RouteError::Transport(_) => StatusCode::BAD_REQUEST,
            RouteError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The structured error written to the wire.
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            RouteError::Protocol { code, message } => ErrorData::new(*code, message.clone(), None),
            RouteError::SessionNotFound
            | RouteError::MethodNotAllowed
            | RouteError::Transport(_) => {
                ErrorData::new(error_codes::SERVER_ERROR, self.to_string(), None)
            }
            RouteError::Internal(_) => {
                ErrorData::new(error_codes::INTERNAL_ERROR, "Internal server error", None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{is_tool_error, result_text};

    #[test]
    fn internal_detail_stays_server_side() {
        let err = RouteError::Internal("registry lost session 1234".to_string());
        let wire = err.to_error_data();
        assert_eq!(wire.code, error_codes::INTERNAL_ERROR);
        assert_eq!(wire.message, "Internal server error");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn session_and_method_errors_share_server_code() {
        let missing = RouteError::SessionNotFound;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
        assert_eq!(missing.to_error_data().code, error_codes::SERVER_ERROR);
        assert_eq!(
            missing.to_error_data().message,
            "Bad Request: No valid session ID provided"
        );

        let not_allowed = RouteError::MethodNotAllowed;
        assert_eq!(not_allowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(not_allowed.to_error_data().message, "Method not allowed.");
    }

    #[test]
    fn tool_error_is_flagged() {
        let result = ToolError::InvalidParams("sides must be >= 1".to_string()).to_tool_result();
        assert!(is_tool_error(&result));
        assert_eq!(result_text(&result), "Invalid parameters: sides must be >= 1");
    }
}
