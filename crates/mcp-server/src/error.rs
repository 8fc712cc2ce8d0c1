//! Error types for the MCP server

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Error raised by a tool body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// Dispatch failures; all of these are recoverable and reported to the caller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Tool {tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Tool {tool} failed: {message}")]
    HandlerFailure { tool: String, message: String },
}

impl DispatchError {
    /// Attach the tool name to an error coming out of a tool body
    pub fn from_tool(tool: &str, error: ToolError) -> Self {
        match error {
            ToolError::InvalidArguments(message) => Self::InvalidArguments {
                tool: tool.to_string(),
                message,
            },
            ToolError::Failed(message) => Self::HandlerFailure {
                tool: tool.to_string(),
                message,
            },
        }
    }
}

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Session ID is required")]
    MissingSessionId,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Message processing failed: {0}")]
    Processing(String),

    #[error("Failed to close {failed} of {total} sessions")]
    ShutdownIncomplete { failed: usize, total: usize },

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingSessionId | Self::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            Self::UnknownSession(_) => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

/// Server lifecycle errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Server is already running")]
    AlreadyStarted,

    #[error("Server did not stop within {0:?}")]
    ShutdownTimeout(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(#[from] template_core::ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for server lifecycle operations
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_status_codes() {
        assert_eq!(
            TransportError::MissingSessionId.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TransportError::UnknownSession("abc".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TransportError::ShuttingDown.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            TransportError::Processing("closed".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_tool_error_mapping() {
        let err = DispatchError::from_tool("echo", ToolError::InvalidArguments("missing input".into()));
        assert_eq!(
            err,
            DispatchError::InvalidArguments {
                tool: "echo".into(),
                message: "missing input".into()
            }
        );
        assert_eq!(
            DispatchError::Timeout {
                tool: "process_data".into(),
                timeout_ms: 500
            }
            .to_string(),
            "Tool process_data timed out after 500ms"
        );
    }
}
