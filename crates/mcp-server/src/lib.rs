//! # mcp-server
//!
//! Template for Model Context Protocol servers.
//! Supports both stdio and HTTP/SSE transports, typed tools, and a
//! middleware chain around every tool call.

pub mod dispatch;
pub mod error;
pub mod logging;
pub mod protocol;
mod server;
pub mod tools;
pub mod transport;

pub use dispatch::{Dispatcher, Endpoint, InitializeOptions, LoggingMiddleware, Middleware, Next, ToolRequest};
pub use error::{DispatchError, ServerError, ToolError, TransportError};
pub use protocol::{McpError, McpMessage, McpTool, ServerCapabilities, ToolCallResult, ToolContent};
pub use server::{McpServer, ServerOptions, SseServer};
pub use tools::{Tool, ToolHandler, ToolRegistry};
