//! Transport implementations for MCP server

mod http;
mod sse;
mod stdio;

pub use http::{router, MESSAGES_PATH};
pub use sse::{SessionManager, SessionStream};
pub use stdio::StdioTransport;
