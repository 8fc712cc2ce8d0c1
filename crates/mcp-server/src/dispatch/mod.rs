//! Tool call dispatch and the middleware chain

mod dispatcher;
mod middleware;

pub use dispatcher::{Dispatcher, InitializeOptions};
pub use middleware::{Endpoint, LoggingMiddleware, Middleware, Next, ToolRequest};
