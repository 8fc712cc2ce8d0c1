//! SSE server with a request-timing middleware.
//!
//! ```sh
//! PORT=3000 cargo run -p mcp-server --example sse_server -- --debug
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use mcp_server::{
    logging, DispatchError, InitializeOptions, Middleware, Next, ServerOptions, SseServer,
    ToolCallResult, ToolRequest,
};

/// Logs the method and elapsed time of every call
struct Timing;

#[async_trait]
impl Middleware for Timing {
    async fn handle(
        &self,
        request: &ToolRequest,
        next: Next<'_>,
    ) -> Result<ToolCallResult, DispatchError> {
        let started = Instant::now();
        info!("[Middleware] Request started: {}", request.name);
        let result = next.run(request).await;
        info!("[Middleware] Request finished: {}ms", started.elapsed().as_millis());
        result
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug = std::env::args().any(|arg| arg == "--debug");
    logging::init(debug);

    let server = SseServer::new(ServerOptions {
        name: "mcp-sse".to_string(),
        debug,
        ..Default::default()
    })?;

    server.initialize(InitializeOptions::default().with_middleware(Arc::new(Timing)))?;

    let port: u16 = match std::env::var("PORT") {
        Ok(port) => port.parse()?,
        Err(_) => 3000,
    };
    let addr = server.start(("0.0.0.0", port)).await?;
    info!("Connect an MCP client to http://{}/sse", addr);

    tokio::signal::ctrl_c().await?;
    server.shutdown().await?;
    Ok(())
}
