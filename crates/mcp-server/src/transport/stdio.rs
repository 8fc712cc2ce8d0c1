//! stdio transport for MCP (used by desktop MCP clients)

use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::TransportError;
use crate::protocol::{McpError, McpMessage, RequestHandler};

/// stdio transport for MCP protocol
pub struct StdioTransport {
    handler: Arc<RequestHandler>,
}

impl StdioTransport {
    /// Create a new stdio transport
    pub fn new(handler: Arc<RequestHandler>) -> Self {
        Self { handler }
    }

    /// Serve newline-delimited JSON-RPC over arbitrary streams.
    ///
    /// Requests are handled concurrently; a single writer task serializes
    /// responses. Returns once every in-flight response has been written.
    pub async fn serve<R, W, S>(&self, reader: R, writer: W, shutdown: S) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()>,
    {
        let (tx, rx) = mpsc::unbounded_channel::<McpMessage>();
        let writer_task = tokio::spawn(write_responses(writer, rx));

        let mut lines = BufReader::new(reader).lines();
        tokio::pin!(shutdown);

        loop {
            let line = tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, closing stdio transport");
                    break;
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                info!("EOF received, shutting down");
                break;
            };

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            debug!("Received: {}", line);

            let message: McpMessage = match serde_json::from_str(line) {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Failed to parse message: {}", e);
                    let _ = tx.send(McpMessage::error_response(None, McpError::parse_error()));
                    continue;
                }
            };

            let handler = self.handler.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = handler.handle(message).await {
                    // The writer only goes away when output is broken.
                    let _ = tx.send(response);
                }
            });
        }

        // The writer drains until the last in-flight handler drops its sender.
        drop(tx);
        writer_task
            .await
            .map_err(|e| TransportError::Processing(e.to_string()))?
    }
}

async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<McpMessage>,
) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let response_line = serde_json::to_string(&response)?;
        debug!("Sending: {}", response_line);
        writer.write_all(response_line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await?;
    Ok(())
}
