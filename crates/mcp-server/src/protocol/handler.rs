//! MCP request handler

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::capabilities::ServerCapabilities;
use super::types::*;
use crate::dispatch::{Dispatcher, ToolRequest};
use crate::error::DispatchError;

/// Handler for MCP requests, shared by every transport
pub struct RequestHandler {
    dispatcher: Arc<Dispatcher>,
    server_info: ServerInfo,
}

impl RequestHandler {
    /// Create a new request handler
    pub fn new(dispatcher: Arc<Dispatcher>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            dispatcher,
            server_info: ServerInfo {
                name: name.into(),
                version: version.into(),
            },
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Handle an incoming message; notifications and responses produce no reply
    pub async fn handle(&self, message: McpMessage) -> Option<McpMessage> {
        match (message.method, message.id) {
            (Some(method), Some(id)) => {
                debug!("Handling request: {}", method);

                let result = match method.as_str() {
                    "initialize" => self.handle_initialize(message.params),
                    "ping" => Ok(serde_json::json!({})),
                    "tools/list" => self.handle_tools_list(),
                    "tools/call" => self.handle_tools_call(message.params).await,
                    _ => self.handle_custom(&method, message.params).await,
                };

                Some(match result {
                    Ok(result) => McpMessage::response(id, result),
                    Err(error) => McpMessage::error_response(Some(id), error),
                })
            }
            (Some(method), None) => {
                match method.as_str() {
                    "notifications/initialized" | "initialized" => info!("Client initialized"),
                    "notifications/cancelled" => debug!("Request cancelled"),
                    _ => debug!("Unknown notification: {}", method),
                }
                None
            }
            (None, _) => {
                // Response - we don't expect these in server mode
                debug!("Received unexpected response");
                None
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::invalid_params(e.to_string()))?
            .ok_or_else(|| McpError::invalid_params("Missing params"))?;

        info!(
            "Initializing session with client: {} v{}",
            params.client_info.name, params.client_info.version
        );

        let result = InitializeResult {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities::with_tools(),
            server_info: self.server_info.clone(),
        };

        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
    }

    /// Handle tools/list request
    fn handle_tools_list(&self) -> Result<Value, McpError> {
        info!("[Tools] List available tools");
        let result = ToolsListResult {
            tools: self.dispatcher.tools(),
        };
        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
    }

    /// Handle tools/call request; tool failures come back as error content
    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, McpError> {
        let params: ToolCallParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| McpError::invalid_params(e.to_string()))?
            .ok_or_else(|| McpError::invalid_params("Missing params"))?;

        debug!("Calling tool: {}", params.name);

        let result = self
            .dispatcher
            .call(ToolRequest::new(params.name, params.arguments))
            .await;

        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
    }

    /// Route any other method to a custom handler
    async fn handle_custom(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let result = match self.dispatcher.dispatch_custom(method, params).await {
            Ok(result) => result,
            Err(DispatchError::MethodNotFound(_)) => return Err(McpError::method_not_found()),
            Err(e) => {
                error!(method = %method, "Custom handler failed: {}", e);
                ToolCallResult::error(e.to_string())
            }
        };

        serde_json::to_value(result).map_err(|e| McpError::internal_error(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::InitializeOptions;
    use crate::tools::ToolRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn handler() -> RequestHandler {
        let dispatcher = Dispatcher::new(
            Arc::new(ToolRegistry::with_example_tools()),
            Duration::from_secs(5),
        );
        dispatcher.initialize(InitializeOptions::default());
        RequestHandler::new(Arc::new(dispatcher), "example-mcp", "1.0.0")
    }

    #[tokio::test]
    async fn test_initialize() {
        let request = McpMessage::request(
            1,
            "initialize",
            Some(json!({
                "protocolVersion": MCP_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0.1"}
            })),
        );

        let response = handler().handle(request).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "example-mcp");
        assert_eq!(result["protocolVersion"], MCP_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_tools_list_order() {
        let response = handler()
            .handle(McpMessage::request(2, "tools/list", None))
            .await
            .unwrap();

        let tools = response.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "process_data");
        assert_eq!(tools[1]["name"], "process_with_retry");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_content() {
        let response = handler()
            .handle(McpMessage::request(
                3,
                "tools/call",
                Some(json!({"name": "missing", "arguments": {}})),
            ))
            .await
            .unwrap();

        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(result["content"][0]["text"], "Unknown tool: missing");
    }

    #[tokio::test]
    async fn test_unknown_method_and_notifications() {
        let handler = handler();

        let response = handler
            .handle(McpMessage::request(4, "resources/list", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32601);

        let none = handler
            .handle(McpMessage::notification("notifications/initialized", None))
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_tools_call_missing_params() {
        let response = handler()
            .handle(McpMessage::request(5, "tools/call", None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, -32602);
    }
}
