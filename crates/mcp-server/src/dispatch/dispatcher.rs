//! Tool call dispatch: lookup, middleware composition and timeout race

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::middleware::{Endpoint, Middleware, Next, ToolRequest};
use crate::error::DispatchError;
use crate::protocol::{McpTool, ToolCallResult};
use crate::tools::{ToolHandler, ToolRegistry};

/// Extensions installed once during server initialization
#[derive(Default, Clone)]
pub struct InitializeOptions {
    /// Applied in order; the first entry is the outermost layer
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// Handlers for JSON-RPC methods outside the built-in set
    pub custom_handlers: Vec<(String, Arc<dyn Endpoint>)>,
}

impl InitializeOptions {
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn with_custom_handler(mut self, method: impl Into<String>, handler: Arc<dyn Endpoint>) -> Self {
        self.custom_handlers.push((method.into(), handler));
        self
    }
}

/// Registered tool as a chain terminal
struct ToolEndpoint(Arc<dyn ToolHandler>);

#[async_trait]
impl Endpoint for ToolEndpoint {
    async fn call(&self, request: &ToolRequest) -> Result<ToolCallResult, DispatchError> {
        self.0
            .invoke(request.arguments.clone())
            .await
            .map_err(|e| DispatchError::from_tool(&request.name, e))
    }
}

/// Resolves tool calls and runs them through the middleware chain under a timeout
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    middleware: RwLock<Vec<Arc<dyn Middleware>>>,
    custom_handlers: RwLock<HashMap<String, Arc<dyn Endpoint>>>,
    timeout_ms: AtomicU64,
    initialized: AtomicBool,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, timeout: Duration) -> Self {
        Self {
            registry,
            middleware: RwLock::new(Vec::new()),
            custom_handlers: RwLock::new(HashMap::new()),
            timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
            initialized: AtomicBool::new(false),
        }
    }

    /// Install middleware and custom handlers.
    ///
    /// Runs once; later calls only log a warning and return `false`.
    pub fn initialize(&self, options: InitializeOptions) -> bool {
        if self.initialized.swap(true, Ordering::SeqCst) {
            warn!("[Initialize] Server is already initialized");
            return false;
        }

        info!("[Initialize] Initializing server...");

        {
            let mut handlers = self
                .custom_handlers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for (method, handler) in options.custom_handlers {
                info!("[Initialize] Registering custom handler: {}", method);
                handlers.insert(method, handler);
            }
        }

        if !options.middleware.is_empty() {
            info!(
                "[Initialize] Registered {} middleware",
                options.middleware.len()
            );
            self.middleware
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(options.middleware);
        }

        info!("[Initialize] Server initialization complete");
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn tools(&self) -> Vec<McpTool> {
        self.registry.list()
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn custom_handler_count(&self) -> usize {
        self.custom_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::SeqCst))
    }

    /// Calls already in flight keep the budget they started with
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms
            .store(timeout.as_millis() as u64, Ordering::SeqCst);
    }

    /// Dispatch a tool call, returning typed failures
    pub async fn dispatch(&self, request: ToolRequest) -> Result<ToolCallResult, DispatchError> {
        let handler = self
            .registry
            .resolve(&request.name)
            .ok_or_else(|| DispatchError::UnknownTool(request.name.clone()))?;

        handler
            .validate(request.arguments.as_ref())
            .map_err(|e| DispatchError::from_tool(&request.name, e))?;

        self.run(request, Arc::new(ToolEndpoint(handler))).await
    }

    /// Dispatch a tool call, converting every failure into an error result
    pub async fn call(&self, request: ToolRequest) -> ToolCallResult {
        let name = request.name.clone();
        match self.dispatch(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(tool = %name, "[Tools] Tool execution failed: {}", e);
                ToolCallResult::error(e.to_string())
            }
        }
    }

    /// Whether a custom handler is registered for `method`
    pub fn has_custom_handler(&self, method: &str) -> bool {
        self.custom_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(method)
    }

    /// Dispatch a JSON-RPC method to its custom handler
    pub async fn dispatch_custom(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<ToolCallResult, DispatchError> {
        let handler = self
            .custom_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
            .ok_or_else(|| DispatchError::MethodNotFound(method.to_string()))?;

        self.run(ToolRequest::new(method, params), handler).await
    }

    /// Compose the chain for this call and race it against the timeout.
    ///
    /// The chain runs in its own task. When the timer wins, the task is not
    /// aborted; dropping its join handle discards whatever it produces later.
    async fn run(
        &self,
        request: ToolRequest,
        endpoint: Arc<dyn Endpoint>,
    ) -> Result<ToolCallResult, DispatchError> {
        let chain: Vec<Arc<dyn Middleware>> = self
            .middleware
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let timeout = self.timeout();
        let name = request.name.clone();

        debug!(tool = %name, layers = chain.len(), "[Tools] Executing");

        let task = tokio::spawn(async move {
            Next::new(&chain, endpoint.as_ref()).run(&request).await
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(DispatchError::HandlerFailure {
                tool: name,
                message: if join_error.is_panic() {
                    panic_message(join_error.into_panic())
                } else {
                    "execution cancelled".to_string()
                },
            }),
            Err(_) => {
                warn!(tool = %name, "[Tools] Timed out after {}ms", timeout.as_millis());
                Err(DispatchError::Timeout {
                    tool: name,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
