//! Middleware chain around tool and custom-method invocations

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::error::DispatchError;
use crate::protocol::ToolCallResult;

/// An invocation travelling through the chain
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    /// Tool name, or JSON-RPC method for custom handlers
    pub name: String,
    pub arguments: Option<Value>,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: Option<Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Terminal of a middleware chain: a registered tool or a custom method handler
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, request: &ToolRequest) -> Result<ToolCallResult, DispatchError>;
}

/// Interceptor wrapping the rest of the chain.
///
/// `next` is consumed by `Next::run`, so it can be invoked at most once.
/// Returning without calling it skips every inner layer and the endpoint.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(
        &self,
        request: &ToolRequest,
        next: Next<'_>,
    ) -> Result<ToolCallResult, DispatchError>;
}

/// The remainder of the chain below the current middleware
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(chain: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self { chain, endpoint }
    }

    /// Invoke the next layer, or the endpoint once the chain is exhausted
    pub async fn run(self, request: &ToolRequest) -> Result<ToolCallResult, DispatchError> {
        match self.chain.split_first() {
            Some((current, rest)) => {
                current
                    .handle(request, Next::new(rest, self.endpoint))
                    .await
            }
            None => self.endpoint.call(request).await,
        }
    }
}

/// Logs start and elapsed time of every invocation
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        request: &ToolRequest,
        next: Next<'_>,
    ) -> Result<ToolCallResult, DispatchError> {
        let started = Instant::now();
        info!("[Middleware] Request started: {}", request.name);

        let result = next.run(request).await;

        info!(
            "[Middleware] Request finished: {} ({}ms)",
            request.name,
            started.elapsed().as_millis()
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, request: &ToolRequest) -> Result<ToolCallResult, DispatchError> {
            Ok(ToolCallResult::text(request.name.clone()))
        }
    }

    /// Rewrites the request before passing it on
    struct Rename(&'static str);

    #[async_trait]
    impl Middleware for Rename {
        async fn handle(
            &self,
            request: &ToolRequest,
            next: Next<'_>,
        ) -> Result<ToolCallResult, DispatchError> {
            let renamed = ToolRequest::new(self.0, request.arguments.clone());
            next.run(&renamed).await
        }
    }

    #[tokio::test]
    async fn test_empty_chain_calls_endpoint() {
        let result = Next::new(&[], &Echo)
            .run(&ToolRequest::new("direct", None))
            .await
            .unwrap();
        assert_eq!(result.first_text(), Some("direct"));
    }

    #[tokio::test]
    async fn test_middleware_can_rewrite_request() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(LoggingMiddleware), Arc::new(Rename("renamed"))];

        let result = Next::new(&chain, &Echo)
            .run(&ToolRequest::new("original", None))
            .await
            .unwrap();
        assert_eq!(result.first_text(), Some("renamed"));
    }
}
