//! Tool definitions, handlers and the registry

mod process_data;
mod process_with_retry;
mod registry;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;

use crate::error::ToolError;
use crate::protocol::{McpTool, ToolCallResult};

pub use process_data::ProcessDataTool;
pub use process_with_retry::ProcessWithRetryTool;
pub use registry::{RegistryError, ToolRegistry};

/// A tool with typed arguments
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Arguments decoded from the request before `call` runs
    type Args: DeserializeOwned + Send;

    fn descriptor(&self) -> McpTool;

    async fn call(&self, args: Self::Args) -> Result<ToolCallResult, ToolError>;
}

/// Type-erased tool handler stored in the registry
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Check arguments before any middleware runs
    fn validate(&self, _arguments: Option<&Value>) -> Result<(), ToolError> {
        Ok(())
    }

    async fn invoke(&self, arguments: Option<Value>) -> Result<ToolCallResult, ToolError>;
}

/// Decode raw arguments; absent or null arguments decode as `{}`
fn decode_arguments<A: DeserializeOwned>(arguments: Option<Value>) -> Result<A, ToolError> {
    let arguments = match arguments {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(value) => value,
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

/// Adapter decoding raw arguments into `T::Args`
pub struct TypedHandler<T>(pub T);

#[async_trait]
impl<T: Tool> ToolHandler for TypedHandler<T> {
    fn validate(&self, arguments: Option<&Value>) -> Result<(), ToolError> {
        decode_arguments::<T::Args>(arguments.cloned()).map(|_| ())
    }

    // Decoded again here: middleware may have rewritten the arguments.
    async fn invoke(&self, arguments: Option<Value>) -> Result<ToolCallResult, ToolError> {
        let args: T::Args = decode_arguments(arguments)?;
        self.0.call(args).await
    }
}

/// Handler backed by an async closure over the raw arguments
pub struct FnHandler<F>(F);

/// Wrap an async closure as a `ToolHandler`
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolCallResult, ToolError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Option<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolCallResult, ToolError>> + Send,
{
    async fn invoke(&self, arguments: Option<Value>) -> Result<ToolCallResult, ToolError> {
        (self.0)(arguments).await
    }
}

/// Reject blank required string arguments
pub(crate) fn require_non_empty(name: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::InvalidArguments(format!(
            "{} parameter is required and must be a non-empty string",
            name
        )));
    }
    Ok(())
}
