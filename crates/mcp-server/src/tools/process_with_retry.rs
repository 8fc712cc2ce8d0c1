//! `process_with_retry` tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use template_core::{ExampleService, ExampleServiceOptions};
use tracing::info;

use super::{require_non_empty, Tool};
use crate::error::ToolError;
use crate::protocol::{McpTool, ToolCallResult};

pub const PROCESS_WITH_RETRY: &str = "process_with_retry";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessWithRetryArgs {
    pub input: String,
    /// Any JSON number; see `attempt_budget`
    #[serde(default)]
    pub retry_count: Option<f64>,
    #[serde(default)]
    pub debug: bool,
}

/// Attempts allowed for a requested `retryCount`.
///
/// Absent, zero and NaN mean the default. Fractions round up, since attempts
/// continue while fewer than `retryCount` have been made. Negative counts
/// allow none.
fn attempt_budget(retry_count: Option<f64>) -> u32 {
    match retry_count {
        Some(n) if n.is_nan() || n == 0.0 => ExampleServiceOptions::default().retry_count,
        Some(n) if n < 0.0 => 0,
        Some(n) => n.ceil().min(f64::from(u32::MAX)) as u32,
        None => ExampleServiceOptions::default().retry_count,
    }
}

/// Process data, retrying failed attempts
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessWithRetryTool;

#[async_trait]
impl Tool for ProcessWithRetryTool {
    type Args = ProcessWithRetryArgs;

    fn descriptor(&self) -> McpTool {
        McpTool::new(PROCESS_WITH_RETRY, "Process data with retry mechanism")
            .property(
                "input",
                json!({"type": "string", "description": "Input data to process"}),
                true,
            )
            .property(
                "retryCount",
                json!({"type": "number", "description": "Number of retry attempts (default: 3)"}),
                false,
            )
            .property(
                "debug",
                json!({"type": "boolean", "description": "Whether to enable debug mode"}),
                false,
            )
    }

    async fn call(&self, args: ProcessWithRetryArgs) -> Result<ToolCallResult, ToolError> {
        require_non_empty("input", &args.input)?;
        info!(
            retry_count = ?args.retry_count,
            debug = args.debug,
            "[ProcessWithRetry] Processing input: {}",
            args.input
        );

        let service = ExampleService::new(ExampleServiceOptions {
            retry_count: attempt_budget(args.retry_count),
            debug: args.debug,
        });

        // Exhausted retries are a tool-level outcome, reported as text content.
        let result = match service.process_with_retry(&args.input).await {
            Ok(data) => ToolCallResult::text(data),
            Err(e) => ToolCallResult::error(e.to_string()),
        };
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolHandler, TypedHandler};

    #[tokio::test(start_paused = true)]
    async fn test_camel_case_arguments() {
        let handler = TypedHandler(ProcessWithRetryTool);

        let result = handler
            .invoke(Some(json!({"input": "abc", "retryCount": 2, "debug": true})))
            .await
            .unwrap();

        assert_eq!(result.first_text(), Some("Processed: abc (took 1 second)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_retries_reports_failure() {
        let result = ProcessWithRetryTool
            .call(ProcessWithRetryArgs {
                input: "abc".to_string(),
                retry_count: Some(-1.0),
                debug: false,
            })
            .await
            .unwrap();

        assert!(result.is_error());
        assert_eq!(result.first_text(), Some("Failed after 0 attempts"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fractional_retry_count_is_accepted() {
        let handler = TypedHandler(ProcessWithRetryTool);

        let result = handler
            .invoke(Some(json!({"input": "abc", "retryCount": 2.5})))
            .await
            .unwrap();

        assert_eq!(result.first_text(), Some("Processed: abc (took 1 second)"));
    }

    #[test]
    fn test_attempt_budget() {
        assert_eq!(attempt_budget(None), 3);
        assert_eq!(attempt_budget(Some(0.0)), 3);
        assert_eq!(attempt_budget(Some(f64::NAN)), 3);
        assert_eq!(attempt_budget(Some(1.0)), 1);
        assert_eq!(attempt_budget(Some(2.5)), 3);
        assert_eq!(attempt_budget(Some(-2.0)), 0);
    }

    #[test]
    fn test_descriptor_schema() {
        let tool = ProcessWithRetryTool.descriptor();
        assert_eq!(tool.name, PROCESS_WITH_RETRY);
        assert_eq!(tool.input_schema.required, Some(vec!["input".to_string()]));
    }
}
