//! `process_data` tool

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use template_core::ExampleService;
use tracing::info;

use super::{require_non_empty, Tool};
use crate::error::ToolError;
use crate::protocol::{McpTool, ToolCallResult};

pub const PROCESS_DATA: &str = "process_data";

#[derive(Debug, Deserialize)]
pub struct ProcessDataArgs {
    pub input: String,
}

/// Echo the input back after one second of simulated work
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessDataTool;

#[async_trait]
impl Tool for ProcessDataTool {
    type Args = ProcessDataArgs;

    fn descriptor(&self) -> McpTool {
        McpTool::new(PROCESS_DATA, "Process data and return the result").property(
            "input",
            json!({"type": "string", "description": "Input data to process"}),
            true,
        )
    }

    async fn call(&self, args: ProcessDataArgs) -> Result<ToolCallResult, ToolError> {
        require_non_empty("input", &args.input)?;
        info!("[ProcessData] Processing input: {}", args.input);

        let data = ExampleService::default()
            .process_data(&args.input)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        Ok(ToolCallResult::text(data))
    }
}
