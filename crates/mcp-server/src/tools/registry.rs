//! Static tool registry

use indexmap::IndexMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use super::{ProcessDataTool, ProcessWithRetryTool, Tool, ToolHandler, TypedHandler};
use crate::protocol::McpTool;

/// Registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    DuplicateTool(String),
}

struct Entry {
    descriptor: McpTool,
    handler: Arc<dyn ToolHandler>,
}

/// Mapping from tool name to descriptor and handler, in registration order.
///
/// Descriptor and handler are stored in the same entry, so every listed tool
/// resolves and every resolvable name is listed.
#[derive(Default)]
pub struct ToolRegistry {
    entries: IndexMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `process_data` and `process_with_retry`
    pub fn with_example_tools() -> Self {
        let mut registry = Self::new();
        // Names are distinct constants, registration cannot collide.
        let _ = registry.register_tool(ProcessDataTool);
        let _ = registry.register_tool(ProcessWithRetryTool);
        registry
    }

    /// Register a typed tool
    pub fn register_tool<T: Tool>(&mut self, tool: T) -> Result<(), RegistryError> {
        let descriptor = tool.descriptor();
        self.register(descriptor, Arc::new(TypedHandler(tool)))
    }

    /// Register a descriptor with its handler
    pub fn register(
        &mut self,
        descriptor: McpTool,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }

        debug!("Registered tool: {}", descriptor.name);
        self.entries
            .insert(descriptor.name.clone(), Entry { descriptor, handler });
        Ok(())
    }

    /// Tool descriptors in registration order
    pub fn list(&self) -> Vec<McpTool> {
        self.entries.values().map(|e| e.descriptor.clone()).collect()
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries.get(name).map(|e| e.handler.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
