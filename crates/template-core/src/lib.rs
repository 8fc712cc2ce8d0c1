//! # template-core
//!
//! Shared building blocks for the MCP server template:
//! - `ServerConfig` resolution from defaults, explicit options and environment
//! - Error types
//! - `ExampleService`, the business logic behind the bundled example tools

pub mod config;
pub mod error;
pub mod service;

pub use config::{ConfigOverrides, ServerConfig};
pub use error::{ConfigError, Result, ServiceError};
pub use service::{ExampleService, ExampleServiceOptions};
