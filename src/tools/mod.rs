pub mod client;
pub mod config;
pub mod executor;
pub mod registry;

pub use client::McpClient;
pub use config::{McpConfig, ServerConfig};
pub use executor::ToolExecutor;
pub use registry::ToolRegistry;
