pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod tools;
pub mod types;

pub use agent::{
    AgentFactory, AgentHandle, AgentOutput, AgentSession, ApiKey, NotionAgentFactory, Role,
    SessionStore, Transcript, Turn,
};
pub use cli::run_cli;
pub use config::{AgentConfig, Config, McpSettings};
pub use error::{SessionError, SessionResult};
