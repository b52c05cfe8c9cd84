pub mod context;
pub mod core;
pub mod factory;
pub mod handle;
pub mod llm;
pub mod session;

pub use context::Context;
pub use self::core::McpAgent;
pub use factory::{AgentFactory, NotionAgentFactory};
pub use handle::{AgentHandle, AgentOutput};
pub use llm::{ChatModel, GeminiClient, KeyStatus};
pub use session::{AgentSession, ApiKey, Role, SessionStore, Transcript, Turn};
