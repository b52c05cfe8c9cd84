mod gemini;
mod mcp;

pub use gemini::{
    Candidate, Content, FunctionCall, FunctionDeclaration, FunctionResponse,
    GenerateContentRequest, GenerateContentResponse, Part, Tool,
};
pub use mcp::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpContent, McpToolDef,
    McpToolResult, ServerInfo,
};
