use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::tools::ToolExecutor;
use crate::types::{Content, FunctionCall, Part};

use super::context::Context;
use super::handle::{AgentHandle, AgentOutput};
use super::llm::ChatModel;

/// 模型 + MCP 工具的 agent，自带对话记忆
pub struct McpAgent {
    model: Arc<dyn ChatModel>,
    tools: Arc<dyn ToolExecutor>,
    memory: Mutex<Context>,
    max_steps: usize,
}

impl McpAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        tools: Arc<dyn ToolExecutor>,
        memory: Context,
        max_steps: usize,
    ) -> Self {
        McpAgent {
            model,
            tools,
            memory: Mutex::new(memory),
            max_steps: max_steps.max(1),
        }
    }

    /// 当前记忆中的消息数
    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }

    /// 依次执行工具调用，失败的结果以错误文本交回给模型
    async fn execute_tool_calls(&self, calls: Vec<FunctionCall>) -> Vec<Part> {
        let mut responses = Vec::with_capacity(calls.len());

        for call in calls {
            info!(tool = %call.name, "tool call");
            let response = match self.tools.execute(&call.name, call.args).await {
                Ok(result) => json!({ "result": result }),
                Err(e) => {
                    warn!(tool = %call.name, error = %e, "tool call failed");
                    json!({ "error": format!("{:#}", e) })
                }
            };
            responses.push(Part::function_response(call.name, response));
        }

        responses
    }
}

#[async_trait]
impl AgentHandle for McpAgent {
    async fn invoke(&self, query: &str) -> Result<AgentOutput> {
        let mut memory = self.memory.lock().await;

        let mut contents = memory.messages().to_vec();
        contents.push(Content::user(vec![Part::text(query)]));

        for step in 1..=self.max_steps {
            debug!(step, max_steps = self.max_steps, "agent step");

            let reply = self
                .model
                .generate(
                    Some(memory.system_prompt()),
                    &contents,
                    self.tools.get_tools(),
                )
                .await?;

            let calls: Vec<FunctionCall> = reply
                .parts
                .iter()
                .filter_map(|p| p.function_call.clone())
                .collect();

            if calls.is_empty() {
                let output = AgentOutput::from_parts(&reply.parts);
                memory.add_exchange(query, &output.clone().into_text());
                info!(steps = step, "agent finished");
                return Ok(output);
            }

            contents.push(reply);
            let responses = self.execute_tool_calls(calls).await;
            contents.push(Content::user(responses));
        }

        bail!("已达到最大处理步数 {}，请简化问题后重试", self.max_steps)
    }
}
