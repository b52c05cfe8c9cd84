use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::types::FunctionDeclaration;

/// 工具执行器 - agent 通过它发现并调用外部工具
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// 获取所有工具定义（已转换为模型可接受的格式）
    fn get_tools(&self) -> &[FunctionDeclaration];

    /// 执行工具，返回文本结果
    async fn execute(&self, name: &str, args: Value) -> Result<String>;
}
