use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{AgentConfig, Config, McpSettings};
use crate::error::{SessionError, SessionResult};
use crate::tools::{McpConfig, ToolRegistry};

use super::context::Context;
use super::core::McpAgent;
use super::handle::AgentHandle;
use super::llm::{GeminiClient, KeyStatus};
use super::session::ApiKey;

/// 根据凭证构建 agent
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn build(&self, credential: &ApiKey) -> SessionResult<Arc<dyn AgentHandle>>;
}

/// 生产环境的工厂：Gemini + mcp_config.json 中的 MCP 服务器
pub struct NotionAgentFactory {
    agent: AgentConfig,
    mcp: McpSettings,
}

impl NotionAgentFactory {
    pub fn new(config: &Config) -> Self {
        NotionAgentFactory {
            agent: config.agent.clone(),
            mcp: config.mcp.clone(),
        }
    }
}

/// 把 Key 校验结果转换为会话错误：Key 被拒或无法确认属于认证问题，模型不存在属于配置问题
fn key_check(result: anyhow::Result<KeyStatus>, credential: &ApiKey) -> SessionResult<()> {
    match result {
        Ok(KeyStatus::Valid) => Ok(()),
        Ok(KeyStatus::Rejected(reason)) => {
            Err(SessionError::Authentication(credential.redact(&reason)))
        }
        Ok(KeyStatus::UnknownModel(reason)) => {
            Err(SessionError::Configuration(credential.redact(&reason)))
        }
        Err(e) => Err(SessionError::Authentication(
            credential.redact(&format!("无法校验 API Key：{:#}", e)),
        )),
    }
}

#[async_trait]
impl AgentFactory for NotionAgentFactory {
    async fn build(&self, credential: &ApiKey) -> SessionResult<Arc<dyn AgentHandle>> {
        // 先读配置：配置有问题时不必访问网络
        let mcp_config = McpConfig::from_file(&self.mcp.config_path)
            .map_err(|e| SessionError::Configuration(format!("{:#}", e)))?;

        let model = GeminiClient::new(self.agent.clone(), credential.expose().to_string());

        if self.agent.validate_key {
            key_check(model.verify_key().await, credential)?;
        }

        let timeout = Duration::from_secs(self.mcp.request_timeout_secs.max(1));
        let registry = ToolRegistry::connect(&mcp_config, timeout)
            .await
            .map_err(|e| SessionError::Configuration(format!("{:#}", e)))?;

        info!(
            servers = registry.server_count(),
            model = %self.agent.model,
            "agent constructed"
        );

        let memory = Context::new(self.agent.system_prompt.clone(), self.agent.max_history);
        Ok(Arc::new(McpAgent::new(
            Arc::new(model),
            Arc::new(registry),
            memory,
            self.agent.max_steps,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn factory_with(path: std::path::PathBuf) -> NotionAgentFactory {
        let mut config = Config::default();
        config.mcp.config_path = path;
        NotionAgentFactory::new(&config)
    }

    #[test]
    fn key_check_maps_statuses() {
        let key = ApiKey::new("AIza-secret");

        assert!(key_check(Ok(KeyStatus::Valid), &key).is_ok());

        let err = key_check(
            Ok(KeyStatus::Rejected("key AIza-secret is invalid".to_string())),
            &key,
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::Authentication(_)));
        assert!(!err.to_string().contains("AIza-secret"));

        let err = key_check(Ok(KeyStatus::UnknownModel("模型不存在：gemini-9".to_string())), &key)
            .unwrap_err();
        assert!(matches!(err, SessionError::Configuration(_)));

        let err = key_check(Err(anyhow::anyhow!("connection refused")), &key).unwrap_err();
        assert!(matches!(err, SessionError::Authentication(_)));
    }

    #[tokio::test]
    async fn missing_mcp_config_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let factory = factory_with(dir.path().join("mcp_config.json"));

        let err = factory.build(&ApiKey::new("AIza-test")).await.err().unwrap();
        assert!(matches!(err, SessionError::Configuration(_)));
    }

    #[tokio::test]
    async fn malformed_mcp_config_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_config.json");
        fs::write(&path, "{ not json").unwrap();

        let err = factory_with(path).build(&ApiKey::new("AIza-test")).await.err().unwrap();
        assert!(matches!(err, SessionError::Configuration(_)));
    }
}
