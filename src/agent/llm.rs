use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::config::AgentConfig;
use crate::types::{
    Content, FunctionDeclaration, GenerateContentRequest, GenerateContentResponse, Tool,
};

/// 模型接口：给定历史和工具，返回模型的一条回复
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn generate(
        &self,
        system_prompt: Option<&str>,
        contents: &[Content],
        tools: &[FunctionDeclaration],
    ) -> Result<Content>;
}

/// API Key 校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    Valid,
    Rejected(String),
    /// Key 有效与否未知，但配置的模型不存在
    UnknownModel(String),
}

pub struct GeminiClient {
    client: Client,
    config: AgentConfig,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: AgentConfig, api_key: String) -> Self {
        GeminiClient {
            client: Client::new(),
            config,
            api_key,
        }
    }

    fn model_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    /// 查询模型元数据来校验 API Key，Key 走请求头，不出现在 URL 中
    pub async fn verify_key(&self) -> Result<KeyStatus> {
        let response = self
            .client
            .get(self.model_url())
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .context("连接 Gemini API 失败")?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        key_status(status, &text, &self.config.model)
    }
}

/// 把模型元数据请求的响应状态映射为校验结果
fn key_status(status: StatusCode, body: &str, model: &str) -> Result<KeyStatus> {
    if status.is_success() {
        return Ok(KeyStatus::Valid);
    }

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Ok(KeyStatus::Rejected(format!(
                "Gemini 拒绝了 API Key（{}）：{}",
                status,
                error_message(body)
            )))
        }
        StatusCode::NOT_FOUND => Ok(KeyStatus::UnknownModel(format!(
            "模型不存在：{}（{}）",
            model,
            error_message(body)
        ))),
        _ => bail!("Gemini API 错误：{} - {}", status, error_message(body)),
    }
}

/// 从 Gemini 错误响应中提取 error.message
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// 取第一个候选的内容，没有候选时说明原因
fn first_candidate(response: GenerateContentResponse) -> Result<Content> {
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.get("blockReason"))
            .and_then(|r| r.as_str())
            .unwrap_or("未知原因");
        bail!("Gemini 未返回候选结果：{}", reason);
    };

    let mut content = candidate.content.ok_or_else(|| {
        anyhow!(
            "Gemini 返回了空内容（finish_reason = {}）",
            candidate.finish_reason.as_deref().unwrap_or("-")
        )
    })?;
    content.role = Some("model".to_string());
    Ok(content)
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn generate(
        &self,
        system_prompt: Option<&str>,
        contents: &[Content],
        tools: &[FunctionDeclaration],
    ) -> Result<Content> {
        let request = GenerateContentRequest {
            contents: contents.to_vec(),
            system_instruction: system_prompt.map(Content::system),
            tools: if tools.is_empty() {
                Vec::new()
            } else {
                vec![Tool {
                    function_declarations: tools.to_vec(),
                }]
            },
        };

        let url = format!("{}:generateContent", self.model_url());
        debug!(model = %self.config.model, messages = contents.len(), "calling Gemini");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .context("调用 Gemini API 失败")?;

        let status = response.status();
        let text = response.text().await.context("读取响应失败")?;

        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                bail!("认证失败，请检查 API Key：{}", error_message(&text))
            }
            StatusCode::TOO_MANY_REQUESTS => bail!("请求过于频繁：{}", error_message(&text)),
            _ => bail!("Gemini API 错误：{} - {}", status, error_message(&text)),
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&text)
            .with_context(|| format!("解析 Gemini 响应失败，原始内容：{}", text))?;

        first_candidate(parsed)
    }
}
