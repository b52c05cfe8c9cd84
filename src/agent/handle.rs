use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::types::Part;

/// 一次调用的结果：文本，或者无法直接读成文本的结构化内容
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    Text(String),
    Structured(Value),
}

impl AgentOutput {
    /// 从模型最终回复的片段构造结果，忽略思考片段
    pub fn from_parts(parts: &[Part]) -> Self {
        let text: String = parts
            .iter()
            .filter(|p| !p.is_thought())
            .filter_map(|p| p.text.as_deref())
            .collect();

        if !text.trim().is_empty() {
            return AgentOutput::Text(text);
        }

        AgentOutput::Structured(serde_json::to_value(parts).unwrap_or(Value::Null))
    }

    /// 统一转换为文本。结构化内容只做尽力而为的字符串化
    pub fn into_text(self) -> String {
        match self {
            AgentOutput::Text(text) => text,
            AgentOutput::Structured(Value::String(text)) => text,
            AgentOutput::Structured(Value::Null) => String::new(),
            AgentOutput::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for AgentOutput {
    fn from(text: String) -> Self {
        AgentOutput::Text(text)
    }
}

impl From<&str> for AgentOutput {
    fn from(text: &str) -> Self {
        AgentOutput::Text(text.to_string())
    }
}

/// 构建好的 agent 实例
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// 提交一条用户查询，等待一条结果
    async fn invoke(&self, query: &str) -> Result<AgentOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCall;
    use serde_json::json;

    #[test]
    fn text_parts_are_concatenated() {
        let parts = vec![Part::text("Page A, "), Part::text("Page B")];
        assert_eq!(
            AgentOutput::from_parts(&parts),
            AgentOutput::Text("Page A, Page B".to_string())
        );
    }

    #[test]
    fn thoughts_are_skipped() {
        let mut thought = Part::text("let me search first");
        thought.thought = Some(true);
        let parts = vec![thought, Part::text("Found 2 pages")];
        assert_eq!(AgentOutput::from_parts(&parts).into_text(), "Found 2 pages");
    }

    #[test]
    fn non_text_parts_become_structured() {
        let parts = vec![Part {
            function_call: Some(FunctionCall {
                name: "API-post-search".to_string(),
                args: json!({}),
            }),
            ..Default::default()
        }];
        let output = AgentOutput::from_parts(&parts);
        assert!(matches!(output, AgentOutput::Structured(_)));
        assert!(output.into_text().contains("API-post-search"));
    }

    #[test]
    fn structured_string_is_unwrapped() {
        let output = AgentOutput::Structured(json!("plain"));
        assert_eq!(output.into_text(), "plain");
        let output = AgentOutput::Structured(json!({"pages": 2}));
        assert_eq!(output.into_text(), r#"{"pages":2}"#);
    }
}
