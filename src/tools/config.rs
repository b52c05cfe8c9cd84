use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// 单个 MCP 服务器的启动方式（stdio）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// mcp_config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers")]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl McpConfig {
    /// 读取并解析配置文件，至少要有一个服务器
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("读取 MCP 配置失败：{}", path.display()))?;
        Self::parse(&content).with_context(|| format!("MCP 配置无效：{}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: McpConfig = serde_json::from_str(content).context("JSON 解析失败")?;
        if config.servers.is_empty() {
            bail!("mcpServers 为空");
        }
        for (name, server) in &config.servers {
            if server.command.trim().is_empty() {
                bail!("服务器 {} 缺少 command", name);
            }
        }
        Ok(config)
    }

    /// `notion-chat init` 生成的模板
    pub fn notion_template() -> Self {
        let mut env = HashMap::new();
        env.insert("NOTION_TOKEN".to_string(), "ntn_xxx".to_string());

        let mut servers = BTreeMap::new();
        servers.insert(
            "notion".to_string(),
            ServerConfig {
                command: "npx".to_string(),
                args: vec!["-y".to_string(), "@notionhq/notion-mcp-server".to_string()],
                env,
            },
        );
        McpConfig { servers }
    }
}
