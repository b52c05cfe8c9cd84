use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{FunctionDeclaration, McpToolDef};

use super::client::McpClient;
use super::config::McpConfig;
use super::executor::ToolExecutor;

/// Gemini 函数声明只接受 OpenAPI schema 的一个子集
const SCHEMA_KEYS: &[&str] = &[
    "type",
    "description",
    "properties",
    "items",
    "required",
    "enum",
    "format",
    "nullable",
];

/// 把 MCP 工具的 JSON Schema 裁剪为 Gemini 接受的子集
pub fn sanitize_schema(schema: &Value) -> Value {
    sanitize(schema, false)
}

fn sanitize(schema: &Value, nested: bool) -> Value {
    let Value::Object(obj) = schema else {
        return schema.clone();
    };

    let mut out = Map::new();
    for (key, value) in obj {
        if !SCHEMA_KEYS.contains(&key.as_str()) {
            continue;
        }
        let cleaned = match key.as_str() {
            "properties" => match value {
                Value::Object(props) => Value::Object(
                    props
                        .iter()
                        .map(|(name, prop)| (name.clone(), sanitize(prop, true)))
                        .collect(),
                ),
                other => other.clone(),
            },
            "items" => sanitize(value, true),
            // ["string", "null"] 形式的联合类型
            "type" => match value {
                Value::Array(types) => {
                    if types.iter().any(|t| t.as_str() == Some("null")) {
                        out.insert("nullable".to_string(), Value::Bool(true));
                    }
                    types
                        .iter()
                        .find(|t| t.as_str() != Some("null"))
                        .cloned()
                        .unwrap_or_else(|| Value::String("string".to_string()))
                }
                other => other.clone(),
            },
            _ => value.clone(),
        };
        out.insert(key.clone(), cleaned);
    }

    // 没有 type 的嵌套 schema（anyOf、$ref 等被剥掉后）退化为 string
    if !out.contains_key("type") {
        out.insert("type".to_string(), Value::String("string".to_string()));
    }

    // Gemini 不接受没有 properties 的 OBJECT
    if out.get("type").and_then(|t| t.as_str()) == Some("object")
        && out
            .get("properties")
            .and_then(|p| p.as_object())
            .map_or(true, |p| p.is_empty())
    {
        if nested {
            return json_string_schema(&out);
        }
        // 顶层由 to_declaration 省略 parameters
        out.remove("properties");
        out.remove("required");
    }

    Value::Object(out)
}

/// 自由结构的对象改为 JSON 字符串参数，调用时由 restore_json_args 还原
fn json_string_schema(original: &Map<String, Value>) -> Value {
    let hint = "JSON object encoded as a string";
    let description = match original.get("description").and_then(|d| d.as_str()) {
        Some(desc) if !desc.trim().is_empty() => format!("{} ({})", desc.trim(), hint),
        _ => hint.to_string(),
    };

    let mut out = Map::new();
    out.insert("type".to_string(), Value::String("string".to_string()));
    out.insert("description".to_string(), Value::String(description));
    if let Some(nullable) = original.get("nullable") {
        out.insert("nullable".to_string(), nullable.clone());
    }
    Value::Object(out)
}

/// 按原始 schema 把模型传来的 JSON 字符串还原成对象或数组
pub fn restore_json_args(schema: &Value, value: Value) -> Value {
    let expected = match schema.get("type") {
        Some(Value::String(t)) => Some(t.as_str()),
        Some(Value::Array(types)) => types.iter().filter_map(|t| t.as_str()).find(|t| *t != "null"),
        _ => None,
    };

    match value {
        Value::String(text) if matches!(expected, Some("object") | Some("array")) => {
            match serde_json::from_str::<Value>(&text) {
                Ok(parsed) if parsed.is_object() || parsed.is_array() => {
                    restore_json_args(schema, parsed)
                }
                _ => Value::String(text),
            }
        }
        Value::Object(fields) => {
            let props = schema.get("properties").and_then(|p| p.as_object());
            Value::Object(
                fields
                    .into_iter()
                    .map(|(name, field)| {
                        let restored = match props.and_then(|p| p.get(&name)) {
                            Some(prop) => restore_json_args(prop, field),
                            None => field,
                        };
                        (name, restored)
                    })
                    .collect(),
            )
        }
        Value::Array(items) => match schema.get("items") {
            Some(item_schema) => Value::Array(
                items
                    .into_iter()
                    .map(|item| restore_json_args(item_schema, item))
                    .collect(),
            ),
            None => Value::Array(items),
        },
        other => other,
    }
}

fn to_declaration(tool: &McpToolDef) -> FunctionDeclaration {
    let parameters = sanitize_schema(&tool.input_schema);
    let has_properties = parameters.get("properties").is_some();

    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: has_properties.then_some(parameters),
    }
}

/// 聚合所有 MCP 服务器的工具，并按工具名路由调用
pub struct ToolRegistry {
    servers: Vec<McpClient>,
    // 工具名 -> (服务器下标, 原始 input schema)
    routes: HashMap<String, (usize, Value)>,
    declarations: Vec<FunctionDeclaration>,
}

impl ToolRegistry {
    /// 依次启动配置中的每个服务器
    pub async fn connect(config: &McpConfig, timeout: Duration) -> Result<Self> {
        let mut registry = ToolRegistry {
            servers: Vec::new(),
            routes: HashMap::new(),
            declarations: Vec::new(),
        };

        for (name, server) in &config.servers {
            let (client, tools) = McpClient::connect(name, server, timeout)
                .await
                .with_context(|| format!("连接 MCP 服务器 {} 失败", name))?;
            registry.add_server(client, &tools);
        }

        if registry.declarations.is_empty() {
            bail!("所有 MCP 服务器都没有提供工具");
        }

        Ok(registry)
    }

    fn add_server(&mut self, client: McpClient, tools: &[McpToolDef]) {
        let index = self.servers.len();
        for tool in tools {
            if self.routes.contains_key(&tool.name) {
                warn!(server = %client.name(), tool = %tool.name, "duplicate tool name, keeping the first one");
                continue;
            }
            self.routes
                .insert(tool.name.clone(), (index, tool.input_schema.clone()));
            self.declarations.push(to_declaration(tool));
        }
        self.servers.push(client);
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    fn get_tools(&self) -> &[FunctionDeclaration] {
        &self.declarations
    }

    async fn execute(&self, name: &str, args: Value) -> Result<String> {
        let (index, schema) = self
            .routes
            .get(name)
            .ok_or_else(|| anyhow!("未知工具：{}", name))?;
        let server = &self.servers[*index];

        debug!(server = %server.name(), tool = %name, "calling MCP tool");
        let args = if args.is_null() {
            Value::Object(Map::new())
        } else {
            restore_json_args(schema, args)
        };
        let result = server.call_tool(name, args).await?;

        if result.is_error {
            bail!("工具返回错误：{}", result.to_text());
        }
        Ok(result.to_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_unsupported_keywords() {
        let schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "query": {"type": "string", "description": "search text", "default": ""},
                "page_size": {"type": "integer", "minimum": 1}
            },
            "required": ["query"]
        });

        let cleaned = sanitize_schema(&schema);
        assert!(cleaned.get("$schema").is_none());
        assert!(cleaned.get("additionalProperties").is_none());
        assert_eq!(cleaned["required"], json!(["query"]));
        assert!(cleaned["properties"]["query"].get("default").is_none());
        assert_eq!(cleaned["properties"]["query"]["description"], "search text");
        assert!(cleaned["properties"]["page_size"].get("minimum").is_none());
    }

    #[test]
    fn nullable_union_type_collapses() {
        let cleaned = sanitize_schema(&json!({"type": ["string", "null"]}));
        assert_eq!(cleaned["type"], "string");
        assert_eq!(cleaned["nullable"], true);
    }

    #[test]
    fn untyped_nested_schema_defaults_to_string() {
        let schema = json!({
            "type": "object",
            "properties": {"filter": {"anyOf": [{"type": "string"}, {"type": "object"}]}}
        });
        let cleaned = sanitize_schema(&schema);
        assert_eq!(cleaned["properties"]["filter"], json!({"type": "string"}));
    }

    #[test]
    fn array_items_are_sanitized() {
        let schema = json!({
            "type": "array",
            "items": {"type": "object", "properties": {"id": {"type": "string", "pattern": "^[a-f0-9]+$"}}}
        });
        let cleaned = sanitize_schema(&schema);
        assert!(cleaned["items"]["properties"]["id"].get("pattern").is_none());
    }

    #[test]
    fn parameterless_tool_has_no_parameters() {
        let tool = McpToolDef {
            name: "API-get-self".to_string(),
            description: "Retrieve your token's bot user".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        };
        let decl = to_declaration(&tool);
        assert_eq!(decl.name, "API-get-self");
        assert!(decl.parameters.is_none());
    }

    #[test]
    fn nested_free_form_object_becomes_json_string() {
        let schema = json!({
            "type": "object",
            "properties": {
                "parent": {"type": "object", "description": "Parent page", "additionalProperties": true},
                "title": {"type": "string"}
            },
            "required": ["parent"]
        });
        let cleaned = sanitize_schema(&schema);
        let parent = &cleaned["properties"]["parent"];
        assert_eq!(parent["type"], "string");
        assert!(parent["description"].as_str().unwrap().starts_with("Parent page"));
        assert_eq!(cleaned["required"], json!(["parent"]));

        let tool = McpToolDef {
            name: "API-post-page".to_string(),
            description: "Create a page".to_string(),
            input_schema: schema,
        };
        let decl = to_declaration(&tool);
        assert_eq!(decl.parameters.unwrap()["properties"]["parent"]["type"], "string");
    }

    #[test]
    fn free_form_array_items_become_json_strings() {
        let schema = json!({
            "type": "object",
            "properties": {"children": {"type": "array", "items": {"type": "object"}}}
        });
        let cleaned = sanitize_schema(&schema);
        assert_eq!(cleaned["properties"]["children"]["items"]["type"], "string");
    }

    #[test]
    fn json_string_args_are_restored_against_original_schema() {
        let schema = json!({
            "type": "object",
            "properties": {
                "parent": {"type": "object", "additionalProperties": true},
                "children": {"type": "array", "items": {"type": "object"}},
                "title": {"type": "string"}
            }
        });
        let args = json!({
            "parent": "{\"page_id\": \"abc\"}",
            "children": ["{\"type\": \"paragraph\"}"],
            "title": "{not json but a title}"
        });

        let restored = restore_json_args(&schema, args);
        assert_eq!(restored["parent"], json!({"page_id": "abc"}));
        assert_eq!(restored["children"], json!([{"type": "paragraph"}]));
        assert_eq!(restored["title"], "{not json but a title}");
    }

    #[test]
    fn unparsable_json_string_is_passed_through() {
        let schema = json!({"type": "object", "properties": {"parent": {"type": "object"}}});
        let restored = restore_json_args(&schema, json!({"parent": "page abc"}));
        assert_eq!(restored["parent"], "page abc");
    }
}
