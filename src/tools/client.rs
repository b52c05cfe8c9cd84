use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::types::{InitializeResult, JsonRpcRequest, JsonRpcResponse, McpToolDef, McpToolResult};

use super::config::ServerConfig;

const PROTOCOL_VERSION: &str = "2024-11-05";

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;
type SharedStdin = Arc<Mutex<ChildStdin>>;

/// 通过 stdio 与一个 MCP 服务器子进程通信的客户端
pub struct McpClient {
    name: String,
    stdin: SharedStdin,
    _child: Child,
    pending: PendingMap,
    next_id: AtomicU64,
    timeout: Duration,
}

impl McpClient {
    /// 启动子进程，完成 initialize 握手并列出工具
    pub async fn connect(
        name: &str,
        server: &ServerConfig,
        timeout: Duration,
    ) -> Result<(Self, Vec<McpToolDef>)> {
        let mut child = Command::new(&server.command)
            .args(&server.args)
            .envs(&server.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("启动 MCP 服务器 {} 失败（{}）", name, server.command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("MCP 服务器 {} 的 stdin 不可用", name))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("MCP 服务器 {} 的 stdout 不可用", name))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let stdin: SharedStdin = Arc::new(Mutex::new(stdin));
        tokio::spawn(read_loop(
            name.to_string(),
            stdout,
            stdin.clone(),
            pending.clone(),
        ));

        let client = McpClient {
            name: name.to_string(),
            stdin,
            _child: child,
            pending,
            next_id: AtomicU64::new(1),
            timeout,
        };

        let init = client.initialize().await?;
        info!(
            server = %client.name,
            protocol = %init.protocol_version,
            remote = init.server_info.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
            "MCP server initialized"
        );
        client.notify("notifications/initialized").await?;

        let tools = client.list_tools().await?;
        info!(server = %client.name, tools = tools.len(), "MCP tools discovered");

        Ok((client, tools))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        write_line(&self.stdin, line).await
    }

    /// 发送请求并等待同 id 的响应
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let line = serde_json::to_string(&req)?;
        if let Err(e) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(e).with_context(|| format!("向 MCP 服务器 {} 写入失败", self.name));
        }

        let resp = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(anyhow!("MCP 服务器 {} 已断开", self.name)),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(anyhow!("MCP 请求 {} 超时（{:?}）", method, self.timeout));
            }
        };

        if let Some(err) = resp.error {
            return Err(anyhow!("MCP 错误 {}：{}", err.code, err.message));
        }

        resp.result
            .ok_or_else(|| anyhow!("MCP 请求 {} 返回空结果", method))
    }

    async fn notify(&self, method: &str) -> Result<()> {
        let msg = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
        });
        self.write_line(&serde_json::to_string(&msg)?).await
    }

    async fn initialize(&self) -> Result<InitializeResult> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            }
        });

        let result = self.request("initialize", Some(params)).await?;
        serde_json::from_value(result).context("解析 initialize 结果失败")
    }

    /// 列出服务器提供的工具
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>> {
        let result = self.request("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or(Value::Array(vec![]));
        serde_json::from_value(tools).context("解析工具列表失败")
    }

    /// 调用工具
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<McpToolResult> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });
        let result = self.request("tools/call", Some(params)).await?;
        serde_json::from_value(result).context("解析工具结果失败")
    }
}

async fn write_line(stdin: &SharedStdin, line: &str) -> Result<()> {
    let mut stdin = stdin.lock().await;
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await?;
    Ok(())
}

/// 读取服务器 stdout，把响应分发给等待中的请求，并应答服务器发起的请求
async fn read_loop(
    name: String,
    stdout: tokio::process::ChildStdout,
    stdin: SharedStdin,
    pending: PendingMap,
) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(server = %name, "MCP server stdout closed");
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if let Some(reply) = dispatch_line(&name, trimmed, &pending).await {
                    if let Err(e) = write_line(&stdin, &reply.to_string()).await {
                        warn!(server = %name, error = %e, "replying to MCP server failed");
                    }
                }
            }
            Err(e) => {
                warn!(server = %name, error = %e, "reading MCP server stdout failed");
                break;
            }
        }
    }

    // 丢弃所有等待者，使其立即失败而不是等到超时
    pending.lock().await.clear();
}

/// 处理一行输入；服务器发来的请求需要应答时返回应答
async fn dispatch_line(name: &str, line: &str, pending: &PendingMap) -> Option<Value> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => {
            debug!(server = %name, line = %line, "non JSON-RPC line from MCP server");
            return None;
        }
    };

    if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
        // 没有 id 的是通知，不需要应答
        let id = value.get("id")?.clone();
        debug!(server = %name, method = %method, "server-initiated request");
        return Some(server_request_reply(method, id));
    }

    match serde_json::from_value::<JsonRpcResponse>(value) {
        Ok(resp) => {
            if let Some(id) = resp.id {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(resp);
                }
            }
        }
        Err(e) => debug!(server = %name, error = %e, "malformed JSON-RPC response"),
    }
    None
}

/// ping 返回空结果，其余方法客户端不支持
fn server_request_reply(method: &str, id: Value) -> Value {
    match method {
        "ping" => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {},
        }),
        _ => serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32601, "message": format!("Method not found: {}", method)},
        }),
    }
}
