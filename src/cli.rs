use anyhow::{Context, Result};
use std::sync::Arc;

use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};

use crate::agent::{AgentSession, ApiKey, NotionAgentFactory, Role, SessionStore, Turn};
use crate::config::Config;
use crate::tools::McpConfig;

/// 打印帮助信息
fn print_help() {
    println!("📝 notion-chat - 用自然语言和 Notion 工作区对话");
    println!();
    println!("用法：notion-chat [命令]");
    println!();
    println!("命令:");
    println!("  chat            进入对话模式（默认）");
    println!("  init            生成默认配置和 mcp_config.json 模板");
    println!("  help            显示此帮助信息");
    println!();
    println!("对话模式命令:");
    println!("  /history - 显示本次会话的全部记录");
    println!("  /help    - 显示帮助");
    println!("  /quit    - 退出");
    println!();
    println!("环境变量:");
    println!("  GEMINI_API_KEY  Gemini API Key（也可写在配置文件 agent.api_key）");
    println!("  GEMINI_MODEL    覆盖默认模型");
    println!("  RUST_LOG        日志级别，默认 warn");
}

fn print_chat_help() {
    println!("命令:");
    println!("  /history - 显示本次会话的全部记录");
    println!("  /quit    - 退出");
    println!();
}

/// 按角色渲染一条轮次
fn render_turn(turn: &Turn) {
    match turn.role() {
        Role::User => println!("🧑 你：{}", turn.content()),
        Role::Assistant => println!("🤖 AI：{}\n", turn.content()),
        Role::Error => println!("❌ {}\n", turn.content()),
    }
}

/// Init 命令 - 写入默认配置和 MCP 配置模板，已存在的文件不覆盖
fn run_init() -> Result<()> {
    println!("🚀 初始化 notion-chat 配置...\n");

    let config_path = Config::default_path();
    let config = Config::load(&config_path)?;
    if config_path.exists() {
        println!("✔️ 配置已存在：{}", config_path.display());
    } else {
        config.save(&config_path).context("保存配置文件失败")?;
        println!("✅ 保存配置：{}", config_path.display());
    }

    let mcp_path = &config.mcp.config_path;
    if mcp_path.exists() {
        println!("✔️ MCP 配置已存在：{}", mcp_path.display());
    } else {
        let template = serde_json::to_string_pretty(&McpConfig::notion_template())?;
        std::fs::write(mcp_path, template)
            .with_context(|| format!("写入 {} 失败", mcp_path.display()))?;
        println!("✅ 创建：{}", mcp_path.display());
        println!("   请把 NOTION_TOKEN 替换为你的 Notion integration token");
    }

    println!();
    println!("🎉 初始化完成！设置 GEMINI_API_KEY 后运行 'notion-chat' 开始对话");
    Ok(())
}

/// Chat 命令 - 交互式对话
async fn run_chat() -> Result<()> {
    let config = Config::load_default()?;

    let Some(key) = config.resolve_api_key() else {
        println!("⚠️ 请先设置 GEMINI_API_KEY 环境变量，或在配置文件中填写 agent.api_key");
        return Ok(());
    };
    let credential = ApiKey::new(key);

    println!("📝 Notion MCP Chatbot");
    println!("🤖 模型：{}", config.agent.model);
    println!("🔌 MCP 配置：{}", config.mcp.config_path.display());
    println!();

    let session = AgentSession::new(Arc::new(NotionAgentFactory::new(&config)));
    let store = SessionStore::new();

    // 启动时即构建 agent，配置或认证问题在处理任何输入前暴露
    println!("⏳ 正在连接 Notion...");
    session
        .get_or_create(&credential)
        .await
        .context("会话启动失败")?;
    println!("✅ 已连接，输入 /help 查看命令\n");

    let prompt = DefaultPrompt::new(
        DefaultPromptSegment::Basic("notion".to_string()),
        DefaultPromptSegment::Empty,
    );
    let mut line_editor = Reedline::create();

    loop {
        let sig = line_editor.read_line(&prompt)?;

        match sig {
            Signal::Success(buffer) => {
                let input = buffer.trim();

                if input.is_empty() {
                    continue;
                }

                if input.starts_with('/') {
                    let cmd = input.split_whitespace().next().unwrap_or_default().to_lowercase();

                    match cmd.as_str() {
                        "/quit" | "/exit" => {
                            println!("👋 再见！");
                            break;
                        }
                        "/history" => {
                            if store.is_empty() {
                                println!("📭 暂无记录\n");
                            }
                            for turn in store.all() {
                                println!("[{}] {}", turn.created_at().format("%H:%M:%S"), turn.role());
                                render_turn(&turn);
                            }
                        }
                        "/help" | "/h" => print_chat_help(),
                        _ => {
                            println!("❌ 未知命令：{}", input);
                            println!("输入 /help 查看帮助\n");
                        }
                    }
                    continue;
                }

                match session.submit(&store, &credential, input).await {
                    Ok(transcript) => {
                        if let Some(turn) = transcript.last() {
                            render_turn(turn);
                        }
                    }
                    // 启动类错误终止会话，其余错误提示后继续
                    Err(e) if e.is_fatal() => return Err(e).context("会话已终止"),
                    Err(e) => println!("⚠️ {}\n", e),
                }
            }
            Signal::CtrlD => {
                println!("\n👋 再见！");
                break;
            }
            Signal::CtrlC => {
                println!("\n输入 /quit 退出，或继续提问");
            }
        }
    }

    Ok(())
}

/// 主入口函数
pub async fn run_cli() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let command = args
        .get(1)
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "chat".to_string());

    match command.as_str() {
        "chat" | "c" => run_chat().await,
        "init" => run_init(),
        "help" | "-h" | "--help" | "h" => {
            print_help();
            Ok(())
        }
        _ => {
            eprintln!("❌ 未知命令：{}", command);
            eprintln!();
            eprintln!("运行 'notion-chat help' 查看帮助信息");
            std::process::exit(1);
        }
    }
}
