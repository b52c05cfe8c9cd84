use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::OnceCell;
use tracing::{info, info_span, warn, Instrument};

use crate::error::{SessionError, SessionResult};

use super::factory::AgentFactory;
use super::handle::AgentHandle;

/// 轮次的发言方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    Error,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Error => "error",
        };
        f.write_str(name)
    }
}

/// 对话中的一条消息，创建后不可修改
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    role: Role,
    content: String,
    created_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Turn {
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::new(Role::Error, content)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// 按插入顺序排列的轮次快照
pub type Transcript = Vec<Turn>;

/// 会话存储 - 只追加的对话记录，进程结束即丢弃
pub struct SessionStore {
    id: String,
    turns: RwLock<Vec<Turn>>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            id: uuid::Uuid::new_v4().to_string(),
            turns: RwLock::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.id
    }

    /// 追加一条轮次，内容不能为空
    pub fn append(&self, turn: Turn) -> SessionResult<()> {
        if turn.content.trim().is_empty() {
            return Err(SessionError::InvalidInput("内容不能为空".to_string()));
        }
        self.turns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(turn);
        Ok(())
    }

    /// 所有轮次（按插入顺序）
    pub fn all(&self) -> Transcript {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// API Key，不会出现在 Debug 输出里
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        ApiKey(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// 把文本中出现的 Key 替换掉
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            return text.to_string();
        }
        text.replace(&self.0, "***")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

type HandleCell = Arc<OnceCell<Arc<dyn AgentHandle>>>;

/// Agent 会话 - 每个凭证只构建一次 agent，调用按到达顺序串行执行
pub struct AgentSession {
    factory: Arc<dyn AgentFactory>,
    handles: Mutex<HashMap<ApiKey, HandleCell>>,
    // tokio 的 Mutex 是公平的，等待者按 FIFO 获得锁
    gate: tokio::sync::Mutex<()>,
}

impl AgentSession {
    pub fn new(factory: Arc<dyn AgentFactory>) -> Self {
        AgentSession {
            factory,
            handles: Mutex::new(HashMap::new()),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// 获取或构建该凭证对应的 agent。并发的首次访问只会构建一次，
    /// 构建失败不缓存，下次调用会重新尝试
    pub async fn get_or_create(&self, credential: &ApiKey) -> SessionResult<Arc<dyn AgentHandle>> {
        let cell = {
            let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            handles.entry(credential.clone()).or_default().clone()
        };

        let handle = cell
            .get_or_try_init(|| async {
                info!("constructing agent");
                self.factory.build(credential).await
            })
            .await?;
        Ok(handle.clone())
    }

    /// 提交一条用户输入，返回更新后的完整记录
    ///
    /// agent 在追加用户轮次之前解析，构建失败时记录保持不变。
    /// 调用失败会被记录为 Error 轮次，不会返回给调用方。
    pub async fn submit(
        &self,
        store: &SessionStore,
        credential: &ApiKey,
        text: &str,
    ) -> SessionResult<Transcript> {
        if text.trim().is_empty() {
            return Err(SessionError::InvalidInput("输入不能为空".to_string()));
        }

        let span = info_span!("submit", session = %store.session_id());
        async {
            let _gate = self.gate.lock().await;

            let handle = self.get_or_create(credential).await?;
            store.append(Turn::user(text))?;

            let turn = match handle.invoke(text).await {
                Ok(output) => {
                    let reply = output.into_text();
                    if reply.trim().is_empty() {
                        warn!("agent returned an empty reply");
                        Turn::error(
                            SessionError::Invocation("agent 没有返回任何内容".to_string())
                                .to_string(),
                        )
                    } else {
                        Turn::assistant(reply)
                    }
                }
                Err(e) => {
                    let reason = credential.redact(&format!("{:#}", e));
                    warn!(error = %reason, "agent invocation failed");
                    Turn::error(SessionError::Invocation(reason).to_string())
                }
            };
            store.append(turn)?;

            info!(turns = store.len(), "submit completed");
            Ok::<_, SessionError>(store.all())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_rejects_blank_turns() {
        let store = SessionStore::new();
        assert!(store.append(Turn::user("   ")).is_err());
        assert!(store.is_empty());

        store.append(Turn::user("List my pages")).unwrap();
        store.append(Turn::assistant("Page A, Page B")).unwrap();
        let all = store.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].role(), Role::User);
        assert_eq!(all[1].content(), "Page A, Page B");
    }

    #[test]
    fn store_snapshot_is_independent() {
        let store = SessionStore::new();
        store.append(Turn::user("one")).unwrap();
        let snapshot = store.all();
        store.append(Turn::assistant("two")).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn api_key_never_prints() {
        let key = ApiKey::new("AIzaSecret123");
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
        assert_eq!(
            key.redact("request with AIzaSecret123 failed"),
            "request with *** failed"
        );
        assert_eq!(ApiKey::new("").redact("unchanged"), "unchanged");
    }

    #[test]
    fn role_display() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!(Role::Error.to_string(), "error");
    }
}
