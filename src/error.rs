use thiserror::Error;

/// 会话层对外暴露的错误分类
#[derive(Debug, Error)]
pub enum SessionError {
    /// 空输入，在任何状态变化之前被拒绝
    #[error("输入无效：{0}")]
    InvalidInput(String),

    /// 工具连接器配置缺失或无法解析，会话无法启动
    #[error("配置错误：{0}")]
    Configuration(String),

    /// 凭证在构建 agent 时被拒绝，会话无法启动
    #[error("认证失败：{0}")]
    Authentication(String),

    /// 单次 agent 调用失败，会被记录为 Error 轮次
    #[error("调用失败：{0}")]
    Invocation(String),
}

impl SessionError {
    /// 是否为启动阶段的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Configuration(_) | SessionError::Authentication(_)
        )
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
