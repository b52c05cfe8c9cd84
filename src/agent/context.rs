use crate::types::{Content, Part};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant connected to the user's Notion workspace. \
Use the available Notion tools to search, read and update pages and databases. \
Answer from the tool results and do not invent content that the tools did not return.";

/// 上下文 - agent 自己维护的对话记忆
pub struct Context {
    system_prompt: String,
    messages: Vec<Content>,
    max_messages: usize,
}

impl Context {
    pub fn new(system_prompt: Option<String>, max_messages: usize) -> Self {
        Context {
            system_prompt: system_prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            messages: Vec::new(),
            max_messages,
        }
    }

    /// 记录一次完整的问答
    pub fn add_exchange(&mut self, query: &str, answer: &str) {
        self.messages.push(Content::user(vec![Part::text(query)]));
        self.messages.push(Content::model(vec![Part::text(answer)]));
        self.truncate();
    }

    /// 裁剪历史，保证第一条仍然是用户消息
    fn truncate(&mut self) {
        if self.messages.len() > self.max_messages {
            self.messages.drain(0..self.messages.len() - self.max_messages);
        }
        while self
            .messages
            .first()
            .is_some_and(|m| m.role.as_deref() != Some("user"))
        {
            self.messages.remove(0);
        }
    }

    pub fn messages(&self) -> &[Content] {
        &self.messages
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_system_prompt_falls_back_to_default() {
        let ctx = Context::new(Some("   ".to_string()), 10);
        assert!(ctx.system_prompt().contains("Notion"));
        assert!(ctx.is_empty());
    }

    #[test]
    fn truncation_keeps_user_first() {
        let mut ctx = Context::new(None, 3);
        ctx.add_exchange("q1", "a1");
        ctx.add_exchange("q2", "a2");

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.messages()[0].role.as_deref(), Some("user"));
        assert_eq!(ctx.messages()[0].parts[0].text.as_deref(), Some("q2"));
    }
}
