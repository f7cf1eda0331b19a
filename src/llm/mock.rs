//! Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序弹出预置回复；队列耗尽后返回 fallback。每次调用的完整消息都会被记录，便于断言 prompt 内容。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 预置回复：正常文本或模拟的端点错误
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Fail(LlmError),
}

#[derive(Debug)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<MockReply>>,
    fallback: String,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl MockLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(
                replies
                    .into_iter()
                    .map(|r| MockReply::Text(r.into()))
                    .collect(),
            ),
            fallback: "No further action needed.".to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    pub fn push(&self, reply: MockReply) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// 已收到的调用次数
    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 第 n 次调用时的消息（含 system）
    pub fn request(&self, n: usize) -> Option<Vec<Message>> {
        self.seen.lock().ok().and_then(|s| s.get(n).cloned())
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let next = self.replies.lock().ok().and_then(|mut q| q.pop_front());
        match next {
            Some(MockReply::Text(t)) => Ok(t),
            Some(MockReply::Fail(e)) => Err(e),
            None => Ok(self.fallback.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_pops_in_order_then_falls_back() {
        let mock = MockLlmClient::new(["first", "second"]).with_fallback("done");
        let msgs = vec![Message::user("hi")];
        assert_eq!(mock.complete(&msgs).await.unwrap(), "first");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "second");
        assert_eq!(mock.complete(&msgs).await.unwrap(), "done");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_scripted_failure() {
        let mock = MockLlmClient::default();
        mock.push(MockReply::Fail(LlmError::Unavailable("down".into())));
        let err = mock.complete(&[]).await.unwrap_err();
        assert_eq!(err, LlmError::Unavailable("down".into()));
    }
}
