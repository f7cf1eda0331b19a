//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient::complete（非流式）。
//! 错误分两类：Unavailable（网络 / 超时，可重试）与 Api（端点返回错误，不重试）。

use async_trait::async_trait;
use thiserror::Error;

use crate::core::AgentError;
use crate::memory::Message;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LlmError {
    #[error("endpoint unavailable: {0}")]
    Unavailable(String),
    #[error("api error: {0}")]
    Api(String),
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Unavailable(msg) => AgentError::ModelUnavailable(msg),
            LlmError::Api(msg) => AgentError::ModelError(msg),
        }
    }
}

/// LLM 客户端 trait：messages 首条通常为 system 指令
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
