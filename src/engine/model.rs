//! 模型调用适配：complete(上下文消息, system 指令) -> 文本
//!
//! 在上下文前拼接 system 指令后交给 LlmClient；LlmError 映射为 AgentError。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

#[derive(Clone)]
pub struct ModelAdapter {
    llm: Arc<dyn LlmClient>,
}

impl ModelAdapter {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn complete(&self, context: &[Message], system: &str) -> Result<String, AgentError> {
        let mut full = Vec::with_capacity(context.len() + 1);
        full.push(Message::system(system.to_string()));
        full.extend_from_slice(context);
        let text = self.llm.complete(&full).await.map_err(AgentError::from)?;
        if text.trim().is_empty() {
            return Err(AgentError::ModelError("empty completion".to_string()));
        }
        Ok(text)
    }

    /// 累计 token 使用：(prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }
}
