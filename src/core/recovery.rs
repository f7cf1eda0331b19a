//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction：模型不可用时指数退避重试（有上限），
//! 其余错误终止当前会话，由 Driver 给出可见提示。

use std::time::Duration;

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作（重试 / 展示原文 / 终止）
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_retries: u32,
    base_delay: Duration,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl RecoveryEngine {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// attempts_so_far：同一次 advance 已经失败的次数（首次失败传 0）
    pub fn handle(&self, err: &AgentError, attempts_so_far: u32) -> RecoveryAction {
        match err {
            AgentError::ModelUnavailable(msg) => {
                if attempts_so_far < self.max_retries {
                    let attempt = attempts_so_far + 1;
                    let factor = 1u32 << attempts_so_far.min(6);
                    RecoveryAction::Retry {
                        attempt,
                        delay: self.base_delay * factor,
                    }
                } else {
                    RecoveryAction::Abort(format!(
                        "Model still unavailable after {} retries: {msg}",
                        self.max_retries
                    ))
                }
            }
            AgentError::ModelError(msg) => RecoveryAction::ShowRaw(msg.clone()),
            AgentError::Cancelled => RecoveryAction::Abort("Session cancelled".to_string()),
            other => RecoveryAction::Abort(other.to_string()),
        }
    }
}
