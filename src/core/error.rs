//! 错误类型与恢复动作
//!
//! AgentError 为引擎级错误（模型不可用、审批缺失、取消等），ToolError 为工具级错误，
//! 后者永远不会逃出引擎：统一落入 ToolRecord，作为下一轮反思的证据。

use std::time::Duration;

use thiserror::Error;

/// 引擎推进过程中可能向 Session Driver 抛出的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 模型端点不可达 / 超时，Driver 应有界重试
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// 模型返回错误或空内容
    #[error("Model error: {0}")]
    ModelError(String),

    /// awaiting_approval 状态下未提供人工响应
    #[error("Session is awaiting approval but no operator response was supplied")]
    ApprovalRequired,

    #[error("Cancelled by operator")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// 工具执行错误：Blocked 由安全过滤器在派生进程前给出
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Command blocked by safety filter: {0}")]
    Blocked(String),

    #[error("Tool timed out after {0}s")]
    TimedOut(u64),

    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool failed: {0}")]
    Failed(String),
}

/// RecoveryEngine 给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 等待 delay 后重试同一次 advance（attempt 从 1 开始）
    Retry { attempt: u32, delay: Duration },
    /// 结构化解析失败：直接把原始文本展示给操作员
    ShowRaw(String),
    /// 放弃当前会话
    Abort(String),
}
