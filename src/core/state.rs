//! 会话状态：Session 根聚合、ToolCall、ToolRecord、Diagnosis
//!
//! Session 只由引擎的转移函数修改：每次 advance 读入一个快照、产出下一个快照。
//! 不变量：proposed_tool.is_some() 当且仅当 status == AwaitingApproval；
//! current_step_index <= plan.len()；Finished 为终态。

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::memory::Message;

/// 状态机阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Planning,
    Executing,
    Reflecting,
    AwaitingApproval,
    Finished,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Planning => "planning",
            SessionStatus::Executing => "executing",
            SessionStatus::Reflecting => "reflecting",
            SessionStatus::AwaitingApproval => "awaiting_approval",
            SessionStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// 模型提出的工具调用：名称 + 位置参数（不做类型检查，由各工具自行校验）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Vec<String>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

impl fmt::Display for ToolCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self
            .arguments
            .iter()
            .map(|a| format!("\"{}\"", a.replace('"', "\\\"")))
            .collect();
        write!(f, "{}({})", self.name, args.join(", "))
    }
}

/// 工具调用结局
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok { result: String },
    /// 操作员拒绝
    Denied,
    /// 安全过滤器拒绝；按拒绝处理，不派生任何进程
    Blocked { reason: String },
    Error { message: String },
}

impl ToolOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutcome::Ok { .. })
    }

    /// Denied 与 Blocked 都算拒绝类结局
    pub fn is_denial(&self) -> bool {
        matches!(self, ToolOutcome::Denied | ToolOutcome::Blocked { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error { .. })
    }
}

/// tool_history 中的一条记录，序号即其位置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    pub call: ToolCall,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
    pub at: DateTime<Utc>,
}

impl ToolRecord {
    pub fn new(call: ToolCall, outcome: ToolOutcome) -> Self {
        Self {
            call,
            outcome,
            at: Utc::now(),
        }
    }

    /// 供 prompt 使用的单行摘要
    pub fn summary(&self) -> String {
        match &self.outcome {
            ToolOutcome::Ok { result } => format!("Tool: {}\nResult: {}", self.call, result),
            ToolOutcome::Denied => {
                format!("Tool: {}\nStatus: Execution denied by operator", self.call)
            }
            ToolOutcome::Blocked { reason } => {
                format!("Tool: {}\nStatus: Blocked by safety filter ({})", self.call, reason)
            }
            ToolOutcome::Error { message } => format!("Tool: {}\nError: {}", self.call, message),
        }
    }
}

/// 最终诊断；结构化段落缺失时保留原文
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub summary: String,
    pub root_cause: Option<String>,
    pub remediation: Vec<String>,
    pub prevention: Vec<String>,
    pub raw: String,
}

/// 一次排障对话的全部状态
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    problem: String,
    pub messages: Vec<Message>,
    pub plan: Vec<String>,
    pub current_step_index: usize,
    pub tool_history: Vec<ToolRecord>,
    pub reflection: String,
    pub proposed_tool: Option<ToolCall>,
    pub status: SessionStatus,
    pub diagnosis: Option<Diagnosis>,
    /// 计划是否已经过操作员审阅；新计划生成时重置为 false
    pub plan_reviewed: bool,
    /// 已完成的反思轮数，与工具总数共同限制 reflecting → executing 的回环
    #[serde(default)]
    pub reflection_rounds: usize,
}

impl Session {
    /// 操作员陈述问题时创建会话，初始状态为 Planning
    pub fn new(problem: impl Into<String>) -> Self {
        let problem = problem.into();
        Self {
            id: Uuid::new_v4(),
            messages: vec![Message::user(problem.clone())],
            problem,
            plan: Vec::new(),
            current_step_index: 0,
            tool_history: Vec::new(),
            reflection: String::new(),
            proposed_tool: None,
            status: SessionStatus::Planning,
            diagnosis: None,
            plan_reviewed: false,
            reflection_rounds: 0,
        }
    }

    pub fn problem(&self) -> &str {
        &self.problem
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }

    /// 当前计划步骤（游标到达末尾时为 None）
    pub fn current_step(&self) -> Option<&str> {
        self.plan.get(self.current_step_index).map(String::as_str)
    }

    pub fn plan_exhausted(&self) -> bool {
        self.current_step_index >= self.plan.len()
    }

    pub fn count_ok(&self) -> usize {
        self.tool_history.iter().filter(|r| r.outcome.is_ok()).count()
    }

    pub fn count_denials(&self) -> usize {
        self.tool_history
            .iter()
            .filter(|r| r.outcome.is_denial())
            .count()
    }

    pub fn count_errors(&self) -> usize {
        self.tool_history
            .iter()
            .filter(|r| r.outcome.is_error())
            .count()
    }

    /// 不变量检查（测试与 debug 日志用）
    pub fn check_invariants(&self) -> Result<(), String> {
        let awaiting = self.status == SessionStatus::AwaitingApproval;
        if awaiting != self.proposed_tool.is_some() {
            return Err(format!(
                "proposed_tool presence ({}) disagrees with status {}",
                self.proposed_tool.is_some(),
                self.status
            ));
        }
        if self.current_step_index > self.plan.len() {
            return Err(format!(
                "current_step_index {} exceeds plan length {}",
                self.current_step_index,
                self.plan.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_planning() {
        let session = Session::new("nginx returning 502s");
        assert_eq!(session.status, SessionStatus::Planning);
        assert_eq!(session.problem(), "nginx returning 502s");
        assert_eq!(session.messages.len(), 1);
        assert!(session.check_invariants().is_ok());
    }

    #[test]
    fn test_invariant_detects_dangling_proposal() {
        let mut session = Session::new("disk full");
        session.proposed_tool = Some(ToolCall::new("check_system_resources", vec![]));
        assert!(session.check_invariants().is_err());
        session.status = SessionStatus::AwaitingApproval;
        assert!(session.check_invariants().is_ok());
    }

    #[test]
    fn test_tool_call_display_quotes_arguments() {
        let call = ToolCall::new(
            "check_network_connectivity",
            vec!["db.internal".to_string(), "5432".to_string()],
        );
        assert_eq!(
            call.to_string(),
            r#"check_network_connectivity("db.internal", "5432")"#
        );
    }

    #[test]
    fn test_record_summary_mentions_denial() {
        let record = ToolRecord::new(
            ToolCall::new("analyze_logs", vec!["nginx".to_string()]),
            ToolOutcome::Denied,
        );
        assert!(record.summary().contains("denied"));
    }
}
