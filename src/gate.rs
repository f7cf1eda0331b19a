//! 人工审批闸门
//!
//! 每个工具调用在执行前都要经过 request_approval；新计划在执行前经过 review_plan。
//! 调用方在等待期间挂起，默认无超时。

use std::io::{BufRead, Write};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::Mutex;

use crate::core::{AgentError, ToolCall};
use crate::engine::parser::split_arguments;

/// 操作员对一次工具提议的决定
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
    /// 用操作员给出的调用替换模型的提议（仍经过安全过滤）
    Modify(ToolCall),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDecision {
    Accept,
    /// 拒绝并附带给模型的反馈
    Reject(String),
}

const APPROVE_WORDS: &[&str] = &["y", "yes", "approve", "approved", "ok"];

/// 解析 `tool(arg, ...)` 形式的替换调用，参数规则与模型输出的调用一致
fn parse_modified_call(text: &str) -> Option<ToolCall> {
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    if close < open {
        return None;
    }
    let name = text[..open].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let args = split_arguments(text.get(open + 1..close)?)?;
    Some(ToolCall::new(name, args))
}

/// 解析操作员的文本回复：首词为 y / yes / approve / ok 视为批准，
/// `modify tool(args)` 视为替换，其余一律拒绝
pub fn parse_decision(text: &str) -> Decision {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    let first = lower
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.' || c == '!')
        .next()
        .unwrap_or_default();
    if APPROVE_WORDS.contains(&first) {
        return Decision::Approve;
    }
    if first == "modify" {
        let rest = trimmed.get("modify".len()..).unwrap_or_default().trim();
        if let Some(call) = parse_modified_call(rest) {
            return Decision::Modify(call);
        }
    }
    Decision::Deny
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    async fn request_approval(&self, proposed: &ToolCall) -> Result<Decision, AgentError>;

    async fn review_plan(&self, plan: &[String]) -> Result<PlanDecision, AgentError>;
}

/// 终端交互：提示写 stdout，回复由后台线程从 stdin 逐行送入通道
///
/// 读线程阻塞在 stdin 上也不会拖住运行时关闭，Ctrl+C 后进程可直接退出。
pub struct ConsoleGate {
    lines: Mutex<UnboundedReceiver<std::io::Result<String>>>,
}

impl Default for ConsoleGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleGate {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawned = std::thread::Builder::new()
            .name("stdin-reader".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to start stdin reader");
        }
        Self::from_lines(rx)
    }

    /// 从已有的行通道读取回复；发送端关闭即 EOF
    pub fn from_lines(rx: UnboundedReceiver<std::io::Result<String>>) -> Self {
        Self {
            lines: Mutex::new(rx),
        }
    }

    /// 打印提示并读一行；EOF 视为操作员离开
    pub async fn prompt(&self, text: &str) -> Result<String, AgentError> {
        print!("{text}");
        std::io::stdout()
            .flush()
            .map_err(|e| AgentError::Io(e.to_string()))?;
        let mut lines = self.lines.lock().await;
        match lines.recv().await {
            Some(Ok(line)) => Ok(line),
            None => Err(AgentError::Cancelled),
            Some(Err(e)) => Err(AgentError::Io(e.to_string())),
        }
    }
}

#[async_trait]
impl ApprovalGate for ConsoleGate {
    async fn request_approval(&self, proposed: &ToolCall) -> Result<Decision, AgentError> {
        println!("\nProposed tool call: {proposed}");
        let answer = self
            .prompt("Approve? [yes / no / modify tool(args)]: ")
            .await?;
        Ok(parse_decision(&answer))
    }

    async fn review_plan(&self, plan: &[String]) -> Result<PlanDecision, AgentError> {
        println!("\nTroubleshooting plan:");
        for (i, step) in plan.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
        let answer = self
            .prompt("Accept this plan? [yes / or type feedback to revise]: ")
            .await?;
        let lower = answer.trim().to_lowercase();
        if lower.is_empty() || APPROVE_WORDS.contains(&lower.as_str()) {
            Ok(PlanDecision::Accept)
        } else {
            Ok(PlanDecision::Reject(answer.trim().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decision_approves_by_first_word() {
        assert_eq!(parse_decision("yes"), Decision::Approve);
        assert_eq!(parse_decision("  Y "), Decision::Approve);
        assert_eq!(parse_decision("Approve, go ahead"), Decision::Approve);
        assert_eq!(parse_decision("ok."), Decision::Approve);
    }

    #[test]
    fn test_parse_decision_denies_by_default() {
        assert_eq!(parse_decision("no"), Decision::Deny);
        assert_eq!(parse_decision("don't approve that"), Decision::Deny);
        assert_eq!(parse_decision(""), Decision::Deny);
        assert_eq!(parse_decision("modify something vague"), Decision::Deny);
    }

    #[test]
    fn test_parse_decision_modify() {
        assert_eq!(
            parse_decision("modify analyze_logs(\"postgresql\")"),
            Decision::Modify(ToolCall::new("analyze_logs", vec!["postgresql".to_string()]))
        );
        assert_eq!(
            parse_decision("Modify check_system_resources()"),
            Decision::Modify(ToolCall::new("check_system_resources", vec![]))
        );
    }

    #[test]
    fn test_parse_decision_modify_keeps_quoted_commas() {
        assert_eq!(
            parse_decision("modify execute_shell_command(\"grep -E 'a,b' /var/log/syslog\")"),
            Decision::Modify(ToolCall::new(
                "execute_shell_command",
                vec!["grep -E 'a,b' /var/log/syslog".to_string()]
            ))
        );
        assert_eq!(
            parse_decision("modify analyze_logs(service_name='nginx', 'error')"),
            Decision::Modify(ToolCall::new(
                "analyze_logs",
                vec!["nginx".to_string(), "error".to_string()]
            ))
        );
        assert_eq!(parse_decision("modify analyze_logs(\"nginx)"), Decision::Deny);
    }

    #[tokio::test]
    async fn test_console_reads_lines_until_eof() {
        let (tx, rx) = mpsc::unbounded_channel();
        let console = ConsoleGate::from_lines(rx);
        tx.send(Ok("modify analyze_logs(\"nginx\")".to_string())).unwrap();
        tx.send(Ok("".to_string())).unwrap();
        drop(tx);

        let call = ToolCall::new("check_service_status", vec!["nginx".to_string()]);
        assert_eq!(
            console.request_approval(&call).await.unwrap(),
            Decision::Modify(ToolCall::new("analyze_logs", vec!["nginx".to_string()]))
        );
        assert_eq!(
            console.review_plan(&["Check nginx".to_string()]).await.unwrap(),
            PlanDecision::Accept
        );
        assert!(matches!(
            console.prompt("Problem> ").await,
            Err(AgentError::Cancelled)
        ));
    }
}
