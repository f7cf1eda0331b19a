//! 会话驱动：读入问题、推进状态机、经闸门取得人工决定、渲染进度与诊断
//!
//! 每次 advance 都与取消令牌竞争；模型不可用时按 RecoveryEngine 的建议有界重试。
//! 重试使用同一个输入快照，awaiting_approval 的转移不调用模型，因此已批准的工具不会重复执行。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, Diagnosis, RecoveryAction, RecoveryEngine, Session, SessionStatus, ToolOutcome};
use crate::engine::{Engine, EngineEvent};
use crate::gate::{ApprovalGate, ConsoleGate, Decision, PlanDecision};

const PREVIEW_CHARS: usize = 600;

fn preview(text: &str) -> String {
    if text.chars().count() > PREVIEW_CHARS {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 诊断的终端展示文本
pub fn render_diagnosis(d: &Diagnosis) -> String {
    let mut out = format!("=== Diagnosis ===\n{}", d.summary);
    if let Some(cause) = &d.root_cause {
        out.push_str(&format!("\n\nRoot cause:\n{cause}"));
    }
    if !d.remediation.is_empty() {
        out.push_str("\n\nResolution steps:");
        for (i, step) in d.remediation.iter().enumerate() {
            out.push_str(&format!("\n  {}. {}", i + 1, step));
        }
    }
    if !d.prevention.is_empty() {
        out.push_str("\n\nPreventive measures:");
        for p in &d.prevention {
            out.push_str(&format!("\n  - {p}"));
        }
    }
    if d.root_cause.is_none() && d.remediation.is_empty() && d.summary != d.raw {
        out.push_str(&format!("\n\n{}", d.raw));
    }
    out
}

fn render_event(event: &EngineEvent) -> Option<String> {
    match event {
        EngineEvent::ToolFinished { call, outcome } => Some(match outcome {
            ToolOutcome::Ok { result } => format!("[ok] {call}\n{}", preview(result)),
            ToolOutcome::Denied => format!("[denied] {call}"),
            ToolOutcome::Blocked { reason } => {
                format!("[blocked] {call}: refused by the safety filter ({reason})")
            }
            ToolOutcome::Error { message } => format!("[error] {call}: {message}"),
        }),
        EngineEvent::Reflection { text } => Some(format!("\n--- Reflection ---\n{}", preview(text))),
        EngineEvent::Transition { to: SessionStatus::Reflecting, .. } => {
            Some("Reflecting on the results...".to_string())
        }
        _ => None,
    }
}

pub struct SessionDriver {
    engine: Arc<Engine>,
    gate: Arc<dyn ApprovalGate>,
    recovery: RecoveryEngine,
    cancel: CancellationToken,
    events: Option<Mutex<UnboundedReceiver<EngineEvent>>>,
}

impl SessionDriver {
    pub fn new(
        engine: Arc<Engine>,
        gate: Arc<dyn ApprovalGate>,
        recovery: RecoveryEngine,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            gate,
            recovery,
            cancel,
            events: None,
        }
    }

    /// 每次转移后把引擎事件渲染到 stdout
    pub fn with_event_output(mut self, rx: UnboundedReceiver<EngineEvent>) -> Self {
        self.events = Some(Mutex::new(rx));
        self
    }

    async fn flush_events(&self) {
        let Some(rx) = &self.events else {
            return;
        };
        let mut rx = rx.lock().await;
        while let Ok(event) = rx.try_recv() {
            if let Some(line) = render_event(&event) {
                println!("{line}");
            }
        }
    }

    /// 带恢复策略的一次 advance
    async fn advance(
        &self,
        session: &Session,
        decision: Option<Decision>,
    ) -> Result<Session, AgentError> {
        let mut attempts = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
                r = self.engine.advance(session, decision.clone()) => r,
            };
            let err = match result {
                Ok(next) => return Ok(next),
                Err(e) => e,
            };
            match self.recovery.handle(&err, attempts) {
                RecoveryAction::Retry { attempt, delay } => {
                    tracing::warn!(
                        attempt,
                        max = self.recovery.max_retries(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "model unavailable, retrying"
                    );
                    attempts = attempt;
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(AgentError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RecoveryAction::ShowRaw(raw) => {
                    println!("The model response could not be used:\n{raw}");
                    return Err(err);
                }
                RecoveryAction::Abort(reason) => {
                    tracing::error!(reason = %reason, "session aborted");
                    return Err(err);
                }
            }
        }
    }

    /// 从问题陈述驱动一个会话直到 finished
    pub async fn run_session(&self, problem: &str) -> Result<Session, AgentError> {
        let mut session = Session::new(problem);
        tracing::info!(session = %session.id, "session started");

        while !session.is_finished() {
            if session.status == SessionStatus::Executing && !session.plan_reviewed {
                let review = tokio::select! {
                    _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
                    r = self.gate.review_plan(&session.plan) => r,
                };
                session = match review? {
                    PlanDecision::Accept => self.engine.accept_plan(&session),
                    PlanDecision::Reject(feedback) => self.engine.replan(&session, &feedback),
                };
                continue;
            }

            let decision = match (&session.status, &session.proposed_tool) {
                (SessionStatus::AwaitingApproval, Some(call)) => {
                    let answer = tokio::select! {
                        _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
                        r = self.gate.request_approval(call) => r,
                    };
                    Some(answer?)
                }
                _ => None,
            };

            session = self.advance(&session, decision).await?;
            self.flush_events().await;
        }

        let (prompt_tokens, completion_tokens, total_tokens) = self.engine.model().token_usage();
        tracing::info!(
            session = %session.id,
            tool_calls = session.tool_history.len(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "session finished"
        );
        Ok(session)
    }

    /// 交互循环：每次诊断结束后开始新会话，exit / quit / q 退出
    pub async fn interactive(
        &self,
        console: &ConsoleGate,
        first_problem: Option<String>,
    ) -> anyhow::Result<()> {
        println!("Troubleshooting assistant. Describe the problem, or type 'exit' to quit.");
        let mut pending = first_problem;
        loop {
            let line = match pending.take() {
                Some(p) => p,
                None => {
                    let read = tokio::select! {
                        _ = self.cancel.cancelled() => Err(AgentError::Cancelled),
                        r = console.prompt("\nProblem> ") => r,
                    };
                    match read {
                        Ok(l) => l,
                        Err(AgentError::Cancelled) => break,
                        Err(e) => return Err(e.into()),
                    }
                }
            };
            let problem = line.trim();
            if problem.is_empty() {
                continue;
            }
            if matches!(problem.to_lowercase().as_str(), "exit" | "quit" | "q") {
                break;
            }

            match self.run_session(problem).await {
                Ok(session) => {
                    if let Some(d) = &session.diagnosis {
                        println!("\n{}", render_diagnosis(d));
                    }
                }
                Err(AgentError::Cancelled) => {
                    println!("\nSession cancelled.");
                    break;
                }
                Err(e) => println!("\nSession aborted: {e}"),
            }
        }
        Ok(())
    }
}
