//! 排障状态机：planning → executing → awaiting_approval → reflecting → finished
//!
//! advance 读入一个会话快照，恰好执行一次状态转移，返回新快照；输入快照不被修改，
//! 因此模型调用失败时 Driver 可以用同一快照重试。工具错误写入 tool_history，永不向外抛出。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::EngineSection;
use crate::core::{
    AgentError, Session, SessionStatus, ToolCall, ToolError, ToolOutcome, ToolRecord,
};
use crate::engine::events::EngineEvent;
use crate::engine::model::ModelAdapter;
use crate::engine::parser::{HeuristicParser, ResponseParser};
use crate::engine::prompts::{render, Prompts};
use crate::gate::Decision;
use crate::memory::Message;
use crate::tools::ToolExecutor;

/// 计划解析不出任何步骤时使用的单步计划
pub const DEGENERATE_STEP: &str = "Investigate the reported problem with the available tools";

/// 迭代上限：引擎活性的保证
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_tool_calls_before_reflect: usize,
    pub max_total_tool_calls: usize,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self::from(&EngineSection::default())
    }
}

impl From<&EngineSection> for EngineLimits {
    fn from(cfg: &EngineSection) -> Self {
        Self {
            max_tool_calls_before_reflect: cfg.max_tool_calls_before_reflect.max(1),
            max_total_tool_calls: cfg.max_total_tool_calls.max(1),
        }
    }
}

pub struct Engine {
    model: ModelAdapter,
    executor: ToolExecutor,
    parser: Arc<dyn ResponseParser>,
    prompts: Prompts,
    limits: EngineLimits,
    events: Option<UnboundedSender<EngineEvent>>,
}

fn plan_text(plan: &[String]) -> String {
    if plan.is_empty() {
        return "(no plan yet)".to_string();
    }
    plan.iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s))
        .collect::<Vec<_>>()
        .join("\n")
}

fn history_text(history: &[ToolRecord]) -> String {
    if history.is_empty() {
        return "(no tools used yet)".to_string();
    }
    history
        .iter()
        .map(ToolRecord::summary)
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl Engine {
    pub fn new(model: ModelAdapter, executor: ToolExecutor, limits: EngineLimits) -> Self {
        Self {
            model,
            executor,
            parser: Arc::new(HeuristicParser::default()),
            prompts: Prompts::default(),
            limits,
            events: None,
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn ResponseParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_events(mut self, tx: UnboundedSender<EngineEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn limits(&self) -> EngineLimits {
        self.limits
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn model(&self) -> &ModelAdapter {
        &self.model
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// 执行一次状态转移
    ///
    /// `human` 只在 awaiting_approval 时使用，其余状态忽略；awaiting_approval 缺少决定时
    /// 返回 ApprovalRequired。finished 会话原样返回。
    pub async fn advance(
        &self,
        session: &Session,
        human: Option<Decision>,
    ) -> Result<Session, AgentError> {
        let from = session.status;
        let next = match from {
            SessionStatus::Finished => return Ok(session.clone()),
            SessionStatus::Planning => self.plan(session).await?,
            SessionStatus::Executing => self.propose(session).await?,
            SessionStatus::AwaitingApproval => {
                let decision = human.ok_or(AgentError::ApprovalRequired)?;
                self.resolve(session, decision).await
            }
            SessionStatus::Reflecting => self.reflect(session).await?,
        };

        if let Err(violation) = next.check_invariants() {
            tracing::warn!(session = %next.id, violation = %violation, "session invariant violated");
        }
        tracing::debug!(session = %next.id, from = %from, to = %next.status, "transition");
        self.emit(EngineEvent::Transition {
            from,
            to: next.status,
        });
        Ok(next)
    }

    /// 操作员拒绝计划：丢弃计划与游标，带着反馈回到 planning
    pub fn replan(&self, session: &Session, feedback: &str) -> Session {
        if session.is_finished() {
            return session.clone();
        }
        let from = session.status;
        let mut next = session.clone();
        next.messages.push(Message::user(format!(
            "Please revise the troubleshooting plan. Operator feedback: {}",
            feedback.trim()
        )));
        next.plan.clear();
        next.current_step_index = 0;
        next.proposed_tool = None;
        next.plan_reviewed = false;
        next.status = SessionStatus::Planning;
        tracing::info!(session = %next.id, "plan rejected by operator, re-planning");
        self.emit(EngineEvent::Transition {
            from,
            to: SessionStatus::Planning,
        });
        next
    }

    /// 操作员接受当前计划
    pub fn accept_plan(&self, session: &Session) -> Session {
        let mut next = session.clone();
        next.plan_reviewed = true;
        next
    }

    async fn plan(&self, session: &Session) -> Result<Session, AgentError> {
        let system = render(&self.prompts.planning, &self.executor.registry().describe());
        let text = self.model.complete(&session.messages, &system).await?;

        let mut next = session.clone();
        next.messages.push(Message::assistant(text.clone()));
        let mut plan = self.parser.parse_plan(&text);
        if plan.is_empty() {
            tracing::warn!(session = %next.id, "no plan steps parsed, using a single-step plan");
            plan = vec![DEGENERATE_STEP.to_string()];
        }
        tracing::info!(session = %next.id, steps = plan.len(), "plan ready");
        self.emit(EngineEvent::PlanReady {
            steps: plan.clone(),
        });
        next.plan = plan;
        next.current_step_index = 0;
        next.plan_reviewed = false;
        next.status = SessionStatus::Executing;
        Ok(next)
    }

    async fn propose(&self, session: &Session) -> Result<Session, AgentError> {
        let mut next = session.clone();
        if session.tool_history.len() >= self.limits.max_total_tool_calls {
            tracing::info!(
                session = %next.id,
                calls = session.tool_history.len(),
                "tool call budget exhausted, reflecting"
            );
            next.status = SessionStatus::Reflecting;
            return Ok(next);
        }

        let mut context = session.messages.clone();
        context.push(Message::user(format!(
            "Current plan:\n{}",
            plan_text(&session.plan)
        )));
        context.push(Message::user(match session.current_step() {
            Some(step) => format!(
                "Current step ({} of {}): {}",
                session.current_step_index + 1,
                session.plan.len(),
                step
            ),
            None => "All plan steps have been covered. Propose another check only if it is needed."
                .to_string(),
        }));
        context.push(Message::user(format!(
            "Tool usage history:\n{}",
            history_text(&session.tool_history)
        )));
        context.push(Message::user(
            "What tool would you like to use next based on your plan?",
        ));

        let system = render(&self.prompts.execution, &self.executor.registry().describe());
        let text = self.model.complete(&context, &system).await?;
        next.messages.push(Message::assistant(text.clone()));

        match self
            .parser
            .parse_tool_call(&text, &self.executor.tool_names())
        {
            Some(call) => {
                tracing::info!(session = %next.id, call = %call, "tool proposed");
                self.emit(EngineEvent::ToolProposed { call: call.clone() });
                next.proposed_tool = Some(call);
                next.status = SessionStatus::AwaitingApproval;
            }
            None => {
                next.status = SessionStatus::Reflecting;
            }
        }
        Ok(next)
    }

    async fn resolve(&self, session: &Session, decision: Decision) -> Session {
        let mut next = session.clone();
        let Some(proposed) = next.proposed_tool.take() else {
            tracing::warn!(session = %next.id, "awaiting approval without a proposal");
            next.status = SessionStatus::Executing;
            return next;
        };

        let (call, outcome) = match decision {
            Decision::Deny => {
                next.messages.push(Message::user(format!(
                    "Tool execution denied: {proposed}"
                )));
                (proposed, ToolOutcome::Denied)
            }
            Decision::Approve => {
                let outcome = self.execute(&mut next, &proposed).await;
                (proposed, outcome)
            }
            Decision::Modify(call) => {
                next.messages.push(Message::user(format!(
                    "Operator replaced {proposed} with {call}"
                )));
                let outcome = self.execute(&mut next, &call).await;
                (call, outcome)
            }
        };

        next.status = match &outcome {
            ToolOutcome::Ok { .. } => {
                next.current_step_index = (next.current_step_index + 1).min(next.plan.len());
                let calls = next.tool_history.len() + 1;
                if next.plan_exhausted() || calls >= self.limits.max_tool_calls_before_reflect {
                    SessionStatus::Reflecting
                } else {
                    SessionStatus::Executing
                }
            }
            ToolOutcome::Denied | ToolOutcome::Blocked { .. } => SessionStatus::Executing,
            ToolOutcome::Error { .. } => SessionStatus::Reflecting,
        };

        self.emit(EngineEvent::ToolFinished {
            call: call.clone(),
            outcome: outcome.clone(),
        });
        next.tool_history.push(ToolRecord::new(call, outcome));
        next
    }

    /// 调用工具并把结果写入会话消息；所有 ToolError 都折叠为 ToolOutcome
    async fn execute(&self, next: &mut Session, call: &ToolCall) -> ToolOutcome {
        match self.executor.invoke(&call.name, &call.arguments).await {
            Ok(result) => {
                next.messages
                    .push(Message::tool(format!("Tool result: {result}")));
                ToolOutcome::Ok { result }
            }
            Err(ToolError::Blocked(reason)) => {
                next.messages.push(Message::tool(format!(
                    "Tool call refused by the safety filter ({reason}); choose a different action."
                )));
                ToolOutcome::Blocked { reason }
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "tool failed");
                next.messages
                    .push(Message::tool(format!("Error executing tool: {e}")));
                ToolOutcome::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    fn evidence(session: &Session) -> Vec<Message> {
        vec![
            Message::user(format!("Initial problem understanding: {}", session.problem())),
            Message::user(format!("Current plan:\n{}", plan_text(&session.plan))),
            Message::user(format!(
                "Tool usage history and results:\n{}",
                history_text(&session.tool_history)
            )),
        ]
    }

    async fn reflect(&self, session: &Session) -> Result<Session, AgentError> {
        let mut context = session.messages.clone();
        context.extend(Self::evidence(session));
        context.push(Message::user(
            "Please provide your reflection on the troubleshooting process so far.",
        ));
        let text = self.model.complete(&context, &self.prompts.reflection).await?;

        let mut next = session.clone();
        next.messages.push(Message::assistant(text.clone()));
        next.reflection = text.clone();
        next.reflection_rounds += 1;
        self.emit(EngineEvent::Reflection { text: text.clone() });

        // 模型持续要求更多信息却不提议工具时，轮数上限保证收尾
        let calls = next.tool_history.len();
        if self.parser.detects_continuation(&text)
            && calls < self.limits.max_total_tool_calls
            && next.reflection_rounds < self.limits.max_total_tool_calls
        {
            next.status = SessionStatus::Executing;
            return Ok(next);
        }

        let mut context = next.messages.clone();
        context.extend(Self::evidence(&next));
        context.push(Message::user(format!("Your reflection: {}", next.reflection)));
        context.push(Message::user(
            "Please provide your final diagnosis and recommended solution.",
        ));
        let final_text = self
            .model
            .complete(&context, &self.prompts.final_report)
            .await?;
        next.messages.push(Message::assistant(final_text.clone()));
        let diagnosis = self.parser.parse_diagnosis(&final_text);
        self.emit(EngineEvent::Diagnosis {
            diagnosis: diagnosis.clone(),
        });
        tracing::info!(session = %next.id, calls, "diagnosis ready");
        next.diagnosis = Some(diagnosis);
        next.status = SessionStatus::Finished;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo the first argument"
        }

        async fn execute(&self, args: &[String]) -> Result<String, ToolError> {
            args.first()
                .cloned()
                .ok_or_else(|| ToolError::InvalidArguments("echo needs one argument".into()))
        }
    }

    fn engine(mock: Arc<MockLlmClient>, limits: EngineLimits) -> Engine {
        let mut reg = ToolRegistry::new();
        reg.register(Echo);
        Engine::new(ModelAdapter::new(mock), ToolExecutor::new(reg, 5), limits)
    }

    fn awaiting(call: ToolCall) -> Session {
        let mut s = Session::new("problem");
        s.plan = vec!["a".into(), "b".into()];
        s.status = SessionStatus::AwaitingApproval;
        s.proposed_tool = Some(call);
        s
    }

    #[tokio::test]
    async fn test_empty_plan_becomes_single_step() {
        let mock = Arc::new(MockLlmClient::new(["I will just look around."]));
        let e = engine(mock, EngineLimits::default());
        let s = e.advance(&Session::new("slow api"), None).await.unwrap();
        assert_eq!(s.status, SessionStatus::Executing);
        assert_eq!(s.plan, vec![DEGENERATE_STEP.to_string()]);
    }

    #[tokio::test]
    async fn test_awaiting_without_decision_is_an_error() {
        let e = engine(Arc::new(MockLlmClient::default()), EngineLimits::default());
        let s = awaiting(ToolCall::new("echo", vec!["x".into()]));
        assert_eq!(e.advance(&s, None).await, Err(AgentError::ApprovalRequired));
    }

    #[tokio::test]
    async fn test_error_outcome_routes_to_reflection() {
        let e = engine(Arc::new(MockLlmClient::default()), EngineLimits::default());
        let s = awaiting(ToolCall::new("echo", vec![]));
        let next = e.advance(&s, Some(Decision::Approve)).await.unwrap();
        assert_eq!(next.status, SessionStatus::Reflecting);
        assert!(next.tool_history[0].outcome.is_error());
        assert!(next.proposed_tool.is_none());
        assert_eq!(next.current_step_index, 0);
    }

    #[tokio::test]
    async fn test_modify_executes_substituted_call() {
        let e = engine(Arc::new(MockLlmClient::default()), EngineLimits::default());
        let s = awaiting(ToolCall::new("echo", vec!["original".into()]));
        let replacement = ToolCall::new("echo", vec!["replaced".into()]);
        let next = e
            .advance(&s, Some(Decision::Modify(replacement.clone())))
            .await
            .unwrap();
        assert_eq!(next.tool_history[0].call, replacement);
        assert_eq!(
            next.tool_history[0].outcome,
            ToolOutcome::Ok {
                result: "replaced".into()
            }
        );
        assert_eq!(next.current_step_index, 1);
        assert_eq!(next.status, SessionStatus::Executing);
    }

    #[tokio::test]
    async fn test_budget_exhausted_skips_model() {
        let mock = Arc::new(MockLlmClient::default());
        let limits = EngineLimits {
            max_tool_calls_before_reflect: 5,
            max_total_tool_calls: 1,
        };
        let e = engine(mock.clone(), limits);
        let mut s = Session::new("p");
        s.status = SessionStatus::Executing;
        s.tool_history.push(ToolRecord::new(
            ToolCall::new("echo", vec![]),
            ToolOutcome::Denied,
        ));
        let next = e.advance(&s, None).await.unwrap();
        assert_eq!(next.status, SessionStatus::Reflecting);
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test]
    async fn test_endless_continuation_still_finishes() {
        let mock = Arc::new(
            MockLlmClient::default().with_fallback("I need more information before concluding."),
        );
        let limits = EngineLimits {
            max_tool_calls_before_reflect: 5,
            max_total_tool_calls: 3,
        };
        let e = engine(mock, limits);
        let mut s = Session::new("p");
        s.plan = vec!["look".into()];
        s.status = SessionStatus::Executing;
        let mut steps = 0;
        while !s.is_finished() {
            s = e.advance(&s, None).await.unwrap();
            steps += 1;
            assert!(steps < 50, "session did not terminate");
        }
        assert_eq!(s.reflection_rounds, 3);
        assert!(s.tool_history.is_empty());
    }

    #[tokio::test]
    async fn test_replan_resets_plan_and_cursor() {
        let e = engine(Arc::new(MockLlmClient::default()), EngineLimits::default());
        let mut s = Session::new("p");
        s.plan = vec!["x".into(), "y".into()];
        s.current_step_index = 1;
        s.status = SessionStatus::Executing;
        let next = e.replan(&s, "check the database first");
        assert_eq!(next.status, SessionStatus::Planning);
        assert!(next.plan.is_empty());
        assert_eq!(next.current_step_index, 0);
        assert!(next
            .messages
            .last()
            .is_some_and(|m| m.content.contains("check the database first")));
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mock = Arc::new(MockLlmClient::new(["1. one\n2. two"]));
        let e = engine(mock, EngineLimits::default()).with_events(tx);
        e.advance(&Session::new("p"), None).await.unwrap();
        assert!(matches!(rx.recv().await, Some(EngineEvent::PlanReady { .. })));
        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::Transition {
                from: SessionStatus::Planning,
                to: SessionStatus::Executing
            })
        );
    }
}
