//! 集成测试共用的替身：记录进程派生的 SpyRunner、按脚本作答的审批闸门

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use troubleshooter::config::AppConfig;
use troubleshooter::core::{AgentBuilder, AgentError, ToolCall, ToolError};
use troubleshooter::engine::{Engine, Prompts};
use troubleshooter::gate::{ApprovalGate, Decision, PlanDecision};
use troubleshooter::llm::MockLlmClient;
use troubleshooter::tools::{CommandOutput, CommandRunner};

/// 记录每次派生请求，不真正执行任何进程
#[derive(Default)]
pub struct SpyRunner {
    spawned: Mutex<Vec<String>>,
}

impl SpyRunner {
    pub fn spawned(&self) -> Vec<String> {
        self.spawned.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for SpyRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        _timeout: Duration,
    ) -> Result<CommandOutput, ToolError> {
        let line = format!("{program} {}", args.join(" "));
        self.spawned.lock().unwrap().push(line.clone());
        Ok(CommandOutput {
            status: Some(0),
            stdout: format!("ran: {line}"),
            stderr: String::new(),
        })
    }
}

/// 依次弹出预置决定；耗尽后批准工具、接受计划
#[derive(Default)]
pub struct ScriptedGate {
    decisions: Mutex<VecDeque<Decision>>,
    plans: Mutex<VecDeque<PlanDecision>>,
    pub proposals: Mutex<Vec<ToolCall>>,
    pub reviewed: Mutex<Vec<Vec<String>>>,
}

impl ScriptedGate {
    pub fn new(decisions: Vec<Decision>, plans: Vec<PlanDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            plans: Mutex::new(plans.into()),
            ..Self::default()
        }
    }

    pub fn proposals(&self) -> Vec<ToolCall> {
        self.proposals.lock().unwrap().clone()
    }

    pub fn reviewed(&self) -> Vec<Vec<String>> {
        self.reviewed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApprovalGate for ScriptedGate {
    async fn request_approval(&self, proposed: &ToolCall) -> Result<Decision, AgentError> {
        self.proposals.lock().unwrap().push(proposed.clone());
        Ok(self
            .decisions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Decision::Approve))
    }

    async fn review_plan(&self, plan: &[String]) -> Result<PlanDecision, AgentError> {
        self.reviewed.lock().unwrap().push(plan.to_vec());
        Ok(self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PlanDecision::Accept))
    }
}

pub fn mock_config(max_before_reflect: usize, max_total: usize) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.llm.provider = "mock".into();
    cfg.llm.retry_backoff_ms = 1;
    cfg.engine.max_tool_calls_before_reflect = max_before_reflect;
    cfg.engine.max_total_tool_calls = max_total;
    cfg.tools.tool_timeout_secs = 5;
    cfg
}

pub fn build_engine(cfg: AppConfig, mock: Arc<MockLlmClient>, runner: Arc<SpyRunner>) -> Arc<Engine> {
    AgentBuilder::new(cfg)
        .with_llm(mock)
        .with_runner(runner)
        .with_prompts(Prompts::default())
        .build()
        .unwrap()
        .engine
}

/// 模型提议一次 shell 命令的回复
pub fn shell_reply(command: &str) -> String {
    format!("Let me check that.\n```tool\nexecute_shell_command(\"{command}\")\n```")
}

pub const NGINX_PLAN: &str = "Plan:\n1. Check nginx service status\n2. Inspect the nginx error log\n3. Test the upstream application port";

pub const NGINX_DIAGNOSIS: &str = "Summary:\nnginx cannot reach its upstream.\nRoot cause:\nThe application container exited after an OOM kill.\nResolution steps:\n- Restart the application container\n- Raise its memory limit\nPreventive measures:\n- Alert on container restarts";
