//! 组件构建器：统一的初始化逻辑
//!
//! 交互会话与一次性巡检共享同一套模型客户端、工具注册表与知识库。
//! 测试可注入 LLM 客户端与 CommandRunner。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::config::AppConfig;
use crate::core::{AgentError, RecoveryEngine};
use crate::engine::{Engine, EngineEvent, EngineLimits, ModelAdapter, Prompts};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::report::ReportBuilder;
use crate::tools::{default_registry, CommandRunner, KnowledgeBase, SystemRunner, ToolExecutor};

/// 凭据文件导出的端点变量，llm.base_url 未配置时使用
const API_BASE_ENV: &str = "API_BASE";

/// 配置优先，其次是 API_BASE 环境变量；空值视为未设置
fn resolve_base_url(configured: Option<&str>, from_env: Option<String>) -> Option<String> {
    configured
        .map(str::to_string)
        .or(from_env)
        .filter(|url| !url.trim().is_empty())
}

/// 按配置选择模型后端：provider 为 mock 或找不到 API Key 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM (provider = mock)");
        return Arc::new(MockLlmClient::default());
    }

    let key = std::env::var(&cfg.llm.api_key_env)
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok())
        .filter(|k| !k.trim().is_empty());
    match key {
        Some(key) => {
            let base_url = resolve_base_url(
                cfg.llm.base_url.as_deref(),
                std::env::var(API_BASE_ENV).ok(),
            );
            tracing::info!(model = %cfg.llm.model, base_url = ?base_url, "Using OpenAI-compatible LLM");
            Arc::new(OpenAiClient::new(
                base_url.as_deref(),
                &cfg.llm.model,
                &key,
                cfg.llm.request_timeout_secs,
            ))
        }
        None => {
            tracing::warn!(
                env = %cfg.llm.api_key_env,
                "No API key set, using Mock LLM"
            );
            Arc::new(MockLlmClient::default())
        }
    }
}

/// 组件构建器
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    runner: Arc<dyn CommandRunner>,
    knowledge: Option<Arc<KnowledgeBase>>,
    prompts: Option<Prompts>,
    with_events: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            runner: Arc::new(SystemRunner),
            knowledge: None,
            prompts: None,
            with_events: false,
        }
    }

    /// 注入 LLM 客户端（不再按配置创建）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 替换进程执行器
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn with_knowledge_base(mut self, kb: Arc<KnowledgeBase>) -> Self {
        self.knowledge = Some(kb);
        self
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// 构建时创建事件通道，接收端放在 AgentComponents::events
    pub fn with_events(mut self, enable: bool) -> Self {
        self.with_events = enable;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 配置了知识库路径则从文件加载，否则使用内置知识库
    pub fn build_knowledge_base(&self) -> Result<Arc<KnowledgeBase>, AgentError> {
        if let Some(kb) = &self.knowledge {
            return Ok(Arc::clone(kb));
        }
        match &self.config.tools.knowledge_base {
            Some(path) => KnowledgeBase::load(path)
                .map(Arc::new)
                .map_err(|e| AgentError::Config(format!("{e:#}"))),
            None => Ok(Arc::new(KnowledgeBase::builtin())),
        }
    }

    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => create_llm_from_config(&self.config),
        }
    }

    pub fn build_recovery(&self) -> RecoveryEngine {
        RecoveryEngine::new(
            self.config.llm.max_retries,
            Duration::from_millis(self.config.llm.retry_backoff_ms),
        )
    }

    /// 一次性巡检使用的报告构建器（与会话共用模型与 runner）
    fn build_reporter(&self, llm: Arc<dyn LlmClient>) -> ReportBuilder {
        ReportBuilder::new(
            Arc::clone(&self.runner),
            self.config.services.categories.clone(),
            self.config.tools.tool_timeout_secs,
        )
        .with_model(ModelAdapter::new(llm))
    }

    /// 构建完整的 AgentComponents
    pub fn build(&self) -> Result<AgentComponents, AgentError> {
        let llm = self.build_llm();
        let knowledge = self.build_knowledge_base()?;
        let registry = default_registry(
            &self.config.tools,
            Arc::clone(&self.runner),
            Arc::clone(&knowledge),
        );
        let executor = ToolExecutor::new(registry, self.config.tools.tool_timeout_secs);
        let prompts = self
            .prompts
            .clone()
            .unwrap_or_else(Prompts::from_default_dirs);

        let mut engine = Engine::new(
            ModelAdapter::new(Arc::clone(&llm)),
            executor,
            EngineLimits::from(&self.config.engine),
        )
        .with_prompts(prompts);

        let events = if self.with_events {
            let (tx, rx) = mpsc::unbounded_channel();
            engine = engine.with_events(tx);
            Some(rx)
        } else {
            None
        };

        tracing::debug!(
            max_before_reflect = self.config.engine.max_tool_calls_before_reflect,
            max_total = self.config.engine.max_total_tool_calls,
            "engine built"
        );

        Ok(AgentComponents {
            engine: Arc::new(engine),
            recovery: self.build_recovery(),
            reporter: self.build_reporter(llm),
            knowledge,
            events,
        })
    }
}

/// 预构建的组件：Engine、恢复策略、巡检、知识库，可多会话共享
pub struct AgentComponents {
    pub engine: Arc<Engine>,
    pub recovery: RecoveryEngine,
    pub reporter: ReportBuilder,
    pub knowledge: Arc<KnowledgeBase>,
    pub events: Option<UnboundedReceiver<EngineEvent>>,
}
