pub mod config_check;
pub mod container;
pub mod executor;
pub mod knowledge;
pub mod logs;
pub mod network;
pub mod registry;
pub mod resources;
pub mod runner;
pub mod service;
pub mod shell;

use std::sync::Arc;

pub use config_check::ConfigCheckTool;
pub use container::ContainerTool;
pub use executor::ToolExecutor;
pub use knowledge::{Guidance, KnowledgeBase, TroubleshootingStep, TroubleshootingTool};
pub use logs::{Finding, LogTool, Severity};
pub use network::NetworkTool;
pub use registry::{expect_args, Tool, ToolRegistry};
pub use resources::{collect_resources, ResourceSnapshot, ResourceStatus, ResourceTool};
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use service::{probe_service, ServiceStatus, ServiceTool};
pub use shell::{SafetyFilter, ShellTool};

use crate::config::ToolsSection;

/// 注册全部排查工具；进程派生统一走 runner，便于测试替换
pub fn default_registry(
    cfg: &ToolsSection,
    runner: Arc<dyn CommandRunner>,
    kb: Arc<KnowledgeBase>,
) -> ToolRegistry {
    let timeout = cfg.tool_timeout_secs;
    let filter = Arc::new(SafetyFilter::new(&cfg.extra_deny_patterns));

    let mut registry = ToolRegistry::new();
    registry.register(ResourceTool);
    registry.register(LogTool::new(cfg.log_globs.clone(), "/var/log", cfg.log_tail_lines));
    registry.register(ServiceTool::new(Arc::clone(&runner), timeout));
    registry.register(ConfigCheckTool);
    registry.register(NetworkTool::new(timeout.min(10)));
    registry.register(ContainerTool::new(Arc::clone(&runner), timeout));
    registry.register(ShellTool::new(filter, runner, timeout));
    registry.register(TroubleshootingTool::new(kb));
    registry
}
