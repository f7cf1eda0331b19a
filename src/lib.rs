//! Troubleshooter - 交互式运维排障助手
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与凭据导出
//! - **core**: 会话状态、错误、恢复策略、取消监管、组件构建
//! - **engine**: plan → execute → reflect → approve 状态机、模型适配、输出解析
//! - **gate**: 人工审批闸门（工具调用与计划评审）
//! - **driver**: 会话驱动与终端渲染
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 会话消息
//! - **report**: 一次性服务巡检与结构化报告
//! - **tools**: 排查工具、安全过滤、知识库与执行器

pub mod config;
pub mod core;
pub mod driver;
pub mod engine;
pub mod gate;
pub mod llm;
pub mod memory;
pub mod report;
pub mod tools;

pub use crate::core::{AgentBuilder, AgentError, Session, SessionStatus};
pub use driver::SessionDriver;
pub use engine::Engine;
