//! 核心层：错误与恢复、会话状态、会话监管、组件构建

pub mod builder;
pub mod error;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{create_llm_from_config, AgentBuilder, AgentComponents};
pub use error::{AgentError, RecoveryAction, ToolError};
pub use recovery::RecoveryEngine;
pub use session_supervisor::SessionSupervisor;
pub use state::{Diagnosis, Session, SessionStatus, ToolCall, ToolOutcome, ToolRecord};
