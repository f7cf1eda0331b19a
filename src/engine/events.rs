//! 引擎过程事件：供 Driver 渲染进度（状态转移、计划、工具提议与结果、反思、诊断）

use serde::Serialize;

use crate::core::{Diagnosis, SessionStatus, ToolCall, ToolOutcome};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Transition {
        from: SessionStatus,
        to: SessionStatus,
    },
    PlanReady { steps: Vec<String> },
    ToolProposed { call: ToolCall },
    ToolFinished {
        call: ToolCall,
        outcome: ToolOutcome,
    },
    Reflection { text: String },
    Diagnosis { diagnosis: Diagnosis },
}
