//! 编排层：状态机、模型适配、输出解析、阶段提示词与过程事件

pub mod events;
pub mod machine;
pub mod model;
pub mod parser;
pub mod prompts;

pub use events::EngineEvent;
pub use machine::{Engine, EngineLimits, DEGENERATE_STEP};
pub use model::ModelAdapter;
pub use parser::{HeuristicParser, ResponseParser};
pub use prompts::Prompts;
