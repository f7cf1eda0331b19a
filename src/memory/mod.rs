//! 记忆层：排障会话的对话记录

pub mod conversation;

pub use conversation::{last_assistant, Message, Role};
