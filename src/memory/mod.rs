//! 消息模型：LLM 上下文消息与请求历史条目

pub mod conversation;

pub use conversation::{HistoryEntry, Message, Role};
