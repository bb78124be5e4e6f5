//! 对话消息与历史条目
//!
//! Message 是喂给 LLM 的上下文单元；HistoryEntry 是调用方每次请求重传的 `{role, text}` 历史。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// 工具观察：以 user 消息回灌，并标注来源工具
    pub fn observation(tool: &str, text: &str) -> Self {
        Self::user(format!("Observation from {}: {}", tool, text))
    }
}

/// 请求里携带的一条历史（只接受 user / assistant）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    #[serde(alias = "content")]
    pub text: String,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    /// 转为 LLM 消息；system 条目不允许由调用方注入，直接忽略
    pub fn to_message(&self) -> Option<Message> {
        match self.role {
            Role::User => Some(Message::user(self.text.clone())),
            Role::Assistant => Some(Message::assistant(self.text.clone())),
            Role::System => None,
        }
    }
}
