//! 错误类型：请求级 AgentError、工具调用边界 ToolError，以及恢复动作
//!
//! 约定：只有必选工具提供方启动失败是致命的；ToolError 一律在调用边界转成 Observation 回灌模型。

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::llm::LlmError;
use crate::mcp::ConnectionError;

/// 请求级错误（返回给调用方，而不是回灌给模型）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Provider connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 工具调用失败类别；全部可恢复，以 Observation 形式交给模型自行纠正
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// 调用途中提供方断开或已不可用
    ProviderUnavailable,
    /// 参数不是对象，或缺少 schema 声明的 required 字段
    InvalidArguments,
    /// 单次调用超时
    Timeout,
    /// 提供方返回 isError 或 JSON-RPC error
    ToolFailed,
    /// 模型点名了目录里不存在的工具
    UnknownTool,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorKind::ProviderUnavailable => "provider_unavailable",
            ToolErrorKind::InvalidArguments => "invalid_arguments",
            ToolErrorKind::Timeout => "timeout",
            ToolErrorKind::ToolFailed => "tool_failed",
            ToolErrorKind::UnknownTool => "unknown_tool",
        }
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单次工具调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ProviderUnavailable, message)
    }

    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::InvalidArguments, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Timeout, message)
    }

    pub fn tool_failed(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ToolFailed, message)
    }

    pub fn unknown_tool(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::UnknownTool, message)
    }

    /// 回灌给模型的 Observation 文本
    pub fn to_observation(&self) -> String {
        format!("Error [{}]: {}", self.kind, self.message)
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型重试（如 JSON 格式错误）
    RetryWithPrompt(String),
    /// 终止当前轮次
    Abort,
}
