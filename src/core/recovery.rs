//! 错误恢复引擎
//!
//! 根据 AgentError 类型返回 RecoveryAction，供 ReAct 循环决定是注入纠正提示重试还是终止。

use crate::core::{AgentError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::JsonParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous output was not a valid JSON action: {raw}. \
                When calling tools you must output exactly one JSON object and nothing else, \
                either {{\"tool\": \"<qualified tool name>\", \"args\": {{...}}}} or \
                {{\"thought\": \"...\", \"tool_calls\": [{{\"tool\": \"...\", \"args\": {{...}}}}]}}. \
                If you already have the answer, reply with plain text instead."
            )),
            _ => RecoveryAction::Abort,
        }
    }
}
