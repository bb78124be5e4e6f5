//! 测试用 LLM 客户端（无需 API）
//!
//! - MockLlmClient：不调用工具，直接给出说明性的最终回复，便于本地跑通链路。
//! - ScriptedLlmClient：按顺序返回预置输出，并记录每次收到的完整消息序列。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!(
            "Mock model is active, no telemetry was queried. You asked: {}",
            last_user
        ))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本客户端：每次 complete 弹出一条预置输出；用尽后按配置重复最后一条或返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    repeat_last: Mutex<Option<String>>,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            repeat_last: Mutex::new(None),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 脚本用尽后一直返回该输出（用于测试循环上限）
    pub fn repeating(reply: impl Into<String>) -> Self {
        let client = Self::default();
        *client
            .repeat_last
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(reply.into());
        client
    }

    /// 追加一次失败
    pub fn push_error(&self, err: LlmError) {
        self.replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(err));
    }

    /// 每次调用收到的完整消息序列
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(messages.to_vec());
        let next = self
            .replies
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(reply) => reply,
            None => self
                .repeat_last
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
                .ok_or(LlmError::Exhausted),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}
