//! LLM 层：客户端抽象与实现（OpenAI 兼容 / LiteLLM / Mock）

pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

use crate::config::AppConfig;

pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError};

/// 根据配置与环境变量选择 LLM 后端（litellm / openai / mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = cfg.llm.request_timeout_secs;
    match provider.as_str() {
        "mock" => {
            tracing::warn!("LLM provider set to mock, answers will not use telemetry");
            Arc::new(MockLlmClient)
        }
        "openai" => {
            let api_key = cfg
                .llm
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
            tracing::info!(model = %cfg.llm.model, "Using OpenAI LLM");
            Arc::new(
                OpenAiClient::new(cfg.llm.base_url.as_deref(), &cfg.llm.model, api_key.as_deref())
                    .with_request_timeout(timeout),
            )
        }
        other => {
            if other != "litellm" {
                tracing::warn!(provider = %other, "Unknown LLM provider, falling back to litellm");
            }
            let base = cfg
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| "http://localhost:4000".to_string());
            let api_key = cfg
                .llm
                .api_key
                .clone()
                .or_else(|| std::env::var("LITELLM_API_KEY").ok());
            tracing::info!(model = %cfg.llm.model, base_url = %base, "Using LiteLLM proxy");
            Arc::new(
                OpenAiClient::new(Some(&base), &cfg.llm.model, api_key.as_deref())
                    .with_request_timeout(timeout),
            )
        }
    }
}
