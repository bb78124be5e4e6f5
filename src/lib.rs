//! pgpilot - PostgreSQL 可观测性 Agent 编排核心
//!
//! 模块划分：
//! - **agent**: 无头 Agent 运行时（chat / 目标列表 / 解析 / 健康检查）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、单轮状态机、恢复策略、工具并发池
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / LiteLLM / Mock）
//! - **mcp**: MCP 工具提供方（JSON-RPC over stdio）与会话管理器
//! - **memory**: 对话消息与历史条目
//! - **observability**: 日志初始化与追踪事件（日志 / 内存 / Langfuse）
//! - **react**: system directive、Planner、ReAct 主循环
//! - **session**: 按会话 id 串行化的历史
//! - **targets**: 监控目标与 routing key 解析链
//! - **tools**: 工具目录、参数校验、调用器与调用记录

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod memory;
pub mod observability;
pub mod react;
pub mod session;
pub mod targets;
pub mod tools;

pub use agent::{AgentParts, ChatRequest, ChatResponse, ObservabilityAgent};
