//! 可观测性 Agent 运行时
//!
//! 供外部 API 层调用的无界面入口：持有提供方管理器、目标表、会话表与追踪 sink，
//! chat 对单条用户消息跑一轮 ReAct 并返回最终回复与工具调用记录。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::{AgentSection, AppConfig};
use crate::core::{AgentError, RecoveryEngine, TaskScheduler, TurnPhase};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::mcp::{ProviderHealth, ProviderManager};
use crate::memory::HistoryEntry;
use crate::observability::{self, TraceContext, TraceEmitter, TraceSink};
use crate::react::{build_system_directive, LoopSettings, Planner, ReactSession, TurnRequest, TurnTarget};
use crate::session::SessionStore;
use crate::targets::{
    PrometheusBackend, ResolutionResult, Target, TargetRegistry, TargetResolver, TargetSummary,
    TelemetryBackend,
};
use crate::tools::{ToolCallRecord, ToolCatalog, ToolInvoker};

/// 入站聊天请求
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub target: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl ChatRequest {
    pub fn new(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target: target.into(),
            conversation_id: None,
            history: Vec::new(),
        }
    }

    pub fn with_conversation(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEntry>) -> Self {
        self.history = history;
        self
    }
}

/// 聊天响应：text 永远非空；partial 表示本轮被中止
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub text: String,
    pub conversation_id: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub partial: bool,
    pub phase: TurnPhase,
    pub iterations: usize,
    pub routing: ResolutionResult,
}

/// 组装 Agent 所需的依赖（全部由调用方注入）
pub struct AgentParts {
    pub settings: AgentSection,
    pub targets: Vec<Target>,
    pub llm: Arc<dyn LlmClient>,
    pub providers: Arc<ProviderManager>,
    pub backend: Arc<dyn TelemetryBackend>,
    pub trace_sink: Arc<dyn TraceSink>,
}

pub struct ObservabilityAgent {
    planner: Planner,
    invoker: ToolInvoker,
    recovery: RecoveryEngine,
    scheduler: TaskScheduler,
    loop_settings: LoopSettings,
    providers: Arc<ProviderManager>,
    targets: TargetRegistry,
    resolver: TargetResolver<Arc<dyn TelemetryBackend>>,
    sessions: SessionStore,
    trace_sink: Arc<dyn TraceSink>,
    cancel: CancellationToken,
}

impl ObservabilityAgent {
    pub fn new(parts: AgentParts) -> Self {
        let s = &parts.settings;
        Self {
            planner: Planner::new(parts.llm),
            invoker: ToolInvoker::new(parts.providers.clone(), s.tool_timeout_secs, s.result_preview_chars),
            recovery: RecoveryEngine::new(),
            scheduler: TaskScheduler::new(s.max_concurrent_tools),
            loop_settings: LoopSettings {
                max_iterations: s.max_iterations,
                turn_deadline: Duration::from_secs(s.turn_deadline_secs.max(1)),
            },
            providers: parts.providers,
            targets: TargetRegistry::new(parts.targets),
            resolver: TargetResolver::new(parts.backend),
            sessions: SessionStore::with_limits(Duration::from_secs(s.session_idle_secs), s.max_sessions),
            trace_sink: parts.trace_sink,
            cancel: CancellationToken::new(),
        }
    }

    /// 按配置启动：所有提供方连好之后才返回，必选提供方失败即报错
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let providers = ProviderManager::connect_all(&cfg.providers).await?;
        Ok(Self::new(AgentParts {
            settings: cfg.agent.clone(),
            targets: cfg.targets.clone(),
            llm: create_llm_from_config(cfg),
            providers: Arc::new(providers),
            backend: Arc::new(PrometheusBackend::from_config(&cfg.prometheus)),
            trace_sink: observability::sink_from_config(&cfg.trace),
        }))
    }

    pub fn list_targets(&self) -> Vec<TargetSummary> {
        self.targets.summaries()
    }

    pub async fn resolve_target(&self, name: &str) -> Result<ResolutionResult, AgentError> {
        let target = self
            .targets
            .get(name)
            .ok_or_else(|| AgentError::UnknownTarget(name.to_string()))?;
        Ok(self.resolver.resolve(target).await)
    }

    pub async fn catalog(&self) -> ToolCatalog {
        self.providers.catalog().await
    }

    pub async fn health(&self) -> Vec<ProviderHealth> {
        self.providers.health().await
    }

    /// 请求之间由运维 / 健康检查路径调用
    pub async fn reconnect_provider(&self, name: &str) -> Result<(), AgentError> {
        if self.providers.get(name).await.is_none() {
            return Err(AgentError::UnknownProvider(name.to_string()));
        }
        self.providers.reconnect(name).await?;
        Ok(())
    }

    /// 根取消令牌；取消后所有在途轮次进入 Aborted
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.providers.shutdown().await;
        self.trace_sink.flush().await;
    }

    /// 跑一轮对话；同一 conversation id 的请求串行执行
    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, AgentError> {
        let message = req.message.trim();
        if message.is_empty() {
            return Err(AgentError::EmptyMessage);
        }
        let target = self
            .targets
            .get(&req.target)
            .ok_or_else(|| AgentError::UnknownTarget(req.target.clone()))?;
        let conversation_id = req
            .conversation_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut session = self.sessions.acquire(&conversation_id).await;
        session.adopt_history(&req.history);

        let trace = TraceEmitter::new(
            self.trace_sink.clone(),
            TraceContext::new(&conversation_id, &target.name, Some(target.db_type.clone())),
        );
        let routing = self.resolver.resolve(target).await;
        trace.routing(
            "target_scope",
            serde_json::to_value(&routing).unwrap_or(serde_json::Value::Null),
        );

        let catalog = self.providers.catalog().await;
        let directive = build_system_directive(
            &TurnTarget {
                name: target.name.clone(),
                label: target.display_label().to_string(),
                db_type: target.db_type.clone(),
                routing_key: routing.routing_key.clone(),
            },
            &catalog,
        );
        tracing::info!(
            conversation_id = %conversation_id,
            target_name = %target.name,
            routing_key = ?routing.routing_key,
            tools = catalog.len(),
            "chat turn started"
        );

        let react = ReactSession::new(
            &self.planner,
            &self.invoker,
            &self.recovery,
            &self.scheduler,
            self.cancel.child_token(),
        )
        .with_settings(self.loop_settings);
        let outcome = react
            .run_turn(
                TurnRequest {
                    directive,
                    history: &session.history,
                    message,
                    catalog: &catalog,
                },
                &trace,
            )
            .await;

        session.record_turn(message, &outcome.text);
        drop(session);
        self.sessions.evict_idle().await;
        trace.flush().await;

        let (prompt_tokens, completion_tokens, total_tokens) = self.planner.token_usage();
        tracing::info!(
            conversation_id = %conversation_id,
            phase = ?outcome.phase,
            iterations = outcome.iterations,
            tool_calls = outcome.records.len(),
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "chat turn finished"
        );
        Ok(ChatResponse {
            partial: outcome.is_partial(),
            text: outcome.text,
            conversation_id,
            tool_calls: outcome.records,
            phase: outcome.phase,
            iterations: outcome.iterations,
            routing,
        })
    }

    /// 当前保留的会话数
    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    /// 会话历史快照（有请求在途时返回 None）
    pub async fn session_history(&self, conversation_id: &str) -> Option<Vec<HistoryEntry>> {
        self.sessions.snapshot(conversation_id).await
    }
}
