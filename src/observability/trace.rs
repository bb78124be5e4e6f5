//! 追踪事件
//!
//! 每次模型调用、每次工具调用、每个路由决定各一条事件，携带会话 id 与目标名；
//! 参数与结果都是完整文本（不截断）。一轮对话共享一个 trace_id。

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::core::{ToolError, TurnPhase};
use crate::memory::Message;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceEventKind {
    ModelCall {
        iteration: usize,
        model: String,
        input: Vec<Message>,
        output: Option<String>,
        error: Option<String>,
        latency_ms: u64,
    },
    ToolCall {
        batch: usize,
        seq: usize,
        tool: String,
        provider: String,
        arguments: Value,
        result: Option<String>,
        error: Option<ToolError>,
        latency_ms: u64,
    },
    /// 路由决定：目标 routing key、未知工具等
    Routing {
        decision: String,
        detail: Value,
    },
    TurnFinished {
        phase: TurnPhase,
        iterations: usize,
        tool_calls: usize,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub id: String,
    pub trace_id: String,
    pub conversation_id: String,
    pub target: String,
    pub db_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TraceEventKind,
}

/// 外部追踪收集端
#[async_trait]
pub trait TraceSink: Send + Sync {
    fn record(&self, event: TraceEvent);

    /// 把缓冲的事件送出；默认无缓冲
    async fn flush(&self) {}
}

/// 写入结构化日志
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl TraceSink for LogSink {
    fn record(&self, event: TraceEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => tracing::info!(trace = %line, "trace_event"),
            Err(e) => tracing::warn!(error = %e, "failed to serialize trace event"),
        }
    }
}

/// 保存在内存里，测试与调试用
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn events_for(&self, trace_id: &str) -> Vec<TraceEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.trace_id == trace_id)
            .collect()
    }
}

#[async_trait]
impl TraceSink for MemorySink {
    fn record(&self, event: TraceEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

/// 一轮对话的关联信息
#[derive(Debug, Clone, PartialEq)]
pub struct TraceContext {
    pub trace_id: String,
    pub conversation_id: String,
    pub target: String,
    pub db_type: Option<String>,
}

impl TraceContext {
    pub fn new(conversation_id: impl Into<String>, target: impl Into<String>, db_type: Option<String>) -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            target: target.into(),
            db_type,
        }
    }
}

/// 给事件补上关联信息后交给 sink
#[derive(Clone)]
pub struct TraceEmitter {
    sink: Arc<dyn TraceSink>,
    ctx: TraceContext,
}

impl TraceEmitter {
    pub fn new(sink: Arc<dyn TraceSink>, ctx: TraceContext) -> Self {
        Self { sink, ctx }
    }

    pub fn context(&self) -> &TraceContext {
        &self.ctx
    }

    pub fn trace_id(&self) -> &str {
        &self.ctx.trace_id
    }

    pub fn emit(&self, kind: TraceEventKind) {
        self.sink.record(TraceEvent {
            id: uuid::Uuid::new_v4().to_string(),
            trace_id: self.ctx.trace_id.clone(),
            conversation_id: self.ctx.conversation_id.clone(),
            target: self.ctx.target.clone(),
            db_type: self.ctx.db_type.clone(),
            timestamp: Utc::now(),
            kind,
        });
    }

    pub fn routing(&self, decision: &str, detail: Value) {
        self.emit(TraceEventKind::Routing {
            decision: decision.to_string(),
            detail,
        });
    }

    pub async fn flush(&self) {
        self.sink.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emitter_stamps_context() {
        let sink = Arc::new(MemorySink::new());
        let emitter = TraceEmitter::new(
            sink.clone(),
            TraceContext::new("conv-1", "db-07", Some("postgresql".into())),
        );
        emitter.routing("target_scope", json!({"routingKey": "pg"}));
        emitter.routing("unknown_tool", json!({"tool": "nope"}));

        let events = sink.events_for(emitter.trace_id());
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.conversation_id == "conv-1" && e.target == "db-07"));
        assert_ne!(events[0].id, events[1].id);
    }

    #[test]
    fn test_event_serialization_is_flat() {
        let sink = Arc::new(MemorySink::new());
        let emitter = TraceEmitter::new(sink.clone(), TraceContext::new("c", "t", None));
        emitter.emit(TraceEventKind::ToolCall {
            batch: 1,
            seq: 0,
            tool: "prometheus__execute_query".into(),
            provider: "prometheus".into(),
            arguments: json!({"query": "pg_up"}),
            result: Some("1".into()),
            error: None,
            latency_ms: 3,
        });
        let v = serde_json::to_value(&sink.events()[0]).unwrap();
        assert_eq!(v["type"], "tool_call");
        assert_eq!(v["conversationId"], "c");
        assert_eq!(v["arguments"]["query"], "pg_up");
    }
}
