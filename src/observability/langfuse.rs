//! Langfuse 上报
//!
//! record 只入缓冲，flush 时批量 POST `{host}/api/public/ingestion`（basic auth）。
//! 模型调用 → generation-create，工具调用 → span-create，路由 / 结束 → event-create；
//! 每批都为涉及的 trace 附带一条 trace-create（Langfuse 按 id upsert）。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::observability::trace::{TraceEvent, TraceEventKind, TraceSink};

pub struct LangfuseSink {
    endpoint: String,
    public_key: String,
    secret_key: String,
    tags: Vec<String>,
    http: reqwest::Client,
    buffer: Mutex<Vec<TraceEvent>>,
}

impl LangfuseSink {
    pub fn new(host: &str, public_key: String, secret_key: String, tags: Vec<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            endpoint: format!("{}/api/public/ingestion", host.trim_end_matches('/')),
            public_key,
            secret_key,
            tags,
            http,
            buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 把一批事件转成 ingestion 请求体
    pub fn build_batch(&self, events: &[TraceEvent]) -> Value {
        let mut batch = Vec::new();
        let mut seen: Vec<&str> = Vec::new();
        for event in events {
            if !seen.contains(&event.trace_id.as_str()) {
                seen.push(&event.trace_id);
                batch.push(self.trace_create(event, events));
            }
            batch.push(observation(event));
        }
        json!({ "batch": batch })
    }

    fn trace_create(&self, first: &TraceEvent, events: &[TraceEvent]) -> Value {
        let input = events
            .iter()
            .filter(|e| e.trace_id == first.trace_id)
            .find_map(|e| match &e.kind {
                TraceEventKind::ModelCall { input, .. } => input.last().map(|m| m.content.clone()),
                _ => None,
            });
        let output = events
            .iter()
            .filter(|e| e.trace_id == first.trace_id)
            .find_map(|e| match &e.kind {
                TraceEventKind::TurnFinished { text, .. } => Some(text.clone()),
                _ => None,
            });
        let mut body = json!({
            "id": first.trace_id,
            "name": "postgres-observability-chat",
            "sessionId": first.conversation_id,
            "tags": self.tags,
            "metadata": {
                "database": first.target,
                "db_type": first.db_type,
            },
        });
        if let Some(input) = input {
            body["input"] = Value::String(input);
        }
        if let Some(output) = output {
            body["output"] = Value::String(output);
        }
        json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "timestamp": first.timestamp.to_rfc3339(),
            "type": "trace-create",
            "body": body,
        })
    }

    async fn send(&self, events: Vec<TraceEvent>) -> Result<(), reqwest::Error> {
        let body = self.build_batch(&events);
        self.http
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn observation(event: &TraceEvent) -> Value {
    let end = event.timestamp;
    let (kind, body) = match &event.kind {
        TraceEventKind::ModelCall {
            iteration,
            model,
            input,
            output,
            error,
            latency_ms,
        } => (
            "generation-create",
            json!({
                "name": format!("reasoning-{}", iteration),
                "model": model,
                "input": input,
                "output": output,
                "level": level(error.is_some()),
                "statusMessage": error,
                "startTime": start_of(end, *latency_ms),
                "endTime": end.to_rfc3339(),
            }),
        ),
        TraceEventKind::ToolCall {
            batch,
            seq,
            tool,
            provider,
            arguments,
            result,
            error,
            latency_ms,
        } => (
            "span-create",
            json!({
                "name": tool,
                "input": arguments,
                "output": result,
                "level": level(error.is_some()),
                "statusMessage": error.as_ref().map(|e| e.to_string()),
                "metadata": {"provider": provider, "batch": batch, "seq": seq},
                "startTime": start_of(end, *latency_ms),
                "endTime": end.to_rfc3339(),
            }),
        ),
        TraceEventKind::Routing { decision, detail } => (
            "event-create",
            json!({"name": decision, "metadata": detail, "startTime": end.to_rfc3339()}),
        ),
        TraceEventKind::TurnFinished {
            phase,
            iterations,
            tool_calls,
            text,
        } => (
            "event-create",
            json!({
                "name": "turn-finished",
                "output": text,
                "metadata": {"phase": phase, "iterations": iterations, "tool_calls": tool_calls},
                "startTime": end.to_rfc3339(),
            }),
        ),
    };
    let mut body = body;
    body["id"] = Value::String(event.id.clone());
    body["traceId"] = Value::String(event.trace_id.clone());
    json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "timestamp": end.to_rfc3339(),
        "type": kind,
        "body": body,
    })
}

fn level(failed: bool) -> &'static str {
    if failed {
        "ERROR"
    } else {
        "DEFAULT"
    }
}

fn start_of(end: chrono::DateTime<chrono::Utc>, latency_ms: u64) -> String {
    (end - chrono::Duration::milliseconds(latency_ms as i64)).to_rfc3339()
}

#[async_trait]
impl TraceSink for LangfuseSink {
    fn record(&self, event: TraceEvent) {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }

    async fn flush(&self) {
        let events = std::mem::take(&mut *self.buffer.lock().unwrap_or_else(|e| e.into_inner()));
        if events.is_empty() {
            return;
        }
        let count = events.len();
        match self.send(events).await {
            Ok(()) => tracing::debug!(events = count, "trace batch sent to Langfuse"),
            Err(e) => tracing::warn!(error = %e, events = count, "failed to send trace batch to Langfuse"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Message;
    use crate::observability::trace::{TraceContext, TraceEmitter};
    use std::sync::Arc;

    #[test]
    fn test_batch_shape() {
        let sink = Arc::new(LangfuseSink::new(
            "https://langfuse.example/",
            "pk".into(),
            "sk".into(),
            vec!["postgres-observability".into()],
        ));
        let emitter = TraceEmitter::new(sink.clone(), TraceContext::new("conv", "db-07", Some("postgresql".into())));
        emitter.emit(TraceEventKind::ModelCall {
            iteration: 1,
            model: "gpt-4o".into(),
            input: vec![Message::system("s"), Message::user("connections?")],
            output: Some("{}".into()),
            error: None,
            latency_ms: 12,
        });
        emitter.routing("target_scope", json!({"routingKey": "pg"}));
        assert_eq!(sink.pending(), 2);
        assert_eq!(sink.endpoint, "https://langfuse.example/api/public/ingestion");

        let events = std::mem::take(&mut *sink.buffer.lock().unwrap());
        let body = sink.build_batch(&events);
        let batch = body["batch"].as_array().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0]["type"], "trace-create");
        assert_eq!(batch[0]["body"]["sessionId"], "conv");
        assert_eq!(batch[0]["body"]["input"], "connections?");
        assert_eq!(batch[1]["type"], "generation-create");
        assert_eq!(batch[1]["body"]["traceId"], emitter.trace_id());
        assert_eq!(batch[2]["type"], "event-create");
    }
}
