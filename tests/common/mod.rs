//! 集成测试公共设施：基于 tokio::io::duplex 的假 MCP 提供方
//!
//! 说同样的换行分帧 JSON-RPC，支持分页、延迟、调用若干次后断开、握手不应答。

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pgpilot::agent::{AgentParts, ObservabilityAgent};
use pgpilot::config::AgentSection;
use pgpilot::llm::ScriptedLlmClient;
use pgpilot::mcp::{ConnectionError, ProviderManager, ToolProvider};
use pgpilot::observability::MemorySink;
use pgpilot::targets::{PresenceSample, ResolveError, Target, TelemetryBackend};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

pub type Handler = Arc<dyn Fn(&str, &Value) -> Result<String, String> + Send + Sync>;

/// 假提供方收到的一次 tools/call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub tool: String,
    pub arguments: Value,
}

#[derive(Clone, Default)]
pub struct FakeHandle {
    pub calls: Arc<Mutex<Vec<RecordedCall>>>,
    pub initialized: Arc<AtomicBool>,
    pub list_requests: Arc<AtomicUsize>,
}

impl FakeHandle {
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

pub struct FakeProvider {
    pub name: String,
    pub tools: Vec<Value>,
    pub handler: Handler,
    pub delay: Duration,
    /// 服务完这么多次调用后，下一次调用直接断开连接
    pub close_after_calls: Option<usize>,
    pub page_size: Option<usize>,
    /// 不应答 initialize（握手超时测试）
    pub silent: bool,
}

impl FakeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            handler: Arc::new(|tool: &str, args: &Value| -> Result<String, String> {
                Ok(format!("{} ok: {}", tool, args))
            }),
            delay: Duration::ZERO,
            close_after_calls: None,
            page_size: None,
            silent: false,
        }
    }

    pub fn tool(mut self, name: &str, description: &str, schema: Value) -> Self {
        self.tools.push(json!({"name": name, "description": description, "inputSchema": schema}));
        self
    }

    pub fn handler(mut self, f: impl Fn(&str, &Value) -> Result<String, String> + Send + Sync + 'static) -> Self {
        self.handler = Arc::new(f);
        self
    }

    pub fn delay(mut self, d: Duration) -> Self {
        self.delay = d;
        self
    }

    pub fn close_after_calls(mut self, n: usize) -> Self {
        self.close_after_calls = Some(n);
        self
    }

    pub fn page_size(mut self, n: usize) -> Self {
        self.page_size = Some(n);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// 启动假服务端并在其上完成握手
    pub async fn attach(self, handshake_timeout: Duration) -> (Result<ToolProvider, ConnectionError>, FakeHandle) {
        let (client, server) = tokio::io::duplex(256 * 1024);
        let handle = FakeHandle::default();
        let name = self.name.clone();
        tokio::spawn(serve(self, server, handle.clone()));
        let (r, w) = tokio::io::split(client);
        (ToolProvider::attach(name, r, w, handshake_timeout).await, handle)
    }

    pub async fn connect(self) -> (ToolProvider, FakeHandle) {
        let (provider, handle) = self.attach(Duration::from_secs(5)).await;
        (provider.expect("fake provider handshake"), handle)
    }
}

async fn serve(fake: FakeProvider, stream: tokio::io::DuplexStream, handle: FakeHandle) {
    let (r, w) = tokio::io::split(stream);
    let writer = Arc::new(tokio::sync::Mutex::new(w));
    let mut lines = BufReader::new(r).lines();
    let fake = Arc::new(fake);
    let served = Arc::new(AtomicUsize::new(0));

    while let Ok(Some(line)) = lines.next_line().await {
        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let id = msg.get("id").cloned();
        let method = msg["method"].as_str().unwrap_or_default().to_string();
        match method.as_str() {
            "initialize" => {
                if fake.silent {
                    continue;
                }
                let result = json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": fake.name, "version": "0.0.1"}
                });
                reply(&writer, id, result).await;
            }
            "notifications/initialized" => handle.initialized.store(true, Ordering::SeqCst),
            "tools/list" => {
                handle.list_requests.fetch_add(1, Ordering::SeqCst);
                let start: usize = msg["params"]["cursor"]
                    .as_str()
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(0);
                let size = fake.page_size.unwrap_or(fake.tools.len().max(1));
                let end = (start + size).min(fake.tools.len());
                let mut result = json!({"tools": fake.tools[start..end].to_vec()});
                if end < fake.tools.len() {
                    result["nextCursor"] = json!(end.to_string());
                }
                reply(&writer, id, result).await;
            }
            "tools/call" => {
                let n = served.fetch_add(1, Ordering::SeqCst);
                if let Some(limit) = fake.close_after_calls {
                    if n >= limit {
                        // 模拟进程退出：停止读写，连接随之关闭
                        break;
                    }
                }
                let tool = msg["params"]["name"].as_str().unwrap_or_default().to_string();
                let arguments = msg["params"]["arguments"].clone();
                handle.calls.lock().unwrap().push(RecordedCall {
                    tool: tool.clone(),
                    arguments: arguments.clone(),
                });
                let fake = fake.clone();
                let writer = writer.clone();
                tokio::spawn(async move {
                    if !fake.delay.is_zero() {
                        tokio::time::sleep(fake.delay).await;
                    }
                    let result = match (fake.handler)(&tool, &arguments) {
                        Ok(text) => json!({"content": [{"type": "text", "text": text}], "isError": false}),
                        Err(text) => json!({"content": [{"type": "text", "text": text}], "isError": true}),
                    };
                    reply(&writer, id, result).await;
                });
            }
            _ => {
                if id.is_some() {
                    let line = json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": {"code": -32601, "message": "Method not found"}
                    });
                    let _ = write_line(&writer, &line).await;
                }
            }
        }
    }
}

async fn reply(
    writer: &Arc<tokio::sync::Mutex<tokio::io::WriteHalf<tokio::io::DuplexStream>>>,
    id: Option<Value>,
    result: Value,
) {
    let line = json!({"jsonrpc": "2.0", "id": id, "result": result});
    let _ = write_line(writer, &line).await;
}

async fn write_line(
    writer: &Arc<tokio::sync::Mutex<tokio::io::WriteHalf<tokio::io::DuplexStream>>>,
    line: &Value,
) -> std::io::Result<()> {
    let mut w = writer.lock().await;
    w.write_all(format!("{}\n", line).as_bytes()).await?;
    w.flush().await
}

/// 带 required `query` 的 PromQL 查询工具 schema
pub fn promql_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": {"type": "string", "description": "PromQL expression"},
            "time": {"type": "string"}
        },
        "required": ["query"]
    })
}

pub fn logsql_schema() -> Value {
    json!({
        "type": "object",
        "properties": {"query": {"type": "string"}, "limit": {"type": "integer"}},
        "required": ["query"]
    })
}

/// 没有实时数据的后端（resolve 只会走配置或 not_found）
pub struct NoLiveData;

#[async_trait]
impl TelemetryBackend for NoLiveData {
    async fn presence(&self) -> Result<Vec<PresenceSample>, ResolveError> {
        Ok(Vec::new())
    }
}

pub struct Harness {
    pub agent: ObservabilityAgent,
    pub llm: Arc<ScriptedLlmClient>,
    pub sink: Arc<MemorySink>,
    pub manager: Arc<ProviderManager>,
}

/// 组装一个带假提供方与脚本模型的 Agent；目标 db-07 的静态 routing key 为 "pg"
pub async fn harness(providers: Vec<ToolProvider>, llm: ScriptedLlmClient, settings: AgentSection) -> Harness {
    let manager = Arc::new(ProviderManager::new());
    for p in providers {
        manager.insert(p).await;
    }
    let llm = Arc::new(llm);
    let sink = Arc::new(MemorySink::new());
    let agent = ObservabilityAgent::new(AgentParts {
        settings,
        targets: vec![
            Target::new("db-07").with_job("pg").with_label("Orders primary"),
            Target::new("analytics").with_instance("analytics-db"),
        ],
        llm: llm.clone(),
        providers: manager.clone(),
        backend: Arc::new(NoLiveData),
        trace_sink: sink.clone(),
    });
    Harness {
        agent,
        llm,
        sink,
        manager,
    }
}
