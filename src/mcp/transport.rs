//! 换行分帧的 JSON-RPC 传输
//!
//! 写端由 Mutex 串行化，读端是一个后台任务：按 id 把响应投递给对应 oneshot。
//! 多个请求可以同时在途，响应乱序到达也不会串话。读端 EOF 或出错时，所有在途请求立即失败。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::mcp::protocol::{Incoming, IncomingMessage, JsonRpcNotification, JsonRpcRequest};

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("connection closed")]
    Closed,

    #[error("io error: {0}")]
    Io(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

type Waiter = oneshot::Sender<Result<Value, RpcError>>;
type PendingMap = Arc<Mutex<HashMap<u64, Waiter>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// 请求 future 被丢弃（超时、整轮取消）时清理在途表
struct PendingGuard {
    id: u64,
    pending: PendingMap,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.id);
    }
}

fn lock(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<u64, Waiter>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// 一个提供方连接上的 JSON-RPC 客户端
pub struct RpcClient {
    peer: String,
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
}

impl RpcClient {
    /// 基于任意读写流启动客户端（子进程 stdio 或测试用 duplex 管道）
    pub fn spawn<R, W>(peer: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = peer.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));
        let reader_task = tokio::spawn(read_loop(
            peer.clone(),
            BufReader::new(reader),
            pending.clone(),
            alive.clone(),
        ));
        Self {
            peer,
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            reader_task,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.pending).len()
    }

    /// 发送请求并等待对应 id 的响应
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: self.pending.clone(),
        };
        // 读端先置 alive=false 再清空在途表，这里插入后再检查即可覆盖竞态
        if !self.is_alive() {
            return Err(RpcError::Closed);
        }

        let line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| RpcError::Io(e.to_string()))?;
        self.write_line(&line).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Closed),
            Err(_) => {
                tracing::warn!(peer = %self.peer, method, id, "request timed out");
                Err(RpcError::Timeout(timeout))
            }
        }
    }

    /// 发送通知（不等待响应）
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        if !self.is_alive() {
            return Err(RpcError::Closed);
        }
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| RpcError::Io(e.to_string()))?;
        self.write_line(&line).await
    }

    async fn write_line(&self, line: &str) -> Result<(), RpcError> {
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            // Broken pipe：标记连接失效，后续调用直接失败
            self.alive.store(false, Ordering::SeqCst);
            return Err(RpcError::Io(e.to_string()));
        }
        Ok(())
    }

    /// 关闭连接：停止读端并让所有在途请求失败
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.reader_task.abort();
        fail_all(&self.pending);
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

fn fail_all(pending: &PendingMap) {
    for (_, waiter) in lock(pending).drain() {
        let _ = waiter.send(Err(RpcError::Closed));
    }
}

async fn read_loop<R>(peer: String, mut reader: BufReader<R>, pending: PendingMap, alive: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = String::new();
    loop {
        buf.clear();
        match reader.read_line(&mut buf).await {
            Ok(0) => {
                tracing::warn!(peer = %peer, "provider closed its output (EOF)");
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "provider read error");
                break;
            }
            Ok(_) => {
                let trimmed = buf.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let msg: IncomingMessage = match serde_json::from_str(trimmed) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!(peer = %peer, error = %e, "ignoring non JSON-RPC line");
                        continue;
                    }
                };
                match msg.classify() {
                    Incoming::Response { id, outcome } => {
                        let waiter = lock(&pending).remove(&id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(outcome.map_err(|e| RpcError::Remote {
                                    code: e.code,
                                    message: e.message,
                                }));
                            }
                            None => {
                                tracing::warn!(peer = %peer, id, "response for unknown request id")
                            }
                        }
                    }
                    Incoming::Notification { method } => {
                        tracing::debug!(peer = %peer, method = %method, "provider notification");
                    }
                    Incoming::Request { method } => {
                        tracing::warn!(peer = %peer, method = %method, "unexpected request from provider");
                    }
                    Incoming::Unrecognized => {
                        tracing::debug!(peer = %peer, line = %trimmed, "unrecognized message");
                    }
                }
            }
        }
    }
    alive.store(false, Ordering::SeqCst);
    fail_all(&pending);
}
