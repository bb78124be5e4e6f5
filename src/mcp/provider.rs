//! 工具提供方：一个长期存活的 MCP 服务连接
//!
//! connect 启动子进程（stdio），完成 initialize 握手并拉取工具目录；目录只在重连时刷新。
//! call 只转发一次、不重试，重试策略由上层决定。

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::{Child, Command};

use crate::config::ProviderConfig;
use crate::core::ToolError;
use crate::mcp::protocol::{
    initialize_params, tools_call_params, tools_list_params, CallToolResult, ToolDescriptor,
    ToolsListResult, METHOD_INITIALIZE, METHOD_INITIALIZED, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST,
};
use crate::mcp::transport::{RpcClient, RpcError};

const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
/// tools/list 分页上限，防止异常服务端无限翻页
const MAX_LIST_PAGES: usize = 50;

/// 启动期连接错误（必选提供方出现时启动失败）
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("failed to spawn provider '{provider}': {source}")]
    Spawn {
        provider: String,
        #[source]
        source: std::io::Error,
    },

    #[error("provider '{provider}' did not complete the handshake within {secs}s")]
    HandshakeTimeout { provider: String, secs: u64 },

    #[error("handshake with provider '{provider}' failed: {source}")]
    Handshake {
        provider: String,
        #[source]
        source: RpcError,
    },

    #[error("provider '{provider}' returned a malformed {method} result: {detail}")]
    Malformed {
        provider: String,
        method: &'static str,
        detail: String,
    },

    #[error("provider '{0}' has no launch configuration and cannot be reconnected")]
    NotReconnectable(String),
}

/// 连接存活状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Connected,
    Disconnected,
}

/// 一个已握手的工具提供方
pub struct ToolProvider {
    name: String,
    config: Option<ProviderConfig>,
    client: RpcClient,
    tools: Vec<ToolDescriptor>,
    server_info: Option<Value>,
    child: Mutex<Option<Child>>,
}

impl ToolProvider {
    /// 按配置启动子进程并握手
    pub async fn connect(config: &ProviderConfig) -> Result<Self, ConnectionError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            // 配置键可能被统一成小写，环境变量名按惯例转大写
            .envs(config.env.iter().map(|(k, v)| (k.to_uppercase(), v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ConnectionError::Spawn {
                provider: config.name.clone(),
                source,
            })?;

        let missing_pipe = |what: &str| ConnectionError::Spawn {
            provider: config.name.clone(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("no {what}")),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let provider = config.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(provider = %provider, "stderr: {}", line);
                }
            });
        }

        let timeout = Duration::from_secs(config.handshake_timeout_secs.max(1));
        let mut provider = Self::attach(config.name.clone(), stdout, stdin, timeout).await?;
        provider.config = Some(config.clone());
        provider.child = Mutex::new(Some(child));
        Ok(provider)
    }

    /// 在已有读写流上握手（不管理进程生命周期）
    pub async fn attach<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        handshake_timeout: Duration,
    ) -> Result<Self, ConnectionError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.into();
        let client = RpcClient::spawn(name.clone(), reader, writer);
        let outcome =
            tokio::time::timeout(handshake_timeout, handshake(&name, &client, handshake_timeout))
                .await;
        let (server_info, tools) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                client.close();
                return Err(e);
            }
            Err(_) => {
                client.close();
                return Err(ConnectionError::HandshakeTimeout {
                    provider: name,
                    secs: handshake_timeout.as_secs(),
                });
            }
        };
        tracing::info!(provider = %name, tools = tools.len(), "MCP provider connected");
        Ok(Self {
            name,
            config: None,
            client,
            tools,
            server_info,
            child: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> Option<&ProviderConfig> {
        self.config.as_ref()
    }

    /// 缓存的工具目录
    pub fn list_tools(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    pub fn liveness(&self) -> Liveness {
        if self.client.is_alive() {
            Liveness::Connected
        } else {
            Liveness::Disconnected
        }
    }

    /// 转发一次工具调用；参数原样透传
    pub async fn call(&self, tool: &str, args: &Value, timeout: Duration) -> Result<String, ToolError> {
        if self.liveness() == Liveness::Disconnected {
            return Err(ToolError::provider_unavailable(format!(
                "provider '{}' is disconnected",
                self.name
            )));
        }
        let raw = self
            .client
            .request(METHOD_TOOLS_CALL, Some(tools_call_params(tool, args)), timeout)
            .await
            .map_err(|e| self.map_rpc_error(tool, e))?;
        let result: CallToolResult = serde_json::from_value(raw).map_err(|e| {
            ToolError::tool_failed(format!("malformed tools/call result from '{}': {}", self.name, e))
        })?;
        let text = result.text();
        if result.is_error {
            return Err(ToolError::tool_failed(text));
        }
        Ok(text)
    }

    fn map_rpc_error(&self, tool: &str, err: RpcError) -> ToolError {
        match err {
            RpcError::Closed | RpcError::Io(_) => ToolError::provider_unavailable(format!(
                "provider '{}' disconnected during '{}': {}",
                self.name, tool, err
            )),
            RpcError::Timeout(d) => {
                ToolError::timeout(format!("'{}' did not answer within {}s", tool, d.as_secs()))
            }
            RpcError::Remote { code, message } => {
                ToolError::tool_failed(format!("provider error {}: {}", code, message))
            }
        }
    }

    /// 断开连接并结束子进程
    pub async fn shutdown(&self) {
        self.client.close();
        let child = self
            .child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(provider = %self.name, error = %e, "kill provider process");
            }
        }
        tracing::info!(provider = %self.name, "MCP provider shut down");
    }
}

async fn handshake(
    name: &str,
    client: &RpcClient,
    timeout: Duration,
) -> Result<(Option<Value>, Vec<ToolDescriptor>), ConnectionError> {
    // 单个请求超时与整体握手超时是同一个预算，统一报告为 HandshakeTimeout
    let rpc_err = |source: RpcError| match source {
        RpcError::Timeout(_) => ConnectionError::HandshakeTimeout {
            provider: name.to_string(),
            secs: timeout.as_secs(),
        },
        source => ConnectionError::Handshake {
            provider: name.to_string(),
            source,
        },
    };

    let init = client
        .request(
            METHOD_INITIALIZE,
            Some(initialize_params(CLIENT_NAME, CLIENT_VERSION)),
            timeout,
        )
        .await
        .map_err(rpc_err)?;
    let server_info = init.get("serverInfo").cloned();
    client
        .notify(METHOD_INITIALIZED, None)
        .await
        .map_err(rpc_err)?;

    let mut tools = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..MAX_LIST_PAGES {
        let raw = client
            .request(METHOD_TOOLS_LIST, tools_list_params(cursor.as_deref()), timeout)
            .await
            .map_err(rpc_err)?;
        let page: ToolsListResult =
            serde_json::from_value(raw).map_err(|e| ConnectionError::Malformed {
                provider: name.to_string(),
                method: METHOD_TOOLS_LIST,
                detail: e.to_string(),
            })?;
        tools.extend(page.tools);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }
    Ok((server_info, tools))
}
