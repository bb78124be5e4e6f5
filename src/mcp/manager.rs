//! 提供方会话管理器
//!
//! 显式持有所有提供方连接（由调用方注入、无进程级单例）：启动时全部建立，必选提供方失败则启动失败；
//! 请求中途不会自动重连，reconnect 交给运维 / 健康检查路径在请求之间调用。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::config::ProviderConfig;
use crate::core::ToolError;
use crate::mcp::protocol::ToolDescriptor;
use crate::mcp::provider::{ConnectionError, Liveness, ToolProvider};
use crate::tools::ToolCatalog;

/// 单个提供方的健康状态
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub name: String,
    pub liveness: Liveness,
    pub tools: usize,
}

/// 所有工具提供方连接的唯一所有者
#[derive(Default)]
pub struct ProviderManager {
    providers: RwLock<BTreeMap<String, Arc<ToolProvider>>>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 并发连接所有配置的提供方；必选提供方任一失败即返回错误，可选提供方失败只记录告警
    pub async fn connect_all(configs: &[ProviderConfig]) -> Result<Self, ConnectionError> {
        let attempts = futures_util::future::join_all(
            configs.iter().map(|cfg| async move { (cfg, ToolProvider::connect(cfg).await) }),
        )
        .await;

        let manager = Self::new();
        let mut fatal = None;
        for (cfg, result) in attempts {
            match result {
                Ok(provider) => manager.insert(provider).await,
                Err(e) if cfg.mandatory => {
                    tracing::error!(provider = %cfg.name, error = %e, "mandatory provider failed to connect");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    tracing::warn!(provider = %cfg.name, error = %e, "optional provider unavailable, continuing without it");
                }
            }
        }
        if let Some(e) = fatal {
            manager.shutdown().await;
            return Err(e);
        }
        Ok(manager)
    }

    /// 注册一个已握手的提供方；同名旧连接被关闭，其在途调用以 ProviderUnavailable 结束
    pub async fn insert(&self, provider: ToolProvider) {
        let name = provider.name().to_string();
        let old = self
            .providers
            .write()
            .await
            .insert(name, Arc::new(provider));
        if let Some(old) = old {
            old.shutdown().await;
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<ToolProvider>> {
        self.providers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        self.providers.read().await.keys().cloned().collect()
    }

    /// 返回缓存的工具目录
    pub async fn list_tools(&self, provider: &str) -> Option<Vec<ToolDescriptor>> {
        self.get(provider).await.map(|p| p.list_tools().to_vec())
    }

    /// 转发一次调用；未注册的提供方视为不可用
    pub async fn call(
        &self,
        provider: &str,
        tool: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<String, ToolError> {
        let Some(p) = self.get(provider).await else {
            return Err(ToolError::provider_unavailable(format!(
                "provider '{}' is not connected",
                provider
            )));
        };
        p.call(tool, args, timeout).await
    }

    /// 用原配置重新启动并握手，目录随之刷新；应在请求之间调用，旧连接上的在途调用会失败
    pub async fn reconnect(&self, name: &str) -> Result<(), ConnectionError> {
        let config = match self.get(name).await {
            Some(p) => p.config().cloned(),
            None => None,
        }
        .ok_or_else(|| ConnectionError::NotReconnectable(name.to_string()))?;
        tracing::info!(provider = %name, "reconnecting provider");
        let fresh = ToolProvider::connect(&config).await?;
        self.insert(fresh).await;
        Ok(())
    }

    pub async fn health(&self) -> Vec<ProviderHealth> {
        self.providers
            .read()
            .await
            .values()
            .map(|p| ProviderHealth {
                name: p.name().to_string(),
                liveness: p.liveness(),
                tools: p.list_tools().len(),
            })
            .collect()
    }

    /// 当前所有提供方的工具目录快照（限定名 → 描述）
    pub async fn catalog(&self) -> ToolCatalog {
        let providers = self.providers.read().await;
        let mut catalog = ToolCatalog::new();
        for (name, p) in providers.iter() {
            catalog.insert_provider(name, p.list_tools());
        }
        catalog
    }

    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut providers = self.providers.write().await;
            std::mem::take(&mut *providers).into_values().collect()
        };
        for p in drained {
            p.shutdown().await;
        }
    }
}
