//! routing key 解析链
//!
//! 1. 配置里有 job → source=config，不发实时查询
//! 2. 查询存活信号（pg_up），instance 标签包含目标实例地址（忽略大小写）且恰好一个 (job, instance) 匹配 → source=live-query
//! 3. 否则 → routing key 为 null，source=not_found；零个、多个匹配或后端出错都落到这里

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::targets::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionSource {
    #[serde(rename = "config")]
    Config,
    #[serde(rename = "live-query")]
    LiveQuery,
    #[serde(rename = "not_found")]
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub name: String,
    pub routing_key: Option<String>,
    pub instance: Option<String>,
    pub source: ResolutionSource,
}

impl ResolutionResult {
    fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            routing_key: None,
            instance: None,
            source: ResolutionSource::NotFound,
        }
    }
}

/// 存活信号的一条样本（只关心标签）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSample {
    pub job: Option<String>,
    pub instance: Option<String>,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("telemetry backend request failed: {0}")]
    Request(String),

    #[error("telemetry backend returned status '{0}'")]
    Status(String),
}

/// 实时查询后端
#[async_trait]
pub trait TelemetryBackend: Send + Sync {
    async fn presence(&self) -> Result<Vec<PresenceSample>, ResolveError>;
}

#[async_trait]
impl<T: TelemetryBackend + ?Sized> TelemetryBackend for Arc<T> {
    async fn presence(&self) -> Result<Vec<PresenceSample>, ResolveError> {
        (**self).presence().await
    }
}

pub struct TargetResolver<B> {
    backend: B,
}

impl<B: TelemetryBackend> TargetResolver<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn resolve(&self, target: &Target) -> ResolutionResult {
        if let Some(job) = target.static_routing_key() {
            tracing::debug!(target_name = %target.name, job, "routing key from config");
            return ResolutionResult {
                name: target.name.clone(),
                routing_key: Some(job.to_string()),
                instance: target.instance.clone(),
                source: ResolutionSource::Config,
            };
        }

        let samples = match self.backend.presence().await {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(target_name = %target.name, error = %e, "live routing key lookup failed");
                return ResolutionResult::not_found(&target.name);
            }
        };

        let needle = target
            .instance
            .as_deref()
            .unwrap_or(&target.name)
            .to_lowercase();
        let mut matches: Vec<(String, String)> = Vec::new();
        for sample in samples {
            let (Some(job), Some(instance)) = (sample.job, sample.instance) else {
                continue;
            };
            if job.is_empty() || !instance.to_lowercase().contains(&needle) {
                continue;
            }
            if !matches.iter().any(|(j, i)| *j == job && *i == instance) {
                matches.push((job, instance));
            }
        }

        match matches.len() {
            1 => {
                let (job, instance) = matches.remove(0);
                tracing::info!(target_name = %target.name, job = %job, instance = %instance, "routing key resolved from live query");
                ResolutionResult {
                    name: target.name.clone(),
                    routing_key: Some(job),
                    instance: Some(instance),
                    source: ResolutionSource::LiveQuery,
                }
            }
            0 => {
                tracing::info!(target_name = %target.name, "no live match for target");
                ResolutionResult::not_found(&target.name)
            }
            n => {
                tracing::warn!(target_name = %target.name, matches = n, "ambiguous live matches, leaving target unresolved");
                ResolutionResult::not_found(&target.name)
            }
        }
    }
}
