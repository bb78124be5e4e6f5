//! 监控目标（数据库）与 routing key 解析
//!
//! 目标列表在启动时从配置载入，之后只读共享。

pub mod prometheus;
pub mod resolver;

use serde::{Deserialize, Serialize};

pub use prometheus::PrometheusBackend;
pub use resolver::{
    PresenceSample, ResolutionResult, ResolutionSource, ResolveError, TargetResolver, TelemetryBackend,
};

/// 一个被监控的数据库
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// 稳定名，请求里用它指代目标
    pub name: String,
    /// 展示名；缺省同 name
    #[serde(default)]
    pub label: Option<String>,
    /// 静态配置的 routing key（Prometheus job）
    #[serde(default)]
    pub job: Option<String>,
    /// 已知实例地址，实时查询时按它匹配 instance 标签
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default = "default_db_type")]
    pub db_type: String,
}

fn default_db_type() -> String {
    "postgresql".to_string()
}

impl Target {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
            job: None,
            instance: None,
            db_type: default_db_type(),
        }
    }

    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    /// 静态 routing key；空字符串视为未配置
    pub fn static_routing_key(&self) -> Option<&str> {
        self.job.as_deref().filter(|j| !j.trim().is_empty())
    }
}

/// 目标列表接口的一项
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub name: String,
    pub label: String,
    pub routing_key: Option<String>,
}

/// 只读目标表（保留配置顺序）
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: Vec<Target>,
}

impl TargetRegistry {
    /// 同名目标只保留第一个
    pub fn new(targets: Vec<Target>) -> Self {
        let mut kept: Vec<Target> = Vec::with_capacity(targets.len());
        for t in targets {
            if kept.iter().any(|k| k.name == t.name) {
                tracing::warn!(target_name = %t.name, "duplicate target in configuration ignored");
                continue;
            }
            kept.push(t);
        }
        Self { targets: kept }
    }

    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.name == name)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter()
    }

    pub fn summaries(&self) -> Vec<TargetSummary> {
        self.targets
            .iter()
            .map(|t| TargetSummary {
                name: t.name.clone(),
                label: t.display_label().to_string(),
                routing_key: t.static_routing_key().map(str::to_string),
            })
            .collect()
    }
}
