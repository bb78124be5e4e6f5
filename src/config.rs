//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PGPILOT__*` 覆盖（双下划线表示嵌套，如 `PGPILOT__LLM__MODEL=gpt-4o`）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::targets::Target;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    /// [[providers]]：MCP 工具提供方进程
    pub providers: Vec<ProviderConfig>,
    pub prometheus: PrometheusSection,
    /// [[targets]]：可选监控目标（数据库）
    pub targets: Vec<Target>,
    pub trace: TraceSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

fn default_app_name() -> String {
    "pgpilot".to_string()
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：litellm / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_provider() -> String {
    "litellm".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

/// [agent] 段：ReAct 循环上限与工具调用约束
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 单轮最多发起的模型调用次数
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 整轮外层 deadline（秒）
    #[serde(default = "default_turn_deadline")]
    pub turn_deadline_secs: u64,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 写入响应与追踪预览的结果字符上限
    #[serde(default = "default_result_preview_chars")]
    pub result_preview_chars: usize,
    #[serde(default = "default_max_concurrent_tools")]
    pub max_concurrent_tools: usize,
    /// 会话空闲多久后回收（秒）
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// 进程内最多保留的会话数
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            turn_deadline_secs: default_turn_deadline(),
            tool_timeout_secs: default_tool_timeout_secs(),
            result_preview_chars: default_result_preview_chars(),
            max_concurrent_tools: default_max_concurrent_tools(),
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_max_iterations() -> usize {
    8
}

fn default_turn_deadline() -> u64 {
    180
}

fn default_tool_timeout_secs() -> u64 {
    60
}

fn default_result_preview_chars() -> usize {
    500
}

fn default_max_concurrent_tools() -> usize {
    4
}

fn default_session_idle_secs() -> u64 {
    1800
}

fn default_max_sessions() -> usize {
    1024
}

/// [[providers]] 条目：通过 stdio 启动的 MCP 服务进程
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// 提供方名，也是工具限定名前缀（如 prometheus__execute_query）
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// 必选提供方连接失败时启动直接失败
    #[serde(default = "default_mandatory")]
    pub mandatory: bool,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_mandatory() -> bool {
    true
}

fn default_handshake_timeout() -> u64 {
    30
}

/// [prometheus] 段：目标解析时的实时查询后端
#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusSection {
    #[serde(default = "default_prometheus_url")]
    pub url: String,
    #[serde(default = "default_prometheus_timeout")]
    pub timeout_secs: u64,
    /// 存活信号指标
    #[serde(default = "default_presence_query")]
    pub presence_query: String,
}

impl Default for PrometheusSection {
    fn default() -> Self {
        Self {
            url: default_prometheus_url(),
            timeout_secs: default_prometheus_timeout(),
            presence_query: default_presence_query(),
        }
    }
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_prometheus_timeout() -> u64 {
    10
}

fn default_presence_query() -> String {
    "pg_up".to_string()
}

/// [trace] 段：Langfuse 上报；两个 key 都配置时才启用，否则写日志
#[derive(Debug, Clone, Deserialize)]
pub struct TraceSection {
    pub langfuse_public_key: Option<String>,
    pub langfuse_secret_key: Option<String>,
    #[serde(default = "default_langfuse_host")]
    pub langfuse_host: String,
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            langfuse_public_key: None,
            langfuse_secret_key: None,
            langfuse_host: default_langfuse_host(),
            tags: default_tags(),
        }
    }
}

fn default_langfuse_host() -> String {
    "https://cloud.langfuse.com".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["postgres-observability".to_string()]
}

impl TraceSection {
    /// (public, secret)；任一缺失或为空则返回 None
    pub fn langfuse_keys(&self) -> Option<(String, String)> {
        let public = self
            .langfuse_public_key
            .clone()
            .or_else(|| std::env::var("LANGFUSE_PUBLIC_KEY").ok())
            .filter(|k| !k.is_empty())?;
        let secret = self
            .langfuse_secret_key
            .clone()
            .or_else(|| std::env::var("LANGFUSE_SECRET_KEY").ok())
            .filter(|k| !k.is_empty())?;
        Some((public, secret))
    }
}

/// 从 config 目录加载配置，环境变量 PGPILOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PGPILOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PGPILOT")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 只从指定文件加载（不查找默认位置），仍叠加环境变量
pub fn load_config_file(path: &Path) -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path.to_path_buf()).required(true))
        .add_source(
            config::Environment::with_prefix("PGPILOT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
