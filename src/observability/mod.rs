//! 可观测性：日志初始化与每轮推理的追踪事件

pub mod langfuse;
pub mod trace;

use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::TraceSection;

pub use langfuse::LangfuseSink;
pub use trace::{LogSink, MemorySink, TraceContext, TraceEmitter, TraceEvent, TraceEventKind, TraceSink};

/// 初始化 tracing：默认 info，RUST_LOG 可覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 两个 Langfuse key 都配置时上报 Langfuse，否则写日志
pub fn sink_from_config(cfg: &TraceSection) -> Arc<dyn TraceSink> {
    match cfg.langfuse_keys() {
        Some((public, secret)) => {
            tracing::info!(host = %cfg.langfuse_host, "Langfuse tracing enabled");
            Arc::new(LangfuseSink::new(&cfg.langfuse_host, public, secret, cfg.tags.clone()))
        }
        None => {
            tracing::info!("Langfuse keys not configured, trace events go to the log");
            Arc::new(LogSink)
        }
    }
}
