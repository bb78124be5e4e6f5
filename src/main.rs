//! pgpilot 命令行
//!
//! 用法：
//!   pgpilot targets                    列出配置的监控目标
//!   pgpilot resolve <name>             解析目标的 routing key
//!   pgpilot tools                      连接提供方并列出工具目录
//!   pgpilot ask <target> <message...>  跑一轮对话，输出 ChatResponse JSON
//!
//! 配置文件可用 PGPILOT_CONFIG 指定，其余同 config/default.toml + PGPILOT__* 环境变量。

use std::path::PathBuf;

use anyhow::{bail, Context};
use pgpilot::agent::{AgentParts, ChatRequest, ObservabilityAgent};
use pgpilot::config::{load_config, AppConfig};
use pgpilot::mcp::ProviderManager;
use pgpilot::observability;
use pgpilot::targets::PrometheusBackend;

const USAGE: &str = "usage: pgpilot <targets | resolve <name> | tools | ask <target> <message...>>";

/// 不需要工具提供方的子命令（targets / resolve）不启动任何子进程
fn offline_agent(cfg: &AppConfig) -> ObservabilityAgent {
    ObservabilityAgent::new(AgentParts {
        settings: cfg.agent.clone(),
        targets: cfg.targets.clone(),
        llm: pgpilot::llm::create_llm_from_config(cfg),
        providers: std::sync::Arc::new(ProviderManager::new()),
        backend: std::sync::Arc::new(PrometheusBackend::from_config(&cfg.prometheus)),
        trace_sink: observability::sink_from_config(&cfg.trace),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config_path = std::env::var("PGPILOT_CONFIG").ok().map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    match command.as_str() {
        "targets" => {
            let agent = offline_agent(&cfg);
            println!("{}", serde_json::to_string_pretty(&agent.list_targets())?);
        }
        "resolve" => {
            let name = args.get(1).context(USAGE)?;
            let agent = offline_agent(&cfg);
            let result = agent.resolve_target(name).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "tools" => {
            let agent = ObservabilityAgent::from_config(&cfg)
                .await
                .context("Failed to start tool providers")?;
            let catalog = agent.catalog().await;
            for (name, description) in catalog.tool_descriptions() {
                println!("{name}\t{description}");
            }
            println!("{}", serde_json::to_string_pretty(&agent.health().await)?);
            agent.shutdown().await;
        }
        "ask" => {
            if args.len() < 3 {
                bail!(USAGE);
            }
            let target = args[1].clone();
            let message = args[2..].join(" ");
            let agent = ObservabilityAgent::from_config(&cfg)
                .await
                .context("Failed to start tool providers")?;

            let cancel = agent.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Ctrl-C received, cancelling turn");
                    cancel.cancel();
                }
            });

            let response = agent.chat(ChatRequest::new(target, message)).await;
            agent.shutdown().await;
            let response = response.context("Chat request failed")?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        other => bail!("unknown command '{}'\n{}", other, USAGE),
    }

    Ok(())
}
