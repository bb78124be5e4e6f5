//! 工具调用器
//!
//! 把模型提出的调用解析到目录中的具体工具，校验参数后经 ProviderManager 转发；
//! 超时或失败都转成 ToolError，最终由循环作为 Observation 回灌。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::ToolError;
use crate::mcp::ProviderManager;
use crate::tools::record::{truncate_chars, ToolCallRecord};
use crate::tools::schema::validate_arguments;
use crate::tools::ToolCatalog;

/// 一次调用的结果：完整文本（或错误）+ 记录
#[derive(Debug, Clone)]
pub struct Invocation {
    /// 限定名（未知工具时为模型给出的原名）
    pub tool: String,
    pub result: Result<String, ToolError>,
    /// 未知工具不产生记录
    pub record: Option<ToolCallRecord>,
}

impl Invocation {
    /// 回灌给模型的完整文本（不截断）
    pub fn observation(&self) -> String {
        match &self.result {
            Ok(text) => text.clone(),
            Err(e) => e.to_observation(),
        }
    }
}

pub struct ToolInvoker {
    manager: Arc<ProviderManager>,
    timeout: Duration,
    preview_chars: usize,
}

impl ToolInvoker {
    pub fn new(manager: Arc<ProviderManager>, timeout_secs: u64, preview_chars: usize) -> Self {
        Self {
            manager,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            preview_chars,
        }
    }

    /// 调用一个工具；参数原样透传，只在非对象或缺少 required 字段时拒绝
    pub async fn invoke(
        &self,
        catalog: &ToolCatalog,
        tool_name: &str,
        raw_args: Value,
        batch: usize,
        seq: usize,
    ) -> Invocation {
        let Some(entry) = catalog.resolve(tool_name) else {
            let err = ToolError::unknown_tool(format!(
                "'{}' is not in the tool catalogue; available: {}",
                tool_name,
                catalog.tool_names().join(", ")
            ));
            tracing::warn!(tool = %tool_name, batch, seq, "model requested an unknown tool");
            return Invocation {
                tool: tool_name.to_string(),
                result: Err(err),
                record: None,
            };
        };
        let qualified = entry.qualified_name();
        let provider = entry.provider.clone();
        let start = Instant::now();

        let (result, forwarded) =
            match validate_arguments(&qualified, &entry.descriptor.input_schema, &raw_args) {
                Ok(args) => {
                    let outcome = self
                        .manager
                        .call(&provider, &entry.descriptor.name, args, self.timeout)
                        .await;
                    (outcome, Some(args.clone()))
                }
                Err(e) => (Err(e), None),
            };

        let latency_ms = start.elapsed().as_millis() as u64;
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind.as_str(),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": qualified,
            "provider": provider,
            "batch": batch,
            "seq": seq,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": latency_ms,
            "args_preview": args_preview(&raw_args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        let (preview, result_chars, truncated, error) = match &result {
            Ok(text) => {
                let (p, n, cut) = truncate_chars(text, self.preview_chars);
                (Some(p), n, cut, None)
            }
            Err(e) => (None, 0, false, Some(e.clone())),
        };
        let record = ToolCallRecord {
            seq,
            batch,
            tool: qualified.clone(),
            provider,
            arguments: raw_args,
            forwarded_arguments: forwarded,
            result: preview,
            result_chars,
            truncated,
            error,
            latency_ms,
        };
        Invocation {
            tool: qualified,
            result,
            record: Some(record),
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
