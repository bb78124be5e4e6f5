//! System directive 组装
//!
//! 把目标的 routing key 与 db_type 写进指令，保证模型生成的每条查询都限定在该目标上；
//! 同时嵌入工具目录与动作格式 Schema。

use crate::tools::{action_format_schema_json, ToolCatalog};

/// 本轮的目标上下文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnTarget {
    pub name: String,
    pub label: String,
    pub db_type: String,
    /// 已解析的 routing key；None 表示未解析，查询不加 job 过滤
    pub routing_key: Option<String>,
}

pub fn build_system_directive(target: &TurnTarget, catalog: &ToolCatalog) -> String {
    let mut s = format!(
        "You are a PostgreSQL observability expert. You have access to Prometheus metrics and \
VictoriaLogs log data for the PostgreSQL database `{}` ({}, DB Type: `{}`).\n\n",
        target.name, target.label, target.db_type
    );
    s.push_str(
        "You must NEVER attempt to connect directly to the database. All data must be fetched \
exclusively through your available tools.\n\n\
You have two categories of tools:\n\
1. Metric tools (PromQL): numeric time-series such as connection counts, replication lag, cache hit ratio, \
transaction rate, locks, storage and autovacuum activity.\n\
2. Log tools (LogsQL): FATAL/ERROR/PANIC messages, slow queries, connection and authentication events, \
checkpoints and WAL, maintenance and replication log entries.\n\n\
When diagnosing issues, correlate metrics with logs. When you find anomalies, explain what they mean and \
suggest remediation steps.\n\n",
    );

    match &target.routing_key {
        Some(key) => s.push_str(&format!(
            "Scoping: every metric query MUST include the labels job=\"{}\" and db_type=\"{}\", \
e.g. pg_up{{job=\"{}\", db_type=\"{}\"}}. Never query other jobs.\n\n",
            key, target.db_type, key, target.db_type
        )),
        None => s.push_str(&format!(
            "Scoping: the routing key (job label) of `{}` could not be resolved. Filter metric queries by \
db_type=\"{}\" and tell the user that results may include other instances.\n\n",
            target.name, target.db_type
        )),
    }

    if catalog.is_empty() {
        s.push_str("No tools are currently available. Answer from general knowledge and say so.\n\n");
    } else {
        s.push_str("Available tools (use the exact name):\n");
        for (name, desc) in catalog.tool_descriptions() {
            s.push_str(&format!("- {}: {}\n", name, desc));
        }
        s.push_str("\nTool parameter schemas:\n");
        s.push_str(&catalog.to_schema_json());
        s.push_str("\n\n");
    }

    s.push_str(
        "To call tools, reply with ONLY one JSON object and no other text. A single call: \
{\"tool\": \"<name>\", \"args\": {...}}. Several independent calls in one round:\n",
    );
    s.push_str(&action_format_schema_json());
    s.push_str(
        "\nTool results come back as messages starting with \"Observation from <tool>:\". \
When you have enough evidence, reply in plain text (not JSON) with:\n\
1. A clear summary of findings\n\
2. Relevant metric values and log evidence with context\n\
3. Actionable recommendations when issues are found\n",
    );
    s
}
