//! 参数校验与动作格式 Schema
//!
//! 校验只做两件事：参数必须是对象；schema 声明的 required 字段必须存在且非 null。
//! 其余键一律原样透传，不做任何按 schema 过滤。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde_json::Value;

use crate::core::ToolError;

/// 单个工具调用：`{"tool": "...", "args": {...}}`（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 限定工具名，如 prometheus__execute_query
    pub tool: String,
    /// 工具参数，原样转发给提供方
    pub args: HashMap<String, Value>,
}

/// 一批并发调用（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolBatchFormat {
    /// 本轮的推理简述
    pub thought: Option<String>,
    /// 同一批内并发执行的调用
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回批量调用格式的 JSON Schema 字符串，可拼入 system prompt
pub fn action_format_schema_json() -> String {
    let schema = schema_for!(ToolBatchFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| String::new())
}

/// schema 中声明的 required 字段
pub fn required_fields(schema: &Value) -> Vec<&str> {
    schema
        .get("required")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// 校验参数；通过时返回原值（不拷贝、不过滤）
pub fn validate_arguments<'a>(tool: &str, schema: &Value, args: &'a Value) -> Result<&'a Value, ToolError> {
    let Some(map) = args.as_object() else {
        return Err(ToolError::invalid_arguments(format!(
            "arguments for '{}' must be a JSON object, got {}",
            tool,
            json_type(args)
        )));
    };
    let missing: Vec<&str> = required_fields(schema)
        .into_iter()
        .filter(|field| map.get(*field).map_or(true, Value::is_null))
        .collect();
    if !missing.is_empty() {
        return Err(ToolError::invalid_arguments(format!(
            "'{}' is missing required argument(s): {}",
            tool,
            missing.join(", ")
        )));
    }
    Ok(args)
}

fn json_type(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ToolErrorKind;
    use serde_json::json;

    fn query_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "start": {"type": "string"},
                "end": {"type": "string"}
            },
            "required": ["query", "start"]
        })
    }

    #[test]
    fn test_unknown_keys_pass_through() {
        let args = json!({"query": "pg_up{job=\"pg\"}", "start": "now-1h", "step": "30s", "extra": {"x": 1}});
        let out = validate_arguments("q", &query_schema(), &args).unwrap();
        assert_eq!(out, &args);
    }

    #[test]
    fn test_missing_or_null_required_rejected() {
        let err = validate_arguments("q", &query_schema(), &json!({"start": "now-1h"})).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
        assert!(err.message.contains("query"));

        let err = validate_arguments("q", &query_schema(), &json!({"query": null, "start": "x"})).unwrap_err();
        assert!(err.message.contains("query"));
    }

    #[test]
    fn test_non_object_rejected() {
        let err = validate_arguments("q", &query_schema(), &json!(["pg_up"])).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::InvalidArguments);
        assert!(err.message.contains("array"));
    }

    #[test]
    fn test_schema_without_required() {
        let schema = json!({"type": "object"});
        let args = json!({});
        let out = validate_arguments("list", &schema, &args);
        assert_eq!(out.unwrap(), &args);
    }

    #[test]
    fn test_action_format_schema_mentions_fields() {
        let s = action_format_schema_json();
        assert!(s.contains("tool_calls"));
        assert!(s.contains("args"));
    }
}
