//! Planner：调用模型并解析下一步动作
//!
//! 模型输出三种形态：纯文本（最终回答）、单个调用 `{"tool": ..., "args": {...}}`、
//! 批量调用 `{"thought": ..., "tool_calls": [...]}`。只有含 ```json 代码块或以 `{` 开头的输出才按动作解析，
//! 回答正文里出现的 PromQL 花括号不会被误判。

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::core::AgentError;
use crate::llm::{LlmClient, LlmError};
use crate::memory::Message;

/// 模型提出的一次工具调用；args 原样保留（缺省为空对象）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProposedCall {
    pub tool: String,
    #[serde(default = "empty_args", alias = "arguments")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Deserialize)]
struct BatchFormat {
    #[serde(default)]
    thought: Option<String>,
    tool_calls: Vec<ProposedCall>,
}

/// 解析后的下一步动作
#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    /// 最终回答
    Respond(String),
    /// 一批工具调用
    CallTools {
        thought: Option<String>,
        calls: Vec<ProposedCall>,
    },
}

/// 从 ```json 代码块或整段输出中取出 JSON 文本；不像动作时返回 None
fn extract_json(trimmed: &str) -> Option<&str> {
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    if trimmed.starts_with('{') {
        return Some(trimmed.rfind('}').map(|end| &trimmed[..=end]).unwrap_or(trimmed));
    }
    None
}

pub fn parse_model_output(output: &str) -> Result<ModelAction, AgentError> {
    let trimmed = output.trim();
    let Some(json_str) = extract_json(trimmed) else {
        return Ok(ModelAction::Respond(trimmed.to_string()));
    };

    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
    let Some(obj) = value.as_object() else {
        return Err(AgentError::JsonParseError(format!(
            "expected a JSON object: {}",
            json_str
        )));
    };

    if obj.contains_key("tool_calls") {
        let batch: BatchFormat = serde_json::from_value(value.clone())
            .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
        if batch.tool_calls.is_empty() {
            return Err(AgentError::JsonParseError(
                "tool_calls is empty; answer in plain text if no tool is needed".to_string(),
            ));
        }
        return Ok(ModelAction::CallTools {
            thought: batch.thought.filter(|t| !t.trim().is_empty()),
            calls: batch.tool_calls,
        });
    }

    if obj.contains_key("tool") {
        let call: ProposedCall = serde_json::from_value(value.clone())
            .map_err(|e| AgentError::JsonParseError(format!("{}: {}", e, json_str)))?;
        if call.tool.trim().is_empty() {
            return Ok(ModelAction::Respond(trimmed.to_string()));
        }
        let thought = obj
            .get("thought")
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|t| !t.trim().is_empty());
        return Ok(ModelAction::CallTools {
            thought,
            calls: vec![call],
        });
    }

    // 不是调用：取 answer / response 字段，否则整段作为回答
    let answer = ["answer", "response", "final_answer"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| trimmed.to_string());
    Ok(ModelAction::Respond(answer))
}

/// Planner：持有 LLM，把当前消息序列交给模型
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.llm.complete(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_text_is_answer() {
        let out = "Connections look healthy: sum(pg_stat_activity_count{job=\"pg\"}) is 42.";
        assert_eq!(
            parse_model_output(out).unwrap(),
            ModelAction::Respond(out.to_string())
        );
    }

    #[test]
    fn test_single_call() {
        let out = r#"{"tool": "prometheus__execute_query", "args": {"query": "pg_up{job=\"pg\"}", "time": "now"}}"#;
        match parse_model_output(out).unwrap() {
            ModelAction::CallTools { calls, thought } => {
                assert!(thought.is_none());
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].args, json!({"query": "pg_up{job=\"pg\"}", "time": "now"}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fenced_batch() {
        let out = "Let me check both.\n```json\n{\"thought\": \"metrics then logs\", \"tool_calls\": [\
            {\"tool\": \"prometheus__execute_query\", \"args\": {\"query\": \"pg_up\"}},\
            {\"tool\": \"victorialogs__query\"}]}\n```";
        match parse_model_output(out).unwrap() {
            ModelAction::CallTools { calls, thought } => {
                assert_eq!(thought.as_deref(), Some("metrics then logs"));
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[1].args, json!({}));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_object_args_are_kept() {
        let out = r#"{"tool": "t", "args": ["pg_up"]}"#;
        match parse_model_output(out).unwrap() {
            ModelAction::CallTools { calls, .. } => assert_eq!(calls[0].args, json!(["pg_up"])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_broken_json_is_parse_error() {
        let err = parse_model_output(r#"{"tool": "t", "args": {"#).unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
        let err = parse_model_output(r#"{"tool_calls": []}"#).unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }

    #[test]
    fn test_json_answer_field() {
        let out = r#"{"answer": "All good."}"#;
        assert_eq!(
            parse_model_output(out).unwrap(),
            ModelAction::Respond("All good.".to_string())
        );
    }
}
