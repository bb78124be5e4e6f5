//! ToolCallRecord：单次工具调用的不可变记录（进入响应与 trace）

use serde::Serialize;
use serde_json::Value;

use crate::core::ToolError;

/// 一次工具调用。result 是截断后的预览，完整文本只回灌给模型与 trace
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    /// 本轮内的发出序号（跨批次单调递增）
    pub seq: usize,
    /// 所属批次（从 1 开始）
    pub batch: usize,
    /// 限定工具名
    pub tool: String,
    pub provider: String,
    /// 模型给出的原始参数
    pub arguments: Value,
    /// 实际转发给提供方的参数；校验失败未转发时为 None
    pub forwarded_arguments: Option<Value>,
    pub result: Option<String>,
    pub result_chars: usize,
    pub truncated: bool,
    pub error: Option<ToolError>,
    pub latency_ms: u64,
}

impl ToolCallRecord {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 按字符（而非字节）截断；返回 (预览, 原始字符数, 是否截断)
pub fn truncate_chars(text: &str, budget: usize) -> (String, usize, bool) {
    let total = text.chars().count();
    if total <= budget {
        return (text.to_string(), total, false);
    }
    (text.chars().take(budget).collect(), total, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), ("abc".to_string(), 3, false));
        let (preview, total, cut) = truncate_chars("连接数过高啊", 3);
        assert_eq!(preview, "连接数");
        assert_eq!(total, 6);
        assert!(cut);
    }
}
