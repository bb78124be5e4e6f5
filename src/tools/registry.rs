//! 工具目录
//!
//! 把各提供方握手时拉到的工具合并成一张表，对模型暴露限定名 `provider__tool`，
//! 描述前缀 `[provider]`。使用 BTreeMap 保证 prompt 中的顺序确定。

use std::collections::BTreeMap;

use serde_json::Value;

use crate::mcp::ToolDescriptor;

/// 限定名分隔符：`prometheus__execute_query`
pub const NAME_SEPARATOR: &str = "__";

/// 目录中的一项：所属提供方 + 原始描述
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub provider: String,
    pub descriptor: ToolDescriptor,
}

impl CatalogEntry {
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.provider, &self.descriptor.name)
    }

    /// 提供给模型的描述，带 `[provider]` 前缀
    pub fn display_description(&self) -> String {
        match self.descriptor.description.as_deref() {
            Some(desc) if !desc.trim().is_empty() => format!("[{}] {}", self.provider, desc.trim()),
            _ => format!("[{}]", self.provider),
        }
    }
}

pub fn qualified_name(provider: &str, tool: &str) -> String {
    format!("{provider}{NAME_SEPARATOR}{tool}")
}

/// 所有已连接提供方的工具快照
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_provider(&mut self, provider: &str, tools: &[ToolDescriptor]) {
        for tool in tools {
            let entry = CatalogEntry {
                provider: provider.to_string(),
                descriptor: tool.clone(),
            };
            self.entries.insert(entry.qualified_name(), entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// 按模型给出的名字查找：优先限定名；裸工具名只在恰好一个提供方拥有时才命中
    pub fn resolve(&self, name: &str) -> Option<&CatalogEntry> {
        if let Some(entry) = self.entries.get(name) {
            return Some(entry);
        }
        let mut bare = self.entries.values().filter(|e| e.descriptor.name == name);
        match (bare.next(), bare.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// (限定名, 描述) 列表，用于 prompt 中的 Available tools 段落
    pub fn tool_descriptions(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.display_description()))
            .collect()
    }

    /// 工具 schema JSON（含参数 schema），拼入 system prompt
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .entries
            .iter()
            .map(|(name, entry)| {
                serde_json::json!({
                    "name": name,
                    "description": entry.display_description(),
                    "parameters": entry.descriptor.input_schema,
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}
