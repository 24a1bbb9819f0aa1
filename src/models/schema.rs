use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::models::analysis::unqualified;

/// 静态 schema 元数据文档
///
/// 进程启动时读取一次，之后只读。原始文档整体嵌入提示词，
/// 同时抽取表名和列名供本地校验使用。
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    document: Value,
    // 表名 (小写、去掉 schema 前缀) -> 列名 (小写)
    tables: BTreeMap<String, Vec<String>>,
}

impl SchemaMetadata {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("读取 schema 元数据失败 {}: {}", path.display(), e))?;
        let document: Value = serde_json::from_str(&raw)?;
        Self::from_document(document)
    }

    pub fn from_document(document: Value) -> anyhow::Result<Self> {
        let entries = document
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("schema 元数据必须是以表名为键的 JSON 对象"))?;

        let mut tables = BTreeMap::new();
        for (key, def) in entries {
            let table = unqualified(key).to_lowercase();
            tables.insert(table, column_names(def));
        }

        Ok(Self { document, tables })
    }

    /// 序列化后的完整文档，用于嵌入提示词
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.document).unwrap_or_else(|_| self.document.to_string())
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&unqualified(name).to_lowercase())
    }

    /// 未声明列信息的表不做列校验
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        match self.tables.get(&unqualified(table).to_lowercase()) {
            Some(cols) if cols.is_empty() => true,
            Some(cols) => {
                let col = unqualified(column).to_lowercase();
                cols.iter().any(|c| *c == col)
            }
            None => false,
        }
    }
}

// columns 既可能是 {name: type}，也可能是 ["name", ...] 或 [{"name": ..}, ...]
fn column_names(def: &Value) -> Vec<String> {
    match def.get("columns") {
        Some(Value::Object(map)) => map.keys().map(|k| k.to_lowercase()).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.to_lowercase()),
                Value::Object(o) => o.get("name").and_then(Value::as_str).map(str::to_lowercase),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
