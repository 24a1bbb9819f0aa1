//! 基于文本的 SQL 修复
//!
//! 只处理一类错误：Postgres 的 `column "x" must appear in the GROUP BY clause`。
//! 修复是纯文本改写，不解析 SQL。

use regex::Regex;
use std::sync::LazyLock;

pub const GROUP_BY_SIGNATURE: &str = "must appear in the GROUP BY clause";

static OFFENDING_COLUMN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"column "([^"]+)" must appear"#).unwrap());

// 非贪婪地截到下一个子句关键字或文本结尾
static GROUP_BY_CLAUSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\bGROUP\s+BY\s+(.*?)(?:\bORDER\s+BY\b|\bLIMIT\b|\bHAVING\b|$)").unwrap()
});

/// (SQL, 错误信息) -> 修复后的 SQL
pub trait QueryRepairer: Send + Sync {
    fn repair(&self, query: &str, error_message: &str) -> Option<String>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GroupByRepair;

impl QueryRepairer for GroupByRepair {
    fn repair(&self, query: &str, error_message: &str) -> Option<String> {
        if !error_message.contains(GROUP_BY_SIGNATURE) {
            return None;
        }
        let column = OFFENDING_COLUMN.captures(error_message)?.get(1)?.as_str();

        let clause = GROUP_BY_CLAUSE.captures(query)?.get(1)?;
        let existing = clause
            .as_str()
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if existing.is_empty() {
            return None;
        }

        let insert_at = clause.start() + existing.len();
        Some(format!(
            "{}, {}{}",
            &query[..insert_at],
            column,
            &query[insert_at..]
        ))
    }
}
