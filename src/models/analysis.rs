use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::error::QueryError;

pub const DEFAULT_LIMIT: i64 = 100;

/// 过滤条件的比较运算符
///
/// 理解服务偶尔会给出集合之外的写法，原样保留在 `Other` 中，不视为解析失败。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    NotEq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    ILike,
    In,
    Other(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Gte => ">=",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::In => "IN",
            Operator::Other(s) => s,
        }
    }
}

impl From<String> for Operator {
    fn from(raw: String) -> Self {
        match raw.trim().to_uppercase().as_str() {
            "=" | "==" | "EQ" | "EQUALS" => Operator::Eq,
            "!=" | "<>" | "NE" | "NOT EQUALS" => Operator::NotEq,
            ">" | "GT" => Operator::Gt,
            "<" | "LT" => Operator::Lt,
            ">=" | "GTE" => Operator::Gte,
            "<=" | "LTE" => Operator::Lte,
            "LIKE" => Operator::Like,
            "ILIKE" => Operator::ILike,
            "IN" => Operator::In,
            _ => Operator::Other(raw),
        }
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.as_str().to_string()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// 等值连接提示，生成器负责把它变成真正的 JOIN 语法
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct JoinEdge {
    pub table1: String,
    pub column1: String,
    pub table2: String,
    pub column2: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Aggregation {
    pub function: String,
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GroupBy {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// 排序方向，无法识别的写法按 ASC 处理
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(from = "String", into = "String")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }

    /// ASC / ascending / DESC / descending，大小写不敏感
    pub fn from_word(word: &str) -> Option<Self> {
        match word.trim().to_uppercase().as_str() {
            "ASC" | "ASCENDING" => Some(Direction::Asc),
            "DESC" | "DESCENDING" => Some(Direction::Desc),
            _ => None,
        }
    }
}

impl From<String> for Direction {
    fn from(raw: String) -> Self {
        Direction::from_word(&raw).unwrap_or_else(|| {
            warn!("未知的排序方向 '{}'，按 ASC 处理", raw);
            Direction::Asc
        })
    }
}

impl From<Direction> for String {
    fn from(d: Direction) -> Self {
        d.as_str().to_string()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

/// 渲染层支持的展示类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DisplayType {
    #[default]
    Table,
    BarChart,
    PieChart,
    LineChart,
    NumberCard,
    Text,
}

impl DisplayType {
    pub const ALL: [DisplayType; 6] = [
        DisplayType::Table,
        DisplayType::BarChart,
        DisplayType::PieChart,
        DisplayType::LineChart,
        DisplayType::NumberCard,
        DisplayType::Text,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayType::Table => "table",
            DisplayType::BarChart => "barChart",
            DisplayType::PieChart => "pieChart",
            DisplayType::LineChart => "lineChart",
            DisplayType::NumberCard => "numberCard",
            DisplayType::Text => "text",
        }
    }
}

impl fmt::Display for DisplayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisplayType {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DisplayType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| QueryError::UnknownDisplay(s.to_string()))
    }
}

impl From<String> for DisplayType {
    // 未知类型一律回退为表格，而不是让整个请求失败
    fn from(raw: String) -> Self {
        raw.parse().unwrap_or_else(|e: QueryError| {
            warn!("{}，回退为 table", e);
            DisplayType::Table
        })
    }
}

impl From<DisplayType> for String {
    fn from(t: DisplayType) -> Self {
        t.as_str().to_string()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRecommendation {
    #[serde(default)]
    pub display_type: DisplayType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl DisplayRecommendation {
    /// 理解服务未给出展示建议时的默认值
    pub fn default_for(question: &str) -> Self {
        Self {
            display_type: DisplayType::Table,
            title: "Query Results".to_string(),
            description: format!("Results for: {}", question),
        }
    }
}

/// 意图分析的结构化结果
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnalysis {
    pub relevant_tables: BTreeSet<String>,
    pub relevant_columns: BTreeMap<String, Vec<String>>,
    pub filters: Vec<Filter>,
    pub relationships: Vec<JoinEdge>,
    pub aggregations: Vec<Aggregation>,
    pub group_by: Vec<GroupBy>,
    pub order_by: Vec<OrderBy>,
    pub limit: i64,
    #[serde(
        rename = "customSql",
        alias = "customQueryText",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub custom_query_text: Option<String>,
    pub display_recommendation: DisplayRecommendation,
}

impl QueryAnalysis {
    /// 不涉及任何表的空分析 (问候语短路时使用)
    pub fn empty(display_recommendation: DisplayRecommendation) -> Self {
        Self {
            relevant_tables: BTreeSet::new(),
            relevant_columns: BTreeMap::new(),
            filters: Vec::new(),
            relationships: Vec::new(),
            aggregations: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: DEFAULT_LIMIT,
            custom_query_text: None,
            display_recommendation,
        }
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.relevant_tables
            .iter()
            .any(|t| unqualified(t).eq_ignore_ascii_case(table))
    }
}

/// 去掉 schema 前缀: `public.marksheets` -> `marksheets`
pub fn unqualified(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// 理解服务返回的原始分析
///
/// 每个字段先按任意 JSON 读入，形态不对时由分析器逐项宽松转换，
/// 单个字段写法不规范不会让整个分析失败。
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawAnalysis {
    #[serde(default)]
    pub relevant_tables: Value,
    #[serde(default)]
    pub relevant_columns: Value,
    #[serde(default)]
    pub filters: Value,
    #[serde(default)]
    pub relationships: Value,
    #[serde(default)]
    pub aggregations: Value,
    #[serde(default)]
    pub group_by: Value,
    #[serde(default)]
    pub order_by: Value,
    #[serde(default)]
    pub limit: Value,
    #[serde(default, alias = "customSql")]
    pub custom_query_text: Value,
    #[serde(default)]
    pub display_recommendation: Value,
}
