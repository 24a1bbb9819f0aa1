use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 查询结果的一行: 列名 -> 标量，列顺序以插入顺序为准
pub type ResultRow = Map<String, Value>;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DataPoint {
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub title: String,
    pub data: Vec<DataPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_axis_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_axis_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Card {
    pub title: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

/// 面向渲染层的展示数据，渲染层只根据 `type` 标签分发
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum DisplayPayload {
    Text { text: String },
    Paragraphs { paragraphs: Vec<String> },
    Cards { cards: Vec<Card> },
    BarChart(ChartData),
    PieChart(ChartData),
    LineChart(ChartData),
    Table { headers: Vec<String>, rows: Vec<Vec<String>> },
}

impl DisplayPayload {
    pub fn empty_table() -> Self {
        DisplayPayload::Table {
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }
}
