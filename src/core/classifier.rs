//! 展示类型推断
//!
//! 纯函数，无 I/O。规则按顺序自上而下求值，第一条命中即返回；
//! 最后一条表格规则总是命中，所以任何结果集都有展示方式。

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::core::greeting::{is_greeting, GREETING_REPLY};
use crate::models::analysis::DisplayType;
use crate::models::display::{Card, ChartData, DataPoint, DisplayPayload, ResultRow};

/// 单行单列时按文本展示的列名
const TEXT_COLUMNS: &[&str] = &["Message", "Result", "Response", "Text", "Content"];

const SHORT_TEXT_WORDS: usize = 10;
const PIE_MAX_ROWS: usize = 6;
const BAR_MAX_ROWS: usize = 15;

static DISTRIBUTION_VOCAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(distribution|distributed|breakdown|break\s+down|proportions?|percentages?|share|split|ratio|composition)\b")
        .unwrap()
});

static COMPARISON_VOCAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(compare|comparison|comparing|versus|vs|rank|ranking|ranked|top|bottom|highest|lowest|most|least|best|worst)\b")
        .unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub display_type: DisplayType,
    pub payload: DisplayPayload,
}

/// 规则求值时看到的结果集形态
struct Shape<'a> {
    question: &'a str,
    rows: &'a [ResultRow],
    columns: Vec<&'a str>,
}

impl<'a> Shape<'a> {
    fn new(question: &'a str, rows: &'a [ResultRow]) -> Self {
        let columns = rows
            .first()
            .map(|r| r.keys().map(String::as_str).collect())
            .unwrap_or_default();
        Self {
            question,
            rows,
            columns,
        }
    }

    fn is_scalar(&self) -> bool {
        self.rows.len() == 1 && self.columns.len() == 1
    }

    fn scalar(&self) -> Option<&'a Value> {
        let column = *self.columns.first()?;
        self.rows.first()?.get(column)
    }

    /// 两列且第二列每行都是数值 (或可转换为数值)
    fn is_label_measure(&self) -> bool {
        self.columns.len() == 2
            && self
                .rows
                .iter()
                .all(|r| r.get(self.columns[1]).and_then(as_number).is_some())
    }
}

struct DisplayRule {
    display_type: DisplayType,
    applies: fn(&Shape) -> bool,
    build: fn(&Shape) -> DisplayPayload,
}

const RULES: &[DisplayRule] = &[
    DisplayRule {
        display_type: DisplayType::Text,
        applies: text_applies,
        build: text_payload,
    },
    DisplayRule {
        display_type: DisplayType::NumberCard,
        applies: |s| s.rows.len() == 1 && s.columns.len() >= 3,
        build: card_payload,
    },
    DisplayRule {
        display_type: DisplayType::PieChart,
        applies: |s| {
            (2..=PIE_MAX_ROWS).contains(&s.rows.len())
                && s.is_label_measure()
                && (DISTRIBUTION_VOCAB.is_match(s.question) || s.rows.len() <= PIE_MAX_ROWS)
        },
        build: |s| DisplayPayload::PieChart(chart_data(s)),
    },
    DisplayRule {
        display_type: DisplayType::BarChart,
        applies: |s| {
            (2..=BAR_MAX_ROWS).contains(&s.rows.len())
                && s.is_label_measure()
                && (COMPARISON_VOCAB.is_match(s.question) || s.rows.len() > PIE_MAX_ROWS)
        },
        build: |s| DisplayPayload::BarChart(chart_data(s)),
    },
    DisplayRule {
        display_type: DisplayType::Table,
        applies: |_| true,
        build: table_payload,
    },
];

/// (问题, 结果集) -> 展示类型与展示数据
pub fn classify(question: &str, rows: &[ResultRow]) -> Classification {
    let shape = Shape::new(question, rows);
    RULES
        .iter()
        .find(|rule| (rule.applies)(&shape))
        .map(|rule| Classification {
            display_type: rule.display_type,
            payload: (rule.build)(&shape),
        })
        // 表格规则兜底，这里理论上走不到
        .unwrap_or_else(|| Classification {
            display_type: DisplayType::Table,
            payload: table_payload(&shape),
        })
}

fn text_applies(s: &Shape) -> bool {
    if is_greeting(s.question) {
        return true;
    }
    if !s.is_scalar() {
        return false;
    }
    if TEXT_COLUMNS.contains(&s.columns[0]) {
        return true;
    }
    match s.scalar() {
        Some(Value::String(text)) => {
            text.split_whitespace().count() < SHORT_TEXT_WORDS
                && !text.contains('\n')
                && text.trim_end().ends_with('.')
        }
        _ => false,
    }
}

fn text_payload(s: &Shape) -> DisplayPayload {
    match s.scalar() {
        Some(value) if s.is_scalar() => DisplayPayload::Text {
            text: stringify(value),
        },
        _ => DisplayPayload::Paragraphs {
            paragraphs: GREETING_REPLY.iter().map(|p| p.to_string()).collect(),
        },
    }
}

fn card_payload(s: &Shape) -> DisplayPayload {
    let row = &s.rows[0];
    DisplayPayload::Cards {
        cards: s
            .columns
            .iter()
            .map(|c| Card {
                title: c.to_string(),
                content: row.get(*c).map(stringify).unwrap_or_default(),
                footer: None,
            })
            .collect(),
    }
}

fn chart_data(s: &Shape) -> ChartData {
    let (label, measure) = (s.columns[0], s.columns[1]);
    ChartData {
        title: format!("{} by {}", measure, label),
        data: s
            .rows
            .iter()
            .map(|r| DataPoint {
                name: r.get(label).map(stringify).unwrap_or_default(),
                value: r.get(measure).and_then(as_number).unwrap_or_default(),
            })
            .collect(),
        x_axis_label: Some(label.to_string()),
        y_axis_label: Some(measure.to_string()),
    }
}

/// 表头取首行列名；每行按表头顺序逐列字符串化
fn table_payload(s: &Shape) -> DisplayPayload {
    if s.rows.is_empty() {
        return DisplayPayload::empty_table();
    }
    DisplayPayload::Table {
        headers: s.columns.iter().map(|c| c.to_string()).collect(),
        rows: s
            .rows
            .iter()
            .map(|r| {
                s.columns
                    .iter()
                    .map(|c| r.get(*c).map(stringify).unwrap_or_default())
                    .collect()
            })
            .collect(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
