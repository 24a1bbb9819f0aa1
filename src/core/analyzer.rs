use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

use crate::core::llm::{strip_code_fence, LanguageModel, Prompt, ResponseFormat};
use crate::core::prompts;
use crate::error::{QueryError, Result};
use crate::models::analysis::{
    unqualified, Direction, DisplayRecommendation, Filter, GroupBy, Operator, OrderBy, QueryAnalysis,
    RawAnalysis, DEFAULT_LIMIT,
};
use crate::models::schema::SchemaMetadata;

/// 学业记录表的及格/不及格约定
///
/// 理解服务并不总能自己编码这条领域约定，这里作为确定性的兜底。
pub struct RemarksRule {
    pub table: &'static str,
    pub column: &'static str,
    pub cleared: &'static str,
    pub not_cleared: &'static str,
}

pub const MARKSHEET_REMARKS: RemarksRule = RemarksRule {
    table: "marksheets",
    column: "remarks",
    cleared: "%Semester Cleared%",
    not_cleared: "%Semester not cleared%",
};

static OUTCOME_VOCAB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(pass|passed|passing|cleared|fail|failed|failing|not\s+cleared)\b").unwrap()
});

static FAILING_VOCAB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(fail|failed|failing|not\s+cleared)\b").unwrap());

// "top 500 students" / "show 250 rows" 等显式数量
static EXPLICIT_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:top|first|last|limit|show|list)\s+(\d{1,9})\b").unwrap()
});

pub struct QueryAnalyzer {
    llm: Arc<dyn LanguageModel>,
    schema: Arc<SchemaMetadata>,
}

impl QueryAnalyzer {
    pub fn new(llm: Arc<dyn LanguageModel>, schema: Arc<SchemaMetadata>) -> Self {
        Self { llm, schema }
    }

    /// 问题 + schema 元数据 -> 结构化分析，内部不重试
    #[instrument(skip(self))]
    pub async fn analyze(&self, question: &str) -> Result<QueryAnalysis> {
        let prompt = Prompt {
            system: prompts::analysis_system(&self.schema),
            user: prompts::analysis_user(question),
            format: ResponseFormat::Json,
        };

        let content = self.llm.complete(&prompt).await.map_err(|e| {
            warn!("意图分析调用失败: {}", e);
            QueryError::AnalysisFailure(e.to_string())
        })?;
        debug!("意图分析原始返回: {}", content);

        let raw = parse_raw_analysis(&content)?;
        let analysis = normalize(raw, question)?;
        self.warn_undeclared_columns(&analysis);

        info!(
            "意图分析完成: tables={:?}, filters={}, custom_sql={}",
            analysis.relevant_tables,
            analysis.filters.len(),
            analysis.custom_query_text.is_some()
        );
        Ok(analysis)
    }

    fn warn_undeclared_columns(&self, analysis: &QueryAnalysis) {
        for (table, columns) in &analysis.relevant_columns {
            if !self.schema.has_table(table) {
                warn!("分析引用了未声明的表: {}", table);
                continue;
            }
            for column in columns {
                if !self.schema.has_column(table, column) {
                    warn!("分析引用了未声明的列: {}.{}", table, column);
                }
            }
        }
    }
}

fn parse_raw_analysis(content: &str) -> Result<RawAnalysis> {
    let value: Value = serde_json::from_str(strip_code_fence(content))
        .map_err(|e| QueryError::AnalysisFailure(format!("response is not JSON: {}", e)))?;
    if !value.is_object() {
        return Err(QueryError::AnalysisFailure("response is not a JSON object".to_string()));
    }
    serde_json::from_value(value)
        .map_err(|e| QueryError::AnalysisFailure(format!("unexpected analysis shape: {}", e)))
}

/// 缺省字段补齐、limit 归一化、及格/不及格过滤注入
///
/// 形态不对的字段告警后按缺省处理，列表里无法识别的元素单独丢弃。
pub fn normalize(raw: RawAnalysis, question: &str) -> Result<QueryAnalysis> {
    let custom_query_text = match raw.custom_query_text {
        Value::String(sql) => Some(sql.trim().to_string()).filter(|sql| !sql.is_empty()),
        Value::Null => None,
        other => {
            warn!("忽略无法识别的 customSql: {}", other);
            None
        }
    };

    let relevant_tables = lenient_list("relevantTables", raw.relevant_tables, text_item)
        .into_iter()
        .collect::<BTreeSet<_>>();

    if relevant_tables.is_empty() && custom_query_text.is_none() {
        return Err(QueryError::AnalysisFailure(
            "no relevant tables identified".to_string(),
        ));
    }

    let mut analysis = QueryAnalysis {
        relevant_tables,
        relevant_columns: lenient_columns(raw.relevant_columns),
        filters: lenient_list("filters", raw.filters, from_value),
        relationships: lenient_list("relationships", raw.relationships, from_value),
        aggregations: lenient_list("aggregations", raw.aggregations, from_value),
        group_by: lenient_list("groupBy", raw.group_by, group_by_item),
        order_by: lenient_list("orderBy", raw.order_by, order_by_item),
        limit: resolve_limit(lenient_limit(&raw.limit), question),
        custom_query_text,
        display_recommendation: lenient_recommendation(raw.display_recommendation, question),
    };

    apply_remarks_rule(&mut analysis, question, &MARKSHEET_REMARKS);
    Ok(analysis)
}

// null 视为空列表，单个值视为一元列表
fn lenient_list<T>(field: &str, value: Value, item: fn(Value) -> Option<T>) -> Vec<T> {
    let items = match value {
        Value::Null => return Vec::new(),
        Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .filter_map(|v| {
            let converted = item(v.clone());
            if converted.is_none() {
                warn!("忽略无法识别的 {} 项: {}", field, v);
            }
            converted
        })
        .collect()
}

fn from_value<T: DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

fn text_item(value: Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// "m.year" 这样的裸列名
fn group_by_item(value: Value) -> Option<GroupBy> {
    match value {
        Value::String(_) => text_item(value).map(|column| GroupBy { column, table: None }),
        other => from_value(other),
    }
}

// "sgpa DESC" / "sgpa descending" / "sgpa"
fn order_by_item(value: Value) -> Option<OrderBy> {
    let Value::String(text) = value else {
        return from_value(value);
    };
    let text = text.trim();
    let (column, direction) = match text.rsplit_once(char::is_whitespace) {
        Some((column, word)) => match Direction::from_word(word) {
            Some(direction) => (column.trim(), direction),
            None => (text, Direction::Asc),
        },
        None => (text, Direction::Asc),
    };
    (!column.is_empty()).then(|| OrderBy {
        column: column.to_string(),
        direction,
        table: None,
    })
}

/// 整数、整数值的浮点数或数字字符串
fn lenient_limit(value: &Value) -> Option<i64> {
    let limit = match value {
        Value::Null => return None,
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    };
    if limit.is_none() {
        warn!("忽略无法识别的 limit: {}", value);
    }
    limit
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

// {table: [col]}，也接受 {table: "col"}
fn lenient_columns(value: Value) -> BTreeMap<String, Vec<String>> {
    match value {
        Value::Null => BTreeMap::new(),
        Value::Object(map) => map
            .into_iter()
            .map(|(table, cols)| {
                let field = format!("relevantColumns.{}", table);
                (table, lenient_list(&field, cols, text_item))
            })
            .collect(),
        other => {
            warn!("忽略无法识别的 relevantColumns: {}", other);
            BTreeMap::new()
        }
    }
}

fn lenient_recommendation(value: Value, question: &str) -> DisplayRecommendation {
    let fallback = DisplayRecommendation::default_for(question);
    if value.is_null() {
        debug!("理解服务未给出展示建议，使用默认表格");
        return fallback;
    }
    match serde_json::from_value::<DisplayRecommendation>(value.clone()) {
        Ok(mut rec) => {
            if rec.title.trim().is_empty() {
                rec.title = fallback.title;
            }
            if rec.description.trim().is_empty() {
                rec.description = fallback.description;
            }
            rec
        }
        Err(e) => {
            warn!("展示建议无法解析 ({})，使用默认表格: {}", e, value);
            fallback
        }
    }
}

/// 缺省或非正数为 100；超过 100 时只有问题里显式要求更多才放宽
pub fn resolve_limit(requested: Option<i64>, question: &str) -> i64 {
    let limit = match requested {
        Some(n) if n > 0 => n,
        _ => return DEFAULT_LIMIT,
    };

    let explicit = EXPLICIT_COUNT
        .captures_iter(question)
        .filter_map(|cap| cap[1].parse::<i64>().ok())
        .max()
        .unwrap_or(0);
    let cap = DEFAULT_LIMIT.max(explicit);

    if limit > cap {
        warn!("limit {} 超出上限，截断为 {}", limit, cap);
        cap
    } else {
        limit
    }
}

/// 返回是否注入了过滤条件
pub fn apply_remarks_rule(analysis: &mut QueryAnalysis, question: &str, rule: &RemarksRule) -> bool {
    if !analysis.has_table(rule.table) || !OUTCOME_VOCAB.is_match(question) {
        return false;
    }

    let already_filtered = analysis.filters.iter().any(|f| {
        unqualified(&f.column).eq_ignore_ascii_case(rule.column)
            && f
                .table
                .as_deref()
                .map_or(true, |t| unqualified(t).eq_ignore_ascii_case(rule.table))
    });
    if already_filtered {
        return false;
    }

    let value = if FAILING_VOCAB.is_match(question) {
        rule.not_cleared
    } else {
        rule.cleared
    };
    info!("注入 {}.{} 过滤: LIKE '{}'", rule.table, rule.column, value);
    analysis.filters.push(Filter {
        column: rule.column.to_string(),
        operator: Operator::Like,
        value: Value::String(value.to_string()),
        table: Some(rule.table.to_string()),
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::analysis::DisplayType;
    use crate::testing::ScriptedModel;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawAnalysis {
        serde_json::from_value(value).unwrap()
    }

    fn schema() -> Arc<SchemaMetadata> {
        Arc::new(
            SchemaMetadata::from_document(json!({
                "public.marksheets": {"columns": {"id": "integer", "remarks": "varchar", "year": "integer"}},
                "public.users": {"columns": {"id": "integer", "name": "varchar"}}
            }))
            .unwrap(),
        )
    }

    fn remarks_filters(analysis: &QueryAnalysis) -> Vec<&Filter> {
        analysis.filters.iter().filter(|f| f.column == "remarks").collect()
    }

    #[test]
    fn missing_fields_default_to_empty_collections() {
        let analysis = normalize(raw(json!({"relevantTables": ["users"]})), "list users").unwrap();
        assert!(analysis.filters.is_empty());
        assert!(analysis.relationships.is_empty());
        assert!(analysis.relevant_columns.is_empty());
        assert_eq!(analysis.limit, 100);
        assert_eq!(
            analysis.display_recommendation,
            DisplayRecommendation {
                display_type: DisplayType::Table,
                title: "Query Results".into(),
                description: "Results for: list users".into(),
            }
        );
    }

    #[test]
    fn empty_tables_without_custom_sql_is_an_analysis_failure() {
        let err = normalize(raw(json!({"relevantTables": []})), "q").unwrap_err();
        assert!(matches!(err, QueryError::AnalysisFailure(_)));

        let ok = normalize(raw(json!({"customSql": "SELECT 1"})), "q").unwrap();
        assert_eq!(ok.custom_query_text.as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn passed_question_injects_cleared_filter() {
        let analysis = normalize(
            raw(json!({"relevantTables": ["marksheets", "users"]})),
            "Which students passed semester 1 in 2023?",
        )
        .unwrap();
        let injected = remarks_filters(&analysis);
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].operator, Operator::Like);
        assert_eq!(injected[0].value, json!("%Semester Cleared%"));
        assert_eq!(injected[0].table.as_deref(), Some("marksheets"));
    }

    #[test]
    fn failed_question_injects_not_cleared_filter() {
        for q in ["How many students failed in 2023?", "students who have not cleared semester 2"] {
            let analysis = normalize(raw(json!({"relevantTables": ["public.marksheets"]})), q).unwrap();
            let injected = remarks_filters(&analysis);
            assert_eq!(injected.len(), 1, "{q}");
            assert_eq!(injected[0].value, json!("%Semester not cleared%"), "{q}");
        }
    }

    #[test]
    fn existing_remarks_filter_is_never_duplicated() {
        let analysis = normalize(
            raw(json!({
                "relevantTables": ["marksheets"],
                "filters": [{"column": "remarks", "operator": "LIKE", "value": "%Semester Cleared%", "table": "marksheets"}]
            })),
            "students who passed",
        )
        .unwrap();
        assert_eq!(remarks_filters(&analysis).len(), 1);

        let mut again = analysis.clone();
        assert!(!apply_remarks_rule(&mut again, "students who passed", &MARKSHEET_REMARKS));
        assert_eq!(again, analysis);
    }

    #[test]
    fn rule_needs_both_table_and_vocabulary() {
        let no_table = normalize(raw(json!({"relevantTables": ["users"]})), "who passed?").unwrap();
        assert!(no_table.filters.is_empty());

        let no_vocab = normalize(raw(json!({"relevantTables": ["marksheets"]})), "average sgpa by year").unwrap();
        assert!(no_vocab.filters.is_empty());

        // passport 不是 pass
        let lookalike = normalize(raw(json!({"relevantTables": ["marksheets"]})), "passport numbers").unwrap();
        assert!(lookalike.filters.is_empty());
    }

    #[test]
    fn bare_string_group_and_order_entries_are_accepted() {
        let analysis = normalize(
            raw(json!({
                "relevantTables": ["marksheets"],
                "groupBy": ["m.year", {"column": "semester", "table": "marksheets"}],
                "orderBy": ["m.year descending", "sgpa", {"column": "cgpa", "direction": "descending"}]
            })),
            "average sgpa by year",
        )
        .unwrap();

        assert_eq!(
            analysis.group_by,
            vec![
                GroupBy { column: "m.year".into(), table: None },
                GroupBy { column: "semester".into(), table: Some("marksheets".into()) },
            ]
        );
        let order: Vec<(&str, Direction)> =
            analysis.order_by.iter().map(|o| (o.column.as_str(), o.direction)).collect();
        assert_eq!(
            order,
            vec![("m.year", Direction::Desc), ("sgpa", Direction::Asc), ("cgpa", Direction::Desc)]
        );
    }

    #[test]
    fn integral_float_or_numeric_string_limit_is_accepted() {
        for (limit, expected) in [(json!(10.0), 10), (json!("25"), 25), (json!(12.5), 100), (json!("lots"), 100)] {
            let analysis = normalize(raw(json!({"relevantTables": ["users"], "limit": limit})), "list users").unwrap();
            assert_eq!(analysis.limit, expected, "{limit}");
        }
    }

    #[test]
    fn recommendation_without_display_type_defaults_to_table() {
        let analysis = normalize(
            raw(json!({"relevantTables": ["users"], "displayRecommendation": {"title": "t"}})),
            "list users",
        )
        .unwrap();
        assert_eq!(analysis.display_recommendation.display_type, DisplayType::Table);
        assert_eq!(analysis.display_recommendation.title, "t");
        assert_eq!(analysis.display_recommendation.description, "Results for: list users");

        let garbled = normalize(
            raw(json!({"relevantTables": ["users"], "displayRecommendation": "pieChart"})),
            "list users",
        )
        .unwrap();
        assert_eq!(garbled.display_recommendation, DisplayRecommendation::default_for("list users"));
    }

    #[test]
    fn off_shape_fields_fall_back_instead_of_failing() {
        let analysis = normalize(
            raw(json!({
                "relevantTables": "marksheets",
                "relevantColumns": {"marksheets": "sgpa", "users": ["name", 3]},
                "filters": [{"column": "year", "operator": "=", "value": 2023}, "year = 2023"],
                "relationships": {"table1": "students", "column1": "user_id_fk", "table2": "users", "column2": "id"},
                "aggregations": "AVG(sgpa)",
                "customSql": 42
            })),
            "average sgpa in 2023",
        )
        .unwrap();

        assert!(analysis.has_table("marksheets"));
        assert_eq!(analysis.relevant_columns["marksheets"], vec!["sgpa".to_string()]);
        assert_eq!(analysis.relevant_columns["users"], vec!["name".to_string()]);
        assert_eq!(analysis.filters.len(), 1);
        assert_eq!(analysis.relationships.len(), 1);
        assert!(analysis.aggregations.is_empty());
        assert!(analysis.custom_query_text.is_none());
    }

    #[tokio::test]
    async fn loosely_shaped_completion_still_analyzes() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(r#"{
            "relevantTables": ["marksheets"],
            "groupBy": ["m.year"],
            "orderBy": [{"column": "m.year", "direction": "descending"}],
            "limit": 10.0,
            "displayRecommendation": {"title": "SGPA by year"}
        }"#
        .to_string())]));
        let analyzer = QueryAnalyzer::new(model, schema());

        let analysis = analyzer.analyze("average sgpa by year").await.unwrap();
        assert_eq!(analysis.limit, 10);
        assert_eq!(analysis.group_by[0].column, "m.year");
        assert_eq!(analysis.order_by[0].direction, Direction::Desc);
        assert_eq!(analysis.display_recommendation.display_type, DisplayType::Table);
    }

    #[test]
    fn limit_is_positive_and_capped_unless_requested() {
        assert_eq!(resolve_limit(None, "q"), 100);
        assert_eq!(resolve_limit(Some(0), "q"), 100);
        assert_eq!(resolve_limit(Some(-5), "q"), 100);
        assert_eq!(resolve_limit(Some(10), "top 10 students"), 10);
        assert_eq!(resolve_limit(Some(5000), "all students in 2023"), 100);
        assert_eq!(resolve_limit(Some(500), "show 500 students"), 500);
        assert_eq!(resolve_limit(Some(900), "top 500 students"), 500);
    }

    #[tokio::test]
    async fn analyze_embeds_schema_and_parses_fenced_json() {
        let model = Arc::new(ScriptedModel::new(vec![Ok(
            "```json\n{\"relevantTables\": [\"marksheets\"], \"limit\": 20}\n```".to_string(),
        )]));
        let analyzer = QueryAnalyzer::new(model.clone(), schema());

        let analysis = analyzer.analyze("how many failed in 2023").await.unwrap();
        assert_eq!(analysis.limit, 20);
        assert_eq!(remarks_filters(&analysis).len(), 1);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].format, ResponseFormat::Json);
        assert!(prompts[0].system.contains("public.marksheets"));
        assert!(prompts[0].user.contains("how many failed in 2023"));
    }

    #[tokio::test]
    async fn unreachable_or_malformed_service_fails_analysis() {
        let model = Arc::new(ScriptedModel::new(vec![
            Err(crate::core::llm::LlmError::EmptyCompletion),
            Ok("Sure! The tables you need are users.".to_string()),
            Ok("[1, 2, 3]".to_string()),
        ]));
        let analyzer = QueryAnalyzer::new(model.clone(), schema());

        for _ in 0..3 {
            let err = analyzer.analyze("list users").await.unwrap_err();
            assert!(matches!(err, QueryError::AnalysisFailure(_)), "{err:?}");
        }
        assert_eq!(model.calls(), 3);
    }
}
