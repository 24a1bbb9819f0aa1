use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, instrument, warn};

use crate::core::llm::{strip_code_fence, LanguageModel, Prompt, ResponseFormat};
use crate::core::prompts;
use crate::error::{QueryError, Result};
use crate::models::analysis::{unqualified, QueryAnalysis};
use crate::models::schema::SchemaMetadata;

static READ_KEYWORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bselect\b").unwrap());

// FROM/JOIN 后面的表名，可带 schema 前缀或双引号
static TABLE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:from|join)\s+((?:"[^"]+"|[a-z_][\w$]*)(?:\.(?:"[^"]+"|[a-z_][\w$]*))?)"#)
        .unwrap()
});

static CTE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\b([a-z_][\w$]*|"[^"]+")\s+as\s*\("#).unwrap());

/// 本地结构校验结果，永不 panic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl Validation {
    fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// 非空、含 SELECT、不引用 schema 之外的表
///
/// 只是引用名扫描，不是解析器，所以本身就不完整。
pub fn validate_query_structure(query: &str, schema: &SchemaMetadata) -> Validation {
    let query = query.trim();
    if query.is_empty() {
        return Validation::invalid("Empty SQL query");
    }
    if !READ_KEYWORD.is_match(query) {
        return Validation::invalid("Missing SELECT statement");
    }
    if schema.is_empty() {
        return Validation::ok();
    }

    let ctes: HashSet<String> = CTE_NAME
        .captures_iter(query)
        .map(|cap| normalize_name(&cap[1]))
        .collect();

    let unknown: Vec<String> = TABLE_REFERENCE
        .captures_iter(query)
        .filter_map(|cap| {
            let whole = cap.get(0)?;
            if inside_function_call(query, whole.start()) {
                return None;
            }
            let name = normalize_name(&cap[1]);
            if ctes.contains(&name) || schema.has_table(&name) {
                None
            } else {
                Some(name)
            }
        })
        .collect();

    if unknown.is_empty() {
        Validation::ok()
    } else {
        Validation::invalid(format!(
            "Query references non-existent tables: {}",
            unknown.join(", ")
        ))
    }
}

fn normalize_name(raw: &str) -> String {
    unqualified(&raw.replace('"', "")).to_lowercase()
}

// EXTRACT(YEAR FROM x) / SUBSTRING(s FROM 2) 里的 FROM 不是表引用：
// 向前找最近一个未闭合的括号，括号内没有 SELECT 就视为函数调用
fn inside_function_call(query: &str, pos: usize) -> bool {
    let mut depth = 0i32;
    for (idx, ch) in query[..pos].char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' if depth > 0 => depth -= 1,
            '(' => return !READ_KEYWORD.is_match(&query[idx..pos]),
            _ => {}
        }
    }
    false
}

pub struct SqlGenerator {
    llm: Arc<dyn LanguageModel>,
    schema: Arc<SchemaMetadata>,
}

impl SqlGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, schema: Arc<SchemaMetadata>) -> Self {
        Self { llm, schema }
    }

    #[instrument(skip(self, analysis))]
    pub async fn generate(&self, question: &str, analysis: &QueryAnalysis) -> Result<String> {
        // 快速路径: 理解服务直接给出的高置信度 SQL
        if let Some(custom) = analysis.custom_query_text.as_deref() {
            let validation = validate_query_structure(custom, &self.schema);
            if validation.is_valid {
                info!("使用分析阶段给出的 customSql");
                return Ok(custom.to_string());
            }
            warn!(
                "customSql 校验失败，改为重新生成: {}",
                validation.error.as_deref().unwrap_or_default()
            );
        }

        let display_type = analysis.display_recommendation.display_type;
        let prompt = Prompt {
            system: prompts::generation_system(&self.schema, display_type),
            user: prompts::generation_user(question, analysis),
            format: ResponseFormat::Text,
        };

        let content = self.llm.complete(&prompt).await.map_err(|e| {
            warn!("SQL 生成调用失败: {}", e);
            QueryError::GenerationFailure(e.to_string())
        })?;

        let sql = strip_code_fence(&content).to_string();
        if sql.is_empty() {
            return Err(QueryError::GenerationFailure("No SQL generated".to_string()));
        }
        debug!("生成的 SQL: {}", sql);

        // 本地校验只做提示，最终以数据库执行结果为准
        let validation = validate_query_structure(&sql, &self.schema);
        if !validation.is_valid {
            warn!(
                "生成的 SQL 校验告警: {}; 可用表: {:?}",
                validation.error.as_deref().unwrap_or_default(),
                self.schema.table_names().collect::<Vec<_>>()
            );
        }

        Ok(sql)
    }
}
