//! 发送给理解服务的提示词模板

use crate::models::analysis::{DisplayType, QueryAnalysis};
use crate::models::schema::SchemaMetadata;

/// 固定的样例数据，帮助理解服务把握列的类型与取值形态
pub const SAMPLE_DATA: &str = r#"{
  "students": [
    {"id": 1, "user_id_fk": 101, "program_id_fk": 1, "active": true},
    {"id": 2, "user_id_fk": 102, "program_id_fk": 2, "active": true},
    {"id": 3, "user_id_fk": 103, "program_id_fk": 1, "active": false}
  ],
  "users": [
    {"id": 101, "name": "John Doe", "email": "john@example.com", "role": "STUDENT"},
    {"id": 102, "name": "Jane Smith", "email": "jane@example.com", "role": "STUDENT"},
    {"id": 103, "name": "Alice Brown", "email": "alice@example.com", "role": "STUDENT"}
  ],
  "marksheets": [
    {"id": 1, "student_id_fk": 1, "semester": 1, "year": 2023, "sgpa": 8.5, "cgpa": 8.5, "classification": "First Class", "remarks": "Semester Cleared"},
    {"id": 2, "student_id_fk": 1, "semester": 2, "year": 2023, "sgpa": 9.0, "cgpa": 8.75, "classification": "First Class", "remarks": "Semester Cleared"},
    {"id": 3, "student_id_fk": 2, "semester": 1, "year": 2023, "sgpa": 6.0, "cgpa": 6.0, "classification": "Second Class", "remarks": "Semester Cleared"},
    {"id": 4, "student_id_fk": 3, "semester": 1, "year": 2023, "sgpa": 3.5, "cgpa": 3.5, "classification": "Failed", "remarks": "Semester not cleared"}
  ],
  "courses": [
    {"id": 1, "name": "Mathematics", "program_id_fk": 1, "code": "MATH101", "credits": 4},
    {"id": 2, "name": "Computer Science", "program_id_fk": 1, "code": "CS101", "credits": 3},
    {"id": 3, "name": "Physics", "program_id_fk": 2, "code": "PHY101", "credits": 4}
  ],
  "programs": [
    {"id": 1, "name": "B.Tech Computer Science", "stream_id_fk": 1},
    {"id": 2, "name": "B.Sc Physics", "stream_id_fk": 2}
  ]
}"#;

pub fn analysis_system(schema: &SchemaMetadata) -> String {
    format!(
        r#"You analyze questions about a PostgreSQL database and identify the database elements needed to answer them.

Database schema:
{schema}

Identify the relevant tables, the relevant columns of each table, filters (column, operator, value), join relationships between tables, and any aggregations, grouping or ordering.

Domain conventions:
- Passing records in "marksheets" have remarks LIKE '%Semester Cleared%'; failing records have remarks LIKE '%Semester not cleared%'.
- Prefer user-friendly column aliases (e.g. "Student Name" instead of "name").
- Apply year filters when a year is mentioned.
- Limit result sets to 100 rows unless the question asks for more.

Respond with a single JSON object:
{{
  "relevantTables": ["table"],
  "relevantColumns": {{"table": ["column"]}},
  "filters": [{{"column": "", "operator": "=", "value": "", "table": ""}}],
  "relationships": [{{"table1": "", "column1": "", "table2": "", "column2": ""}}],
  "aggregations": [{{"function": "", "column": "", "table": ""}}],
  "groupBy": [{{"column": "", "table": ""}}],
  "orderBy": [{{"column": "", "direction": "ASC", "table": ""}}],
  "limit": 100,
  "displayRecommendation": {{
    "displayType": "table | barChart | pieChart | lineChart | numberCard | text",
    "title": "",
    "description": ""
  }}
}}

When you are highly confident, also include "customSql" with the complete SQL query."#,
        schema = schema.to_prompt_json()
    )
}

pub fn analysis_user(question: &str) -> String {
    format!("Question: {question}\n\nIdentify the database elements needed to answer this question.")
}

/// 按展示类型给出 SQL 结构要求
pub fn display_guidance(display_type: DisplayType) -> &'static str {
    match display_type {
        DisplayType::Table => {
            "Return the rows and columns needed to answer the question, with descriptive column aliases such as \"Student Name\"."
        }
        DisplayType::BarChart => {
            "Return exactly two columns: first a category label (x-axis), then a numeric measure (y-axis). Keep it to 10-15 categories."
        }
        DisplayType::PieChart => {
            "Return exactly two columns: first a category label (slice), then a numeric measure (slice size). Keep it to 5-8 categories; group small ones as 'Other' with CASE if needed."
        }
        DisplayType::LineChart => {
            "Return exactly two columns: first a time or sequence point (x-axis), then a numeric measure (y-axis), ordered by the first column."
        }
        DisplayType::NumberCard => {
            "Return exactly one row. The first column is the main label; add supporting context columns with clear names."
        }
        DisplayType::Text => "Return exactly one row with one column containing the answer.",
    }
}

pub fn generation_system(schema: &SchemaMetadata, display_type: DisplayType) -> String {
    format!(
        r#"You write PostgreSQL queries that answer a user question, given an analysis of the question.

Database schema:
{schema}

Sample data:
{sample}

The result will be displayed as "{display_type}". {guidance}

Rules:
- Valid PostgreSQL only; read-only SELECT statements.
- Join tables using the relationships from the analysis and qualify every column with a table alias.
- Apply the filters, aggregations, grouping, ordering and limit from the analysis.
- Use readable column aliases.
- Respond with the SQL query only, no explanation and no comments."#,
        schema = schema.to_prompt_json(),
        sample = SAMPLE_DATA,
        display_type = display_type,
        guidance = display_guidance(display_type),
    )
}

pub fn generation_user(question: &str, analysis: &QueryAnalysis) -> String {
    let analysis_json = serde_json::to_string_pretty(analysis).unwrap_or_default();
    format!("Question: {question}\n\nAnalysis:\n{analysis_json}\n\nWrite the SQL query that answers this question.")
}
