use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, Column, PgPool, Row, TypeInfo};
use tracing::{debug, info};

use crate::core::executor::{QueryStore, StoreError};
use crate::infra::config::AppConfig;
use crate::models::display::ResultRow;

pub async fn init_pool(config: &AppConfig) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    info!("数据库连接池已建立 (max_connections={})", config.db_max_connections);
    Ok(pool)
}

/// Postgres 关系存储: 原样执行 SQL，行按列顺序转为 JSON 对象
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryStore for PgStore {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<ResultRow>, StoreError> {
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::new(e.to_string()))?;
        debug!("数据库返回 {} 行", rows.len());
        Ok(rows.iter().map(pg_row_to_json).collect())
    }
}

// 按数据库原生类型名解码，解不出来的值一律为 null
pub fn pg_row_to_json(row: &PgRow) -> ResultRow {
    let mut map = ResultRow::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let name = col.name();
        let val = match col.type_info().name() {
            "INT2" => json!(row.try_get::<Option<i16>, _>(idx).unwrap_or(None)),
            "INT4" => json!(row.try_get::<Option<i32>, _>(idx).unwrap_or(None)),
            "INT8" => json!(row.try_get::<Option<i64>, _>(idx).unwrap_or(None)),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(idx)
                .unwrap_or(None)
                .map_or(Value::Null, float4_to_json),
            "FLOAT8" => json!(row.try_get::<Option<f64>, _>(idx).unwrap_or(None)),
            "NUMERIC" => row
                .try_get::<Option<Decimal>, _>(idx)
                .unwrap_or(None)
                .map_or(Value::Null, numeric_to_json),
            "BOOL" => json!(row.try_get::<Option<bool>, _>(idx).unwrap_or(None)),
            "DATE" => json!(row
                .try_get::<Option<NaiveDate>, _>(idx)
                .unwrap_or(None)
                .map(|d| d.to_string())),
            "TIME" => json!(row
                .try_get::<Option<NaiveTime>, _>(idx)
                .unwrap_or(None)
                .map(|t| t.to_string())),
            "TIMESTAMP" => json!(row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .unwrap_or(None)
                .map(|dt| dt.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .unwrap_or(None)
                .map_or(Value::Null, timestamptz_to_json),
            "UUID" => json!(row
                .try_get::<Option<uuid::Uuid>, _>(idx)
                .unwrap_or(None)
                .map(|u| u.to_string())),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx).unwrap_or(None).unwrap_or(Value::Null),
            // TEXT / VARCHAR / BPCHAR / NAME 及其它类型，尽量按字符串读取
            _ => json!(row.try_get::<Option<String>, _>(idx).unwrap_or(None)),
        };
        map.insert(name.to_string(), val);
    }
    map
}

// 经由最短十进制文本转成 f64，避免 f32 加宽或 Decimal 直接换算带出二进制尾数；
// NaN / Infinity 没有 JSON 表示，记为 null
fn decimal_text_to_json(text: &str) -> Value {
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

pub fn float4_to_json(v: f32) -> Value {
    decimal_text_to_json(&v.to_string())
}

pub fn numeric_to_json(v: Decimal) -> Value {
    decimal_text_to_json(&v.to_string())
}

pub fn timestamptz_to_json(v: DateTime<Utc>) -> Value {
    Value::String(v.to_rfc3339())
}
