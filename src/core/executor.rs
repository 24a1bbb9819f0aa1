use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::repair::QueryRepairer;
use crate::error::{QueryError, Result};
use crate::models::display::ResultRow;

/// 关系存储返回的错误，保留数据库原始信息供修复逻辑匹配
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// 关系存储的执行能力
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn fetch_rows(&self, query: &str) -> std::result::Result<Vec<ResultRow>, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub rows: Vec<ResultRow>,
    /// 实际执行成功的 SQL (修复后则为修复文本)
    pub query_text: String,
}

pub struct QueryExecutor {
    store: Arc<dyn QueryStore>,
    repairer: Arc<dyn QueryRepairer>,
}

impl QueryExecutor {
    pub fn new(store: Arc<dyn QueryStore>, repairer: Arc<dyn QueryRepairer>) -> Self {
        Self { store, repairer }
    }

    /// 执行一次；命中可修复的错误时改写并且只重试一次
    #[instrument(skip_all)]
    pub async fn execute(&self, query: &str) -> Result<Execution> {
        let original_err = match self.store.fetch_rows(query).await {
            Ok(rows) => {
                info!("SQL 执行成功，返回 {} 行", rows.len());
                return Ok(Execution {
                    rows,
                    query_text: query.to_string(),
                });
            }
            Err(e) => e,
        };

        let Some(repaired) = self.repairer.repair(query, &original_err.message) else {
            warn!("SQL 执行失败: {}", original_err);
            return Err(QueryError::ExecutionFailure(original_err.message));
        };

        warn!("SQL 执行失败，尝试修复后重试: {}", original_err);
        info!("修复后的 SQL: {}", repaired);
        match self.store.fetch_rows(&repaired).await {
            Ok(rows) => {
                info!("修复后的 SQL 执行成功，返回 {} 行", rows.len());
                Ok(Execution {
                    rows,
                    query_text: repaired,
                })
            }
            Err(retry_err) => {
                warn!("修复后的 SQL 仍然失败: {}", retry_err);
                Err(QueryError::ExecutionFailure(original_err.message))
            }
        }
    }
}
