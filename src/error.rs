use thiserror::Error;

/// 查询链路的错误分类
///
/// 除 `InvalidRequest` 外，其余错误都在编排层被捕获，
/// 转换为结构化的 4xx 响应，不会以传输层故障的形式泄漏给调用方。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Question is required")]
    InvalidRequest,

    #[error("Failed to analyze query: {0}")]
    AnalysisFailure(String),

    #[error("Failed to generate SQL query: {0}")]
    GenerationFailure(String),

    #[error("Failed to execute query: {0}")]
    ExecutionFailure(String),

    #[error("Unknown display type: {0}")]
    UnknownDisplay(String),
}

impl QueryError {
    /// 客户端输入错误 (快速失败，无副作用)
    pub fn is_client_error(&self) -> bool {
        matches!(self, QueryError::InvalidRequest)
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;
