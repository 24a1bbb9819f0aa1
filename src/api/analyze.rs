use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::ax_state::AppState;
use crate::error::QueryError;
use crate::models::context::{AnalyzeRequest, QueryResponse};

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/analyze", post(analyze_query))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

pub async fn analyze_query(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| ApiError::Internal {
        message: "Invalid request body".to_string(),
        details: rejection.body_text(),
    })?;

    let question = request.question.unwrap_or_default();
    let response = state
        .service
        .answer(&question, request.request_display_type)
        .await?;
    Ok(Json(response))
}

/// 链路错误 -> HTTP 响应
pub enum ApiError {
    Query(QueryError),
    Internal { message: String, details: String },
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::Query(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Query(e) if e.is_client_error() => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response()
            }
            ApiError::Query(e) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "error": format!("Query processing error: {}", e),
                    "details": format!("{:?}", e),
                })),
            )
                .into_response(),
            ApiError::Internal { message, details } => {
                error!("内部错误: {} ({})", message, details);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": message, "details": details })),
                )
                    .into_response()
            }
        }
    }
}
