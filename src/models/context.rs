use serde::{Deserialize, Serialize};

use crate::models::analysis::{DisplayRecommendation, QueryAnalysis};
use crate::models::display::{DisplayPayload, ResultRow};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub question: Option<String>, // 用户提问内容
    #[serde(default)]
    pub request_display_type: bool, // 是否需要渲染层展示数据
}

/// 一次问答的完整响应，缓存中保存的也是这个结构
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub question: String,
    pub analysis: QueryAnalysis,
    pub sql_query: String,
    pub results: Vec<ResultRow>,
    pub display: DisplayRecommendation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_data: Option<DisplayPayload>,
}

impl QueryResponse {
    /// 按调用方是否需要展示数据裁剪响应
    pub fn for_caller(mut self, wants_display: bool) -> Self {
        if !wants_display {
            self.display_data = None;
        }
        self
    }
}
