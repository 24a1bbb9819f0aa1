use std::sync::Arc;
use tracing::{error, info, instrument};

use crate::core::analyzer::QueryAnalyzer;
use crate::core::cache::ResponseCache;
use crate::core::classifier::classify;
use crate::core::executor::QueryExecutor;
use crate::core::generator::SqlGenerator;
use crate::core::greeting::{is_greeting, GREETING_REPLY, GREETING_TITLE};
use crate::error::{QueryError, Result};
use crate::models::analysis::{DisplayRecommendation, DisplayType, QueryAnalysis};
use crate::models::context::QueryResponse;

/// 问答编排: 问候短路 -> 缓存 -> 分析 -> 生成 -> 执行 -> 展示推断 -> 写缓存
///
/// 每次调用相互独立，唯一共享的可变状态是响应缓存。
pub struct QueryService {
    analyzer: QueryAnalyzer,
    generator: SqlGenerator,
    executor: QueryExecutor,
    cache: ResponseCache,
}

impl QueryService {
    pub fn new(
        analyzer: QueryAnalyzer,
        generator: SqlGenerator,
        executor: QueryExecutor,
        cache: ResponseCache,
    ) -> Self {
        Self {
            analyzer,
            generator,
            executor,
            cache,
        }
    }

    #[instrument(skip(self), fields(request_id = %uuid::Uuid::new_v4()))]
    pub async fn answer(&self, question: &str, wants_display: bool) -> Result<QueryResponse> {
        if question.trim().is_empty() {
            return Err(QueryError::InvalidRequest);
        }

        // 1. 问候语不碰存储也不调理解服务
        if is_greeting(question) {
            info!("识别为问候语，直接返回");
            return Ok(greeting_response(question).for_caller(wants_display));
        }

        // 2. 缓存命中原样返回
        let cache_key = ResponseCache::normalize_key(question);
        if let Some(cached) = self.cache.get(&cache_key) {
            info!("命中缓存: {}", cache_key);
            return Ok(cached.as_ref().clone().for_caller(wants_display));
        }

        // 3-5. 完整链路，失败不写缓存
        let response = self.resolve(question).await.inspect_err(|e| {
            error!("问答链路失败: {}", e);
        })?;
        let response = Arc::new(response);

        // 6. 写缓存，并在后台异步清理过期条目
        self.cache.put(cache_key, response.clone());
        let cache = self.cache.clone();
        tokio::spawn(async move {
            cache.sweep();
        });

        Ok(response.as_ref().clone().for_caller(wants_display))
    }

    async fn resolve(&self, question: &str) -> Result<QueryResponse> {
        let analysis = self.analyzer.analyze(question).await?;
        let sql = self.generator.generate(question, &analysis).await?;
        info!("执行 SQL: {}", sql);
        let execution = self.executor.execute(&sql).await?;

        let classification = classify(question, &execution.rows);
        info!(
            "展示推断: {} (建议: {})",
            classification.display_type, analysis.display_recommendation.display_type
        );

        // display 是理解服务给出的建议，displayData 由实际结果形态决定，两者可以不一致
        Ok(QueryResponse {
            question: question.to_string(),
            display: analysis.display_recommendation.clone(),
            analysis,
            sql_query: execution.query_text,
            results: execution.rows,
            display_data: Some(classification.payload),
        })
    }
}

fn greeting_response(question: &str) -> QueryResponse {
    let display = DisplayRecommendation {
        display_type: DisplayType::Text,
        title: GREETING_TITLE.to_string(),
        description: GREETING_REPLY.join(" "),
    };
    let classification = classify(question, &[]);
    QueryResponse {
        question: question.to_string(),
        analysis: QueryAnalysis::empty(display.clone()),
        sql_query: String::new(),
        results: Vec::new(),
        display,
        display_data: Some(classification.payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::{ManualClock, DEFAULT_TTL_SECS};
    use crate::core::executor::StoreError;
    use crate::core::repair::GroupByRepair;
    use crate::models::display::DisplayPayload;
    use crate::models::schema::SchemaMetadata;
    use crate::testing::{rows, ScriptedModel, ScriptedStore};
    use chrono::Duration;
    use serde_json::json;

    struct Harness {
        service: QueryService,
        model: Arc<ScriptedModel>,
        store: Arc<ScriptedStore>,
        clock: Arc<ManualClock>,
    }

    fn harness(replies: Vec<String>, results: Vec<std::result::Result<Vec<crate::models::display::ResultRow>, StoreError>>) -> Harness {
        let schema = Arc::new(
            SchemaMetadata::from_document(json!({
                "public.marksheets": {}, "public.subjects": {}, "public.subject_metadatas": {}
            }))
            .unwrap(),
        );
        let model = Arc::new(ScriptedModel::new(replies.into_iter().map(Ok).collect()));
        let store = Arc::new(ScriptedStore::new(results));
        let clock = Arc::new(ManualClock::new());
        let service = QueryService::new(
            QueryAnalyzer::new(model.clone(), schema.clone()),
            SqlGenerator::new(model.clone(), schema),
            QueryExecutor::new(store.clone(), Arc::new(GroupByRepair)),
            ResponseCache::new(Duration::seconds(DEFAULT_TTL_SECS), clock.clone()),
        );
        Harness {
            service,
            model,
            store,
            clock,
        }
    }

    const PASS_RATE_ANALYSIS: &str = r#"{
        "relevantTables": ["subjects", "subject_metadatas"],
        "displayRecommendation": {"displayType": "numberCard", "title": "Pass Rate", "description": "Physics pass rate"}
    }"#;

    const PASS_RATE_SQL: &str = "SELECT sm.name AS \"Subject Name\", 76.47 AS \"Pass Rate\" FROM subjects s JOIN subject_metadatas sm ON s.subject_metadata_id_fk = sm.id";

    #[tokio::test]
    async fn blank_question_is_invalid_request() {
        let h = harness(vec![], vec![]);
        for q in ["", "   \n"] {
            assert_eq!(h.service.answer(q, true).await.unwrap_err(), QueryError::InvalidRequest);
        }
        assert_eq!(h.model.calls(), 0);
    }

    #[tokio::test]
    async fn greeting_never_touches_service_or_store() {
        let h = harness(vec![], vec![]);
        for q in ["hi", "Hello!", "who are you?"] {
            let resp = h.service.answer(q, true).await.unwrap();
            assert_eq!(resp.display.display_type, DisplayType::Text);
            assert!(matches!(resp.display_data, Some(DisplayPayload::Paragraphs { .. })));
            assert!(resp.sql_query.is_empty());
        }
        assert_eq!(h.model.calls(), 0);
        assert!(h.store.queries().is_empty());
        assert!(h.service.cache.is_empty());
    }

    #[tokio::test]
    async fn full_pipeline_assembles_response() {
        let h = harness(
            vec![PASS_RATE_ANALYSIS.to_string(), PASS_RATE_SQL.to_string()],
            vec![Ok(rows(json!([{"Subject Name": "Physics", "Pass Rate": 76.47}])))],
        );

        let resp = h.service.answer("What's the pass rate for Physics?", true).await.unwrap();
        assert_eq!(resp.question, "What's the pass rate for Physics?");
        assert_eq!(resp.sql_query, PASS_RATE_SQL);
        // 建议是 numberCard，但单行两列的结果按表格展示
        assert_eq!(resp.display.display_type, DisplayType::NumberCard);
        assert_eq!(
            resp.display_data,
            Some(DisplayPayload::Table {
                headers: vec!["Subject Name".into(), "Pass Rate".into()],
                rows: vec![vec!["Physics".into(), "76.47".into()]],
            })
        );
        assert_eq!(h.model.calls(), 2);
        assert_eq!(h.store.queries(), vec![PASS_RATE_SQL.to_string()]);
    }

    #[tokio::test]
    async fn display_payload_only_when_requested() {
        let h = harness(
            vec![PASS_RATE_ANALYSIS.to_string(), PASS_RATE_SQL.to_string()],
            vec![Ok(rows(json!([{"Subject Name": "Physics", "Pass Rate": 76.47}])))],
        );
        let resp = h.service.answer("pass rate for physics", false).await.unwrap();
        assert!(resp.display_data.is_none());

        // 缓存里保留完整数据，后续请求可以要
        let again = h.service.answer("pass rate for physics", true).await.unwrap();
        assert!(again.display_data.is_some());
        assert_eq!(h.model.calls(), 2);
    }

    #[tokio::test]
    async fn identical_question_within_ttl_is_served_from_cache() {
        let h = harness(
            vec![PASS_RATE_ANALYSIS.to_string(), PASS_RATE_SQL.to_string()],
            vec![Ok(rows(json!([{"Subject Name": "Physics", "Pass Rate": 76.47}])))],
        );

        let first = h.service.answer("What's the pass rate for Physics?", true).await.unwrap();
        h.clock.advance(Duration::seconds(120));
        let second = h.service.answer("  what's the PASS RATE for physics?  ", true).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first.results).unwrap(),
            serde_json::to_vec(&second.results).unwrap()
        );
        assert_eq!(h.model.calls(), 2);
        assert_eq!(h.store.queries().len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_reruns_the_pipeline() {
        let h = harness(
            vec![
                PASS_RATE_ANALYSIS.to_string(),
                PASS_RATE_SQL.to_string(),
                PASS_RATE_ANALYSIS.to_string(),
                PASS_RATE_SQL.to_string(),
            ],
            vec![
                Ok(rows(json!([{"Subject Name": "Physics", "Pass Rate": 76.47}]))),
                Ok(rows(json!([{"Subject Name": "Physics", "Pass Rate": 80.0}]))),
            ],
        );
        h.service.answer("pass rate for physics", false).await.unwrap();
        h.clock.advance(Duration::seconds(DEFAULT_TTL_SECS + 1));
        let resp = h.service.answer("pass rate for physics", false).await.unwrap();
        assert_eq!(resp.results[0]["Pass Rate"], json!(80.0));
        assert_eq!(h.model.calls(), 4);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let h = harness(
            vec![
                r#"{"relevantTables": ["marksheets"]}"#.to_string(),
                "SELECT * FROM marksheets".to_string(),
                r#"{"relevantTables": ["marksheets"]}"#.to_string(),
                "SELECT * FROM marksheets".to_string(),
            ],
            vec![
                Err(StoreError::new("connection reset by peer")),
                Ok(rows(json!([{"id": 1}]))),
            ],
        );

        let err = h.service.answer("all marksheets", false).await.unwrap_err();
        assert!(matches!(err, QueryError::ExecutionFailure(_)));
        assert!(h.service.cache.is_empty());

        let resp = h.service.answer("all marksheets", false).await.unwrap();
        assert_eq!(resp.results.len(), 1);
        assert_eq!(h.store.queries().len(), 2);
    }

    #[tokio::test]
    async fn repaired_query_is_reported() {
        let h = harness(
            vec![
                r#"{"relevantTables": ["marksheets"]}"#.to_string(),
                "SELECT d.name, COUNT(*) FROM marksheets d GROUP BY d.id".to_string(),
            ],
            vec![
                Err(StoreError::new(r#"column "d.name" must appear in the GROUP BY clause"#)),
                Ok(rows(json!([{"name": "A", "count": 2}, {"name": "B", "count": 3}]))),
            ],
        );
        let resp = h.service.answer("counts per name", true).await.unwrap();
        assert_eq!(resp.sql_query, "SELECT d.name, COUNT(*) FROM marksheets d GROUP BY d.id, d.name");
        assert!(matches!(resp.display_data, Some(DisplayPayload::PieChart(_))));
    }

    #[tokio::test]
    async fn analysis_failure_surfaces_as_error() {
        let h = harness(vec!["not json at all".to_string()], vec![]);
        let err = h.service.answer("how many students", false).await.unwrap_err();
        assert!(matches!(err, QueryError::AnalysisFailure(_)));
        assert!(h.store.queries().is_empty());
    }
}
