mod api;
mod core;
mod error;
mod infra;
mod models;
mod service;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::analyze::create_router;
use crate::core::analyzer::QueryAnalyzer;
use crate::core::cache::ResponseCache;
use crate::core::executor::QueryExecutor;
use crate::core::generator::SqlGenerator;
use crate::core::llm::OpenAiClient;
use crate::core::repair::GroupByRepair;
use crate::infra::config::AppConfig;
use crate::infra::store::{init_pool, PgStore};
use crate::models::schema::SchemaMetadata;
use crate::service::query_service::QueryService;

pub mod ax_state {
    use crate::service::query_service::QueryService;

    pub struct AppState {
        pub service: QueryService,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let pool = init_pool(&config).await?;

    let schema = Arc::new(SchemaMetadata::load(&config.schema_metadata_path)?);
    info!(
        "已加载 schema 元数据: {} 张表 ({})",
        schema.table_names().count(),
        config.schema_metadata_path.display()
    );

    let llm = Arc::new(OpenAiClient::new(
        config.llm_api_key.clone(),
        config.llm_base_url.clone(),
        config.llm_model.clone(),
        config.llm_temperature,
    ));

    let service = QueryService::new(
        QueryAnalyzer::new(llm.clone(), schema.clone()),
        SqlGenerator::new(llm, schema),
        QueryExecutor::new(Arc::new(PgStore::new(pool)), Arc::new(GroupByRepair)),
        ResponseCache::with_system_clock(chrono::Duration::seconds(config.cache_ttl_secs)),
    );
    let state = Arc::new(ax_state::AppState { service });

    let app = create_router(state);

    info!("🚀 NLQ Backend 运行在 http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
