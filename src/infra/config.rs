use anyhow::{anyhow, Context};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::core::cache::DEFAULT_TTL_SECS;

/// 缓存 TTL 上限 (30 天)
pub const MAX_CACHE_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// 启动时从环境变量读取一次的配置
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f64,
    pub schema_metadata_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub cache_ttl_secs: i64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 纯函数版本，测试里传入自定义的 key 查找
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let database_url = get("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;
        let llm_api_key = get("LLM_API_KEY")
            .or_else(|| get("XAI_API_KEY"))
            .ok_or_else(|| anyhow!("LLM_API_KEY (或 XAI_API_KEY) must be set"))?;

        let cache_ttl_secs: i64 = parse_or(&get, "CACHE_TTL_SECS", DEFAULT_TTL_SECS)?;
        if !(1..=MAX_CACHE_TTL_SECS).contains(&cache_ttl_secs) {
            return Err(anyhow!(
                "CACHE_TTL_SECS 必须在 1..={} 之间: {}",
                MAX_CACHE_TTL_SECS,
                cache_ttl_secs
            ));
        }

        Ok(Self {
            database_url,
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 5)?,
            llm_api_key,
            llm_base_url: get("LLM_BASE_URL").unwrap_or_else(|| "https://api.x.ai/v1".to_string()),
            llm_model: get("LLM_MODEL").unwrap_or_else(|| "grok-3-beta".to_string()),
            llm_temperature: parse_or(&get, "LLM_TEMPERATURE", 0.1)?,
            schema_metadata_path: get("SCHEMA_METADATA_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data/db_metadata.json")),
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            cache_ttl_secs,
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} 的值无效: {}", key, raw)),
        None => Ok(default),
    }
}
