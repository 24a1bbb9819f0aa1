use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::models::context::QueryResponse;

pub const DEFAULT_TTL_SECS: i64 = 5 * 60;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub timestamp: DateTime<Utc>,
    pub response: Arc<QueryResponse>,
}

/// 进程级响应缓存，键为归一化后的问题文本
///
/// 条目只会被整体替换，不会原地修改。同一个键的并发写入以最后一次为准。
#[derive(Clone)]
pub struct ResponseCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            ttl,
        }
    }

    pub fn with_system_clock(ttl: Duration) -> Self {
        Self::new(ttl, Arc::new(SystemClock))
    }

    /// trim + 小写
    pub fn normalize_key(question: &str) -> String {
        question.trim().to_lowercase()
    }

    fn is_fresh(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.timestamp < self.ttl
    }

    /// TTL 内命中则原样返回；过期条目顺手删除
    pub fn get(&self, key: &str) -> Option<Arc<QueryResponse>> {
        let now = self.clock.now();
        {
            let entry = self.entries.get(key)?;
            if self.is_fresh(&entry, now) {
                return Some(entry.response.clone());
            }
        }
        // 读锁释放后再删，避免同分片死锁
        self.entries.remove_if(key, |_, e| !self.is_fresh(e, now));
        None
    }

    pub fn put(&self, key: String, response: Arc<QueryResponse>) {
        let entry = CacheEntry {
            timestamp: self.clock.now(),
            response,
        };
        self.entries.insert(key, entry);
    }

    /// 全量清理过期条目，可与读写及其它清理并发执行
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let removed = keys
            .iter()
            .filter(|k| self.entries.remove_if(*k, |_, e| !self.is_fresh(e, now)).is_some())
            .count();
        if removed > 0 {
            debug!("缓存清理完成，移除 {} 个过期条目", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub use manual::ManualClock;
