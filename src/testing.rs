//! 测试用桩实现: 固定回复的理解服务与关系存储

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::core::executor::{QueryStore, StoreError};
use crate::core::llm::{LanguageModel, LlmError, Prompt};
use crate::models::display::ResultRow;

/// 按顺序返回预设回复，并记录收到的 prompt
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    prompts: Mutex<Vec<Prompt>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyCompletion))
    }
}

/// 按顺序返回预设结果集或错误，并记录执行过的 SQL
pub struct ScriptedStore {
    results: Mutex<VecDeque<Result<Vec<ResultRow>, StoreError>>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedStore {
    pub fn new(results: Vec<Result<Vec<ResultRow>, StoreError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryStore for ScriptedStore {
    async fn fetch_rows(&self, query: &str) -> Result<Vec<ResultRow>, StoreError> {
        self.queries.lock().unwrap().push(query.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(StoreError::new("no scripted result")))
    }
}

/// 测试数据: JSON 对象数组 -> 结果集
pub fn rows(value: serde_json::Value) -> Vec<ResultRow> {
    value
        .as_array()
        .map(|items| items.iter().filter_map(|v| v.as_object().cloned()).collect())
        .unwrap_or_default()
}
