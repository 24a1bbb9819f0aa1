use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM API call failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No content in LLM response")]
    EmptyCompletion,
}

/// 期望的返回格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Text,
}

#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub format: ResponseFormat,
}

/// 理解服务能力: prompt -> 文本
///
/// 不可信、有延迟、偶尔返回畸形内容。测试中用固定回复的桩实现替换。
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;
}

/// OpenAI 兼容的 chat/completions 客户端
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, model: String, temperature: f64) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
        }
    }

    fn request_body(&self, prompt: &Prompt) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": self.temperature,
        });
        if prompt.format == ResponseFormat::Json {
            body["response_format"] = json!({"type": "json_object"});
        }
        body
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.model, format = ?prompt.format))]
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion)?;

        debug!("理解服务返回 {} 字符", content.len());
        Ok(content.to_string())
    }
}

const FENCE_TAGS: &[&str] = &["postgresql", "postgres", "pgsql", "sql", "SQL", "json", "JSON"];

/// 去掉理解服务可能包裹的 markdown 代码块
pub fn strip_code_fence(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```") {
        // 跳过语言标记 (```sql / ```json)
        text = FENCE_TAGS
            .iter()
            .find_map(|tag| rest.strip_prefix(tag))
            .unwrap_or(rest);
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}
