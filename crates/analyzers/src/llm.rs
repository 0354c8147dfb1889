use crate::error::{AnalyzerError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub tokens_used: u64,
}

/// Chat-completion port used by agents.
///
/// Each call is independent; providers keep no conversation state.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model_id(&self) -> &str;

    async fn invoke(&self, prompt: &str, system_prompt: Option<&str>) -> Result<LlmResponse>;
}

/// OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiChatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiChatProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AnalyzerError::Llm("LLM API key is empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        })
    }

    pub fn with_sampling(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str, system_prompt: Option<&str>) -> Result<LlmResponse> {
        let mut messages = Vec::new();
        if let Some(system) = system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": prompt}));

        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let response: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        parse_chat_response(&response)
    }
}

fn parse_chat_response(response: &Value) -> Result<LlmResponse> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| AnalyzerError::Llm("response has no choices[0].message.content".into()))?;
    let tokens_used = response
        .pointer("/usage/total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    Ok(LlmResponse {
        content: content.to_string(),
        tokens_used,
    })
}

/// Replays fixed replies in order, then repeats the last one.
///
/// Token usage is the whitespace word count of prompt plus reply.
pub struct ScriptedLlmProvider {
    model: String,
    replies: Mutex<VecDeque<String>>,
    last: Mutex<Option<String>>,
}

impl ScriptedLlmProvider {
    pub fn new(replies: impl IntoIterator<Item = String>) -> Self {
        Self {
            model: "scripted".to_string(),
            replies: Mutex::new(replies.into_iter().collect()),
            last: Mutex::new(None),
        }
    }

    /// Always answers with a neutral assessment
    pub fn neutral() -> Self {
        Self::new([json!({
            "level": "Mid",
            "confidence": 0.5,
            "reasoning": "Offline assessment without a language model.",
            "suggestions": []
        })
        .to_string()])
    }

    fn next_reply(&self) -> Result<String> {
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| AnalyzerError::Llm("scripted provider lock poisoned".into()))?;
        let mut last = self
            .last
            .lock()
            .map_err(|_| AnalyzerError::Llm("scripted provider lock poisoned".into()))?;
        if let Some(reply) = replies.pop_front() {
            *last = Some(reply.clone());
            return Ok(reply);
        }
        last.clone()
            .ok_or_else(|| AnalyzerError::Llm("scripted provider has no replies".into()))
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlmProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str, system_prompt: Option<&str>) -> Result<LlmResponse> {
        let content = self.next_reply()?;
        let words = |text: &str| text.split_whitespace().count() as u64;
        let tokens_used = words(prompt) + system_prompt.map_or(0, words) + words(&content);
        Ok(LlmResponse {
            content,
            tokens_used,
        })
    }
}
