//! OpenAI Responses API provider.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use pipeline::{BacklogGenerator, BacklogPrompt, GenerationError};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use tracing::debug;

use crate::extract::extract_json;
use crate::http::send;
use crate::prompt::render_prompt;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gpt-5";

/// Credentials and model selection. The key is kept out of `Debug` output.
#[derive(Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    /// Sent as the `OpenAI-Project` header when set.
    pub project: Option<String>,
    pub base_url: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            project: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

impl fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("project", &self.project)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, GenerationError> {
        let key = config.api_key.trim();
        if key.is_empty() {
            return Err(GenerationError::NotConfigured(
                "OpenAI API key is missing".into(),
            ));
        }

        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| GenerationError::NotConfigured("OpenAI API key is not a valid header".into()))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        if let Some(project) = config.project.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            let value = HeaderValue::from_str(project).map_err(|_| {
                GenerationError::NotConfigured("OpenAI project is not a valid header".into())
            })?;
            headers.insert("openai-project", value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .user_agent(concat!("tasksmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/v1/responses", config.base_url.trim_end_matches('/')),
            model: config.model,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl BacklogGenerator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, prompt: &BacklogPrompt) -> Result<Value, GenerationError> {
        let body = json!({ "model": self.model, "input": render_prompt(prompt) });
        let response = send(self.client.post(&self.url).json(&body), self.timeout).await?;
        let answer: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedOutput(format!("responses API: {e}")))?;

        let text = output_text(&answer);
        debug!(model = %self.model, chars = text.len(), "Responses API answered");
        if text.trim().is_empty() {
            return Err(GenerationError::MalformedOutput(
                "responses API returned no text".into(),
            ));
        }
        extract_json(&text)
    }
}

/// `output_text` when present, otherwise every `output[].content[].text` joined.
fn output_text(answer: &Value) -> String {
    if let Some(text) = answer.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.to_string();
        }
    }
    answer
        .get("output")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("content").and_then(Value::as_array))
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}
