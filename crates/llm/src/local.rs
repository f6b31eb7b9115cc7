//! Local HTTP endpoint provider.
//!
//! The endpoint receives `{"description": ...}` (plus `previousViolations`
//! on a re-prompt) and answers either with a backlog object directly or with
//! a wrapper whose `text`, `output` or `result` member holds the model text.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{BacklogGenerator, BacklogPrompt, GenerationError};
use serde_json::{json, Value};
use tracing::debug;

use crate::extract::extract_json;
use crate::http::{build_client, send};

const ANSWER_FIELDS: [&str; 3] = ["text", "output", "result"];

#[derive(Debug, Clone)]
pub struct LocalEndpointGenerator {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl LocalEndpointGenerator {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, GenerationError> {
        let endpoint = endpoint.into().trim().to_string();
        if endpoint.is_empty() {
            return Err(GenerationError::NotConfigured(
                "local endpoint URL is empty".into(),
            ));
        }
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BacklogGenerator for LocalEndpointGenerator {
    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, prompt: &BacklogPrompt) -> Result<Value, GenerationError> {
        let mut body = json!({ "description": prompt.description });
        if !prompt.previous_violations.is_empty() {
            body["previousViolations"] = json!(prompt.previous_violations);
        }

        let response = send(self.client.post(&self.endpoint).json(&body), self.timeout).await?;
        let answer: Value = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedOutput(format!("local endpoint: {e}")))?;
        debug!(endpoint = %self.endpoint, "Local endpoint answered");
        unwrap_answer(answer)
    }
}

fn unwrap_answer(answer: Value) -> Result<Value, GenerationError> {
    if answer.get("tasks").is_some() {
        return Ok(answer);
    }
    for field in ANSWER_FIELDS {
        match answer.get(field) {
            Some(Value::String(text)) if !text.trim().is_empty() => return extract_json(text),
            Some(inner @ Value::Object(_)) => return Ok(inner.clone()),
            _ => {}
        }
    }
    Err(GenerationError::MalformedOutput(
        "local endpoint returned no backlog".into(),
    ))
}
