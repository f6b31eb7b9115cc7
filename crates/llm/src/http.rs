//! Shared HTTP plumbing for the generator adapters.

use std::time::Duration;

use pipeline::GenerationError;
use reqwest::{Client, RequestBuilder, Response};

pub(crate) fn build_client(timeout: Duration) -> Result<Client, GenerationError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("tasksmith/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| GenerationError::NotConfigured(format!("failed to build HTTP client: {e}")))
}

/// Sends the request and turns non-success statuses into [`GenerationError::Http`].
pub(crate) async fn send(
    request: RequestBuilder,
    timeout: Duration,
) -> Result<Response, GenerationError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            GenerationError::Timeout(timeout)
        } else {
            GenerationError::Network(e.to_string())
        }
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GenerationError::Http {
        status: status.as_u16(),
        body,
    })
}
