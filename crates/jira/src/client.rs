//! Jira REST v3 client.

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    IssueKey, IssuePayload, IssueTracker, RemoteIssue, RemoteIssueId, RemoteRevision,
    TrackerApiError,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::adf::to_adf;
use crate::config::JiraConfig;

const ISSUE_PATH: &str = "/rest/api/3/issue";

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    id: String,
    #[serde(default)]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    fields: UpdatedField,
}

#[derive(Debug, Deserialize)]
struct UpdatedField {
    #[serde(default)]
    updated: Option<String>,
}

/// [`IssueTracker`] backed by a Jira Cloud site.
#[derive(Debug, Clone)]
pub struct JiraTracker {
    client: Client,
    config: JiraConfig,
}

impl JiraTracker {
    /// Builds the HTTP client with the configured timeout and JSON headers.
    pub fn new(config: JiraConfig) -> Result<Self, TrackerApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .user_agent(concat!("tasksmith/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TrackerApiError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &JiraConfig {
        &self.config
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(self.config.email(), Some(self.config.api_token()))
    }

    fn issue_url(&self, id: &RemoteIssueId) -> String {
        self.config.url(&format!("{ISSUE_PATH}/{}", id.as_str()))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TrackerApiError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, retry_after, body))
    }

    fn transport_error(&self, error: reqwest::Error) -> TrackerApiError {
        if error.is_timeout() {
            TrackerApiError::Timeout(self.config.request_timeout())
        } else {
            TrackerApiError::Network(error.to_string())
        }
    }
}

#[async_trait]
impl IssueTracker for JiraTracker {
    async fn create_issue(&self, payload: &IssuePayload) -> Result<RemoteIssue, TrackerApiError> {
        let body = json!({ "fields": fields_for(payload) });
        let response = self
            .send(self.client.post(self.config.url(ISSUE_PATH)).json(&body))
            .await?;
        let created: CreatedIssue = response
            .json()
            .await
            .map_err(|e| TrackerApiError::Decode(format!("create response: {e}")))?;

        let id = RemoteIssueId::new(created.id)
            .ok_or_else(|| TrackerApiError::Decode("create response has an empty id".into()))?;
        let key = created.key.and_then(IssueKey::new);
        debug!(remote_id = %id, key = ?key.as_ref().map(IssueKey::as_str), "Created Jira issue");
        Ok(RemoteIssue { id, key })
    }

    async fn update_issue(
        &self,
        id: &RemoteIssueId,
        payload: &IssuePayload,
    ) -> Result<(), TrackerApiError> {
        let body = json!({ "fields": edit_fields_for(payload) });
        self.send(self.client.put(self.issue_url(id)).json(&body))
            .await?;
        debug!(remote_id = %id, "Updated Jira issue");
        Ok(())
    }

    async fn issue_revision(
        &self,
        id: &RemoteIssueId,
    ) -> Result<Option<RemoteRevision>, TrackerApiError> {
        let response = self
            .send(
                self.client
                    .get(self.issue_url(id))
                    .query(&[("fields", "updated")]),
            )
            .await?;
        let issue: IssueFields = response
            .json()
            .await
            .map_err(|e| TrackerApiError::Decode(format!("issue response: {e}")))?;
        Ok(issue.fields.updated.and_then(RemoteRevision::new))
    }
}

/// The `fields` object sent on create.
pub fn fields_for(payload: &IssuePayload) -> Value {
    let mut fields = Map::new();
    fields.insert("project".into(), json!({ "key": payload.project.as_str() }));
    fields.insert("issuetype".into(), json!({ "name": payload.issue_type }));
    if let Value::Object(editable) = edit_fields_for(payload) {
        fields.extend(editable);
    }
    Value::Object(fields)
}

/// The `fields` object sent on update.
///
/// Jira refuses `project` on the edit endpoint, and moving an issue between
/// types needs a separate workflow, so both are left out.
pub fn edit_fields_for(payload: &IssuePayload) -> Value {
    let mut fields = Map::new();
    fields.insert("summary".into(), json!(payload.summary));
    fields.insert("description".into(), to_adf(&payload.description));
    fields.insert("labels".into(), json!(payload.labels));
    if let Some(priority) = &payload.priority {
        fields.insert("priority".into(), json!({ "name": priority }));
    }
    for (field, value) in &payload.custom_fields {
        fields.insert(field.as_str().to_string(), value.clone());
    }
    Value::Object(fields)
}

/// Maps a non-success status to the retry taxonomy.
fn classify(status: StatusCode, retry_after: Option<Duration>, body: String) -> TrackerApiError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        TrackerApiError::Server {
            status: status.as_u16(),
            body,
            retry_after,
        }
    } else {
        TrackerApiError::Rejected {
            status: status.as_u16(),
            body,
        }
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
