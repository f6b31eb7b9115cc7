//! Connection settings for a Jira Cloud site.

use std::fmt;
use std::time::Duration;

use pipeline::ConfigError;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and as whom to talk to Jira.
///
/// The API token is kept out of `Debug` output.
#[derive(Clone)]
pub struct JiraConfig {
    base_url: String,
    email: String,
    api_token: String,
    request_timeout: Duration,
}

impl JiraConfig {
    /// Validates and normalizes the connection settings.
    ///
    /// Trailing slashes are removed from `base_url`, which must use `http` or
    /// `https`. Email and token must be non-blank.
    pub fn new(
        base_url: impl AsRef<str>,
        email: impl Into<String>,
        api_token: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = base_url.as_ref().trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ConfigError::new(format!(
                "tracker base URL '{base_url}' must start with http:// or https://"
            )));
        }
        if base_url.split("://").nth(1).is_none_or(str::is_empty) {
            return Err(ConfigError::new("tracker base URL has no host"));
        }

        let email = email.into();
        if email.trim().is_empty() {
            return Err(ConfigError::new("tracker email must not be empty"));
        }
        let api_token = api_token.into();
        if api_token.trim().is_empty() {
            return Err(ConfigError::new("tracker API token must not be empty"));
        }

        Ok(Self {
            base_url,
            email,
            api_token,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub(crate) fn api_token(&self) -> &str {
        &self.api_token
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Absolute URL of a REST path such as `/rest/api/3/issue`.
    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl fmt::Debug for JiraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JiraConfig")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .field("api_token", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
