//! Configuration file loading and validation.
//!
//! `.tasksmith/config.toml` is optional: a missing file at the default path
//! yields defaults, while an explicit `--config` path that does not exist is
//! an error. Every section is validated at load so nothing runs with an
//! invalid configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nodes::{CoordinatorSettings, RetrySchedule, SyncSettings, WorkflowSettings};
use pipeline::{
    ApprovalPolicy, ConfigError, CustomFieldId, IssueType, MapperConfig, Priority, ProjectKey,
    ValidationLimits,
};
use serde::Deserialize;

use crate::args::LogFormat;

pub const DEFAULT_CONFIG_PATH: &str = ".tasksmith/config.toml";
pub const DEFAULT_RECORDS_PATH: &str = ".tasksmith/records.json";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// `[tracker]`: where issues go and how the backlog vocabulary maps onto it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerSection {
    pub base_url: String,
    pub email: String,
    pub project: String,
    #[serde(default)]
    pub story_points_field: Option<String>,
    #[serde(default)]
    pub default_priority: Option<String>,
    #[serde(default = "default_tracker_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Backlog type name (`Story`, `Task`, `Bug`) to tracker issue type.
    /// Empty means the tracker uses the same names.
    #[serde(default)]
    pub issue_types: BTreeMap<String, String>,
    /// Backlog priority name to tracker priority. Empty means the same names.
    #[serde(default)]
    pub priorities: BTreeMap<String, String>,
}

fn default_tracker_timeout_secs() -> u64 {
    30
}

/// `[generator]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorSection {
    /// Tried before OpenAI when set.
    pub local_endpoint: Option<String>,
    pub model: String,
    /// Value of the `OpenAI-Project` header.
    pub openai_project: Option<String>,
    pub openai_base_url: String,
    pub timeout_secs: u64,
    /// Re-prompts after a schema rejection.
    pub max_reprompts: u32,
    /// Attempts per generation call on transient failures.
    pub attempts: u32,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            local_endpoint: None,
            model: llm::openai::DEFAULT_MODEL.to_string(),
            openai_project: None,
            openai_base_url: llm::openai::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
            max_reprompts: 2,
            attempts: 3,
        }
    }
}

/// `[sync]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub max_concurrency: usize,
    pub records_path: PathBuf,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 250,
            max_backoff_ms: 8_000,
            request_timeout_secs: 30,
            max_concurrency: 4,
            records_path: PathBuf::from(DEFAULT_RECORDS_PATH),
        }
    }
}

/// `[review]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReviewSection {
    pub policy: ApprovalPolicy,
    pub approval_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            policy: ApprovalPolicy::HostOnly,
            approval_timeout_secs: 300,
            handshake_timeout_secs: 15,
        }
    }
}

/// `[validation]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationSection {
    pub max_tasks: usize,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            max_tasks: ValidationLimits::default().max_tasks,
        }
    }
}

/// `[observability]`
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilitySection {
    pub log_format: LogFormat,
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_level: String,
    /// OTLP gRPC endpoint. `OTEL_EXPORTER_OTLP_ENDPOINT` takes precedence.
    pub otlp_endpoint: Option<String>,
    pub service_name: String,
}

impl Default for ObservabilitySection {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            otlp_endpoint: None,
            service_name: "tasksmith".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub tracker: Option<TrackerSection>,
    pub generator: GeneratorSection,
    pub sync: SyncSection,
    pub review: ReviewSection,
    pub validation: ValidationSection,
    pub observability: ObservabilitySection,
}

impl AppConfig {
    /// Loads the explicit path, or the default path when it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ConfigError::new(format!("failed to read config file {}: {e}", path.display()))
        })?;
        Self::parse(&text)
            .map_err(|e| ConfigError::new(format!("{}: {}", path.display(), e.message)))
    }

    /// Parses and validates TOML text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::new(format!("invalid TOML: {e}")))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if let Some(tracker) = &self.tracker {
            check_http_url("tracker.base_url", &tracker.base_url)?;
            if tracker.email.trim().is_empty() {
                return Err(ConfigError::new("tracker.email must not be empty"));
            }
            nonzero("tracker.request_timeout_secs", tracker.request_timeout_secs)?;
            self.mapper_config()?;
        }

        if let Some(endpoint) = &self.generator.local_endpoint {
            check_http_url("generator.local_endpoint", endpoint)?;
        }
        check_http_url("generator.openai_base_url", &self.generator.openai_base_url)?;
        nonzero("generator.timeout_secs", self.generator.timeout_secs)?;
        nonzero("generator.attempts", self.generator.attempts.into())?;

        let sync = &self.sync;
        nonzero("sync.max_attempts", sync.max_attempts.into())?;
        nonzero("sync.request_timeout_secs", sync.request_timeout_secs)?;
        nonzero("sync.max_concurrency", sync.max_concurrency as u64)?;
        if sync.initial_backoff_ms > sync.max_backoff_ms {
            return Err(ConfigError::new(
                "sync.initial_backoff_ms must not exceed sync.max_backoff_ms",
            ));
        }

        nonzero("review.approval_timeout_secs", self.review.approval_timeout_secs)?;
        nonzero("review.handshake_timeout_secs", self.review.handshake_timeout_secs)?;
        nonzero("validation.max_tasks", self.validation.max_tasks as u64)?;
        Ok(())
    }

    /// The `[tracker]` section, required by commands that map or sync.
    pub fn tracker(&self) -> Result<&TrackerSection, ConfigError> {
        self.tracker
            .as_ref()
            .ok_or_else(|| ConfigError::new("a [tracker] section is required for this command"))
    }

    pub fn mapper_config(&self) -> Result<MapperConfig, ConfigError> {
        let tracker = self.tracker()?;
        let project = ProjectKey::new(tracker.project.trim())
            .ok_or_else(|| ConfigError::new("tracker.project must not be empty"))?;
        let mut config = MapperConfig::canonical(project);

        for (name, tracker_name) in &tracker.issue_types {
            let issue_type = IssueType::parse(name).ok_or_else(|| {
                ConfigError::new(format!("tracker.issue_types: unknown backlog type '{name}'"))
            })?;
            config.issue_types.insert(issue_type, tracker_name.clone());
        }
        for (name, tracker_name) in &tracker.priorities {
            let priority = Priority::parse(name).ok_or_else(|| {
                ConfigError::new(format!("tracker.priorities: unknown backlog priority '{name}'"))
            })?;
            config.priorities.insert(priority, tracker_name.clone());
        }

        config.story_points_field = match tracker.story_points_field.as_deref() {
            None => None,
            Some(field) => Some(CustomFieldId::new(field.trim()).ok_or_else(|| {
                ConfigError::new("tracker.story_points_field must not be empty")
            })?),
        };
        config.default_priority = tracker.default_priority.clone();
        config.check()?;
        Ok(config)
    }

    pub fn jira_config(&self, token: Option<&str>) -> Result<jira::JiraConfig, ConfigError> {
        let tracker = self.tracker()?;
        let token = token.ok_or_else(|| {
            ConfigError::new("TASKSMITH_JIRA_TOKEN must be set to talk to the tracker")
        })?;
        Ok(
            jira::JiraConfig::new(&tracker.base_url, tracker.email.clone(), token)?
                .with_request_timeout(Duration::from_secs(tracker.request_timeout_secs)),
        )
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            retry: RetrySchedule {
                max_attempts: self.sync.max_attempts,
                initial_backoff: Duration::from_millis(self.sync.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.sync.max_backoff_ms),
            },
            request_timeout: Duration::from_secs(self.sync.request_timeout_secs),
            max_concurrency: self.sync.max_concurrency,
        }
    }

    pub fn limits(&self) -> ValidationLimits {
        ValidationLimits {
            max_tasks: self.validation.max_tasks,
        }
    }

    pub fn workflow_settings(&self) -> WorkflowSettings {
        let defaults = WorkflowSettings::default();
        WorkflowSettings {
            limits: self.limits(),
            max_reprompts: self.generator.max_reprompts,
            generation_timeout: Duration::from_secs(self.generator.timeout_secs),
            generation_retry: RetrySchedule {
                max_attempts: self.generator.attempts,
                ..defaults.generation_retry
            },
            approval_timeout: Duration::from_secs(self.review.approval_timeout_secs),
        }
    }

    /// Settings for embedding a review session; the CLI itself runs single-user.
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            policy: self.review.policy,
            handshake_timeout: Duration::from_secs(self.review.handshake_timeout_secs),
            ..CoordinatorSettings::default()
        }
    }
}

fn check_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let value = value.trim();
    let host = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"));
    match host {
        Some(rest) if !rest.is_empty() => Ok(()),
        _ => Err(ConfigError::new(format!(
            "{field} must be an http(s) URL, got '{value}'"
        ))),
    }
}

fn nonzero(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::new(format!("{field} must be greater than zero")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const FULL: &str = r#"
        [tracker]
        base_url = "https://acme.atlassian.net/"
        email = "me@acme.io"
        project = "PROJ"
        story_points_field = "customfield_10016"
        default_priority = "Medium"

        [tracker.issue_types]
        Story = "User Story"

        [generator]
        local_endpoint = "http://localhost:7071/api/generate"
        max_reprompts = 1

        [sync]
        max_concurrency = 2
        records_path = "state/records.json"

        [review]
        policy = "unanimous"

        [validation]
        max_tasks = 10

        [observability]
        log_format = "json"
    "#;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert!(config.tracker.is_none());
        assert_eq!(config.sync.records_path, PathBuf::from(DEFAULT_RECORDS_PATH));
        assert_eq!(config.limits(), ValidationLimits::default());
        assert!(config.mapper_config().is_err());
    }

    #[test]
    fn full_file_resolves_every_section() {
        let config = AppConfig::parse(FULL).unwrap();

        let mapper = config.mapper_config().unwrap();
        assert_eq!(mapper.project.as_str(), "PROJ");
        assert_eq!(mapper.issue_types[&IssueType::Story], "User Story");
        assert_eq!(mapper.issue_types[&IssueType::Bug], "Bug");
        assert_eq!(
            mapper.story_points_field.unwrap().as_str(),
            "customfield_10016"
        );
        assert_eq!(mapper.default_priority.as_deref(), Some("Medium"));

        assert_eq!(config.sync_settings().max_concurrency, 2);
        assert_eq!(config.workflow_settings().max_reprompts, 1);
        assert_eq!(config.limits().max_tasks, 10);
        assert_eq!(config.coordinator_settings().policy, ApprovalPolicy::Unanimous);
        assert_eq!(config.observability.log_format, LogFormat::Json);

        let jira = config.jira_config(Some("token")).unwrap();
        assert_eq!(jira.base_url(), "https://acme.atlassian.net");
        assert!(config.jira_config(None).is_err());
    }

    #[test]
    fn unknown_vocabulary_is_rejected() {
        let text = r#"
            [tracker]
            base_url = "https://acme.atlassian.net"
            email = "me@acme.io"
            project = "PROJ"
            [tracker.priorities]
            Urgent = "P0"
        "#;
        let err = AppConfig::parse(text).unwrap_err();
        assert!(err.message.contains("Urgent"), "{err}");
    }

    #[test]
    fn invalid_values_are_rejected_at_load() {
        for text in [
            "[sync]\nmax_concurrency = 0",
            "[sync]\ninitial_backoff_ms = 9000\nmax_backoff_ms = 100",
            "[generator]\nlocal_endpoint = \"localhost:7071\"",
            "[validation]\nmax_tasks = 0",
            "[review]\npolicy = \"majority\"",
            "[sync]\nunknown_key = 1",
        ] {
            assert!(AppConfig::parse(text).is_err(), "accepted: {text}");
        }
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn explicit_file_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();
        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.tracker().unwrap().project, "PROJ");
    }
}
