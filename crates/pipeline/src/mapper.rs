//! Translation of verified backlog entries into tracker requests.
//!
//! The mapper is a pure function of a [`Task`] plus a fixed [`MapperConfig`]:
//! mapping the same task twice yields the same [`Fingerprint`], the same
//! payload bytes, and therefore the same [`ContentHash`].
//!
//! ## Lookup tables
//!
//! | Task field | Tracker field | Rule |
//! |------------|---------------|------|
//! | `title` | `summary` | verbatim (already normalized by the validator) |
//! | `type` | `issueType` | `issue_types[type]`; absent → `issue_types[Task]` |
//! | `priority` | `priority` | `priorities[priority]`; absent → `default_priority`, or omitted so the tracker applies its own default |
//! | `labels` | `labels` | sorted, deduplicated |
//! | `storyPoints` | `custom_fields[story_points_field]` | requires the field id to be configured |
//! | `acceptanceCriteria` | `description` | appended as a bulleted block |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::task::{IssueType, Priority, Task, TaskBacklog};
use crate::{ConfigError, ContentHash, CustomFieldId, Fingerprint, ProjectKey};

/// Heading placed above the rendered acceptance criteria.
pub const ACCEPTANCE_CRITERIA_HEADING: &str = "Acceptance criteria:";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tracker vocabulary and field identifiers used by the [`Mapper`].
///
/// None of this is inferred: every issue type and every priority must have an
/// explicit tracker name, otherwise [`Mapper::new`] refuses the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Tracker project issues are created in.
    pub project: ProjectKey,

    /// Custom field that holds story points (e.g. `customfield_10016`).
    ///
    /// Optional as long as no task carries story points.
    #[serde(default)]
    pub story_points_field: Option<CustomFieldId>,

    /// Tracker issue-type name for each [`IssueType`].
    pub issue_types: BTreeMap<IssueType, String>,

    /// Tracker priority name for each [`Priority`].
    pub priorities: BTreeMap<Priority, String>,

    /// Tracker priority name used when a task has no priority.
    ///
    /// `None` omits the field so the tracker applies its project default.
    #[serde(default)]
    pub default_priority: Option<String>,
}

impl MapperConfig {
    /// A configuration whose tracker names equal the canonical variant names.
    ///
    /// Suitable for trackers that ship the stock Jira vocabulary.
    pub fn canonical(project: ProjectKey) -> Self {
        Self {
            project,
            story_points_field: None,
            issue_types: IssueType::ALL
                .into_iter()
                .map(|t| (t, t.as_str().to_string()))
                .collect(),
            priorities: Priority::ALL
                .into_iter()
                .map(|p| (p, p.as_str().to_string()))
                .collect(),
            default_priority: None,
        }
    }

    /// Checks that the lookup tables cover every variant with a non-blank name.
    pub fn check(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        for t in IssueType::ALL {
            if self.issue_types.get(&t).map_or(true, |n| n.trim().is_empty()) {
                missing.push(format!("issue_types.{t}"));
            }
        }
        for p in Priority::ALL {
            if self.priorities.get(&p).map_or(true, |n| n.trim().is_empty()) {
                missing.push(format!("priorities.{p}"));
            }
        }
        if self
            .default_priority
            .as_deref()
            .is_some_and(|n| n.trim().is_empty())
        {
            missing.push("default_priority".to_string());
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::new(format!(
                "tracker vocabulary is incomplete; configure: {}",
                missing.join(", ")
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// A tracker-neutral create/update request for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssuePayload {
    pub project: ProjectKey,
    pub summary: String,
    pub description: String,
    pub issue_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub custom_fields: BTreeMap<CustomFieldId, Value>,
}

impl IssuePayload {
    /// Canonical JSON form: object keys sorted, absent fields omitted.
    pub fn canonical_json(&self) -> Value {
        let custom: serde_json::Map<String, Value> = self
            .custom_fields
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.clone()))
            .collect();
        let mut value = json!({
            "project": self.project.as_str(),
            "summary": self.summary,
            "description": self.description,
            "issueType": self.issue_type,
            "labels": self.labels,
            "customFields": custom,
        });
        if let (Some(priority), Value::Object(map)) = (&self.priority, &mut value) {
            map.insert("priority".to_string(), Value::String(priority.clone()));
        }
        value
    }

    /// Byte encoding hashed into the [`ContentHash`].
    pub fn canonical_bytes(&self) -> Vec<u8> {
        self.canonical_json().to_string().into_bytes()
    }

    pub fn content_hash(&self) -> ContentHash {
        ContentHash::of_bytes(&self.canonical_bytes())
    }
}

/// One backlog entry ready for synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedIssue {
    pub fingerprint: Fingerprint,
    pub content_hash: ContentHash,
    pub payload: IssuePayload,
}

/// A task could not be mapped with the current configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MappingError {
    /// The task has story points but the tracker field for them is unknown.
    #[error("task '{title}' carries story points but no story-points custom field is configured")]
    StoryPointsFieldMissing {
        /// Title of the offending task.
        title: String,
    },
}

// ---------------------------------------------------------------------------
// Mapper
// ---------------------------------------------------------------------------

/// Maps verified backlogs onto tracker payloads.
#[derive(Debug, Clone)]
pub struct Mapper {
    config: MapperConfig,
}

impl Mapper {
    /// Creates a mapper, rejecting incomplete vocabularies.
    pub fn new(config: MapperConfig) -> Result<Self, ConfigError> {
        config.check()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    /// Maps every task of `backlog`, preserving order.
    ///
    /// # Errors
    ///
    /// [`MappingError::StoryPointsFieldMissing`] when a task has story points
    /// and no story-points field is configured. No partial result is returned.
    pub fn map(&self, backlog: &TaskBacklog) -> Result<Vec<MappedIssue>, MappingError> {
        backlog
            .tasks()
            .iter()
            .map(|task| self.map_task(backlog.project_name(), task))
            .collect()
    }

    /// Maps a single task of a backlog named `project_name`.
    pub fn map_task(
        &self,
        project_name: Option<&str>,
        task: &Task,
    ) -> Result<MappedIssue, MappingError> {
        let payload = self.payload_for(task)?;
        Ok(MappedIssue {
            fingerprint: fingerprint_of(project_name, task),
            content_hash: payload.content_hash(),
            payload,
        })
    }

    fn payload_for(&self, task: &Task) -> Result<IssuePayload, MappingError> {
        let mut custom_fields = BTreeMap::new();
        if let Some(points) = task.story_points() {
            let field = self.config.story_points_field.clone().ok_or_else(|| {
                MappingError::StoryPointsFieldMissing {
                    title: task.title().to_string(),
                }
            })?;
            custom_fields.insert(field, json!(points.as_f64()));
        }

        let priority = match task.priority() {
            Some(p) => self.config.priorities.get(&p).cloned(),
            None => self.config.default_priority.clone(),
        };

        Ok(IssuePayload {
            project: self.config.project.clone(),
            summary: task.title().to_string(),
            description: render_description(task),
            issue_type: self
                .config
                .issue_types
                .get(&task.effective_type())
                .cloned()
                .unwrap_or_else(|| task.effective_type().as_str().to_string()),
            priority,
            labels: task.labels().iter().cloned().collect(),
            custom_fields,
        })
    }
}

/// Fingerprint of `task` inside a backlog named `project_name`.
pub fn fingerprint_of(project_name: Option<&str>, task: &Task) -> Fingerprint {
    Fingerprint::derive(project_name, task.title(), task.effective_type().as_str())
}

/// Description text followed by the acceptance criteria as a bulleted block.
fn render_description(task: &Task) -> String {
    let mut out = task.description().unwrap_or_default().trim_end().to_string();
    let criteria: Vec<&str> = task
        .acceptance_criteria()
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .collect();
    if !criteria.is_empty() {
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(ACCEPTANCE_CRITERIA_HEADING);
        for criterion in criteria {
            out.push_str("\n- ");
            out.push_str(criterion);
        }
    }
    out
}
