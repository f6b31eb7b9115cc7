//! Schema validation of untrusted generative output.
//!
//! [`validate`] is the only way to obtain a [`TaskBacklog`]. It is a pure
//! function of its input: it walks the whole document, collects every
//! violation it can find, and either returns the verified backlog or a
//! [`SchemaError`] listing all of them. A single bad entry rejects the whole
//! backlog.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::task::{normalize_title, IssueType, Priority, Task, TaskBacklog};
use crate::StoryPoints;

/// Upper bound on backlog size used by [`validate`].
pub const DEFAULT_MAX_TASKS: usize = 25;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// One schema violation, located by a JSON path such as `tasks[2].priority`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// Path of the offending field (`$` for the document root).
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// The generative output did not conform to the backlog schema.
///
/// Never empty. Recoverable by re-prompting the generator; the output is never
/// coerced into shape.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("backlog failed schema validation with {} violation(s): {}", .violations.len(), render(.violations))]
pub struct SchemaError {
    /// Every violation found, in document order.
    pub violations: Vec<FieldViolation>,
}

impl SchemaError {
    /// Returns `true` if some violation is located at `field`.
    pub fn has_violation_at(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

fn render(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Structural limits applied on top of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationLimits {
    /// Maximum number of tasks accepted in one backlog.
    pub max_tasks: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Validates raw generative output with [`ValidationLimits::default`].
pub fn validate(raw: &Value) -> Result<TaskBacklog, SchemaError> {
    validate_with(raw, &ValidationLimits::default())
}

/// Validates raw generative output against the backlog schema.
///
/// # Errors
///
/// Returns a [`SchemaError`] enumerating every violation when the top level is
/// not an object with a `tasks` array, when any task is malformed, or when the
/// backlog exceeds `limits`.
pub fn validate_with(raw: &Value, limits: &ValidationLimits) -> Result<TaskBacklog, SchemaError> {
    let mut violations = Violations::default();

    let Some(root) = raw.as_object() else {
        violations.push("$", format!("expected an object, found {}", kind_of(raw)));
        return Err(violations.into_error());
    };

    let project_name = optional_string(root, "projectName", "projectName", &mut violations);

    let tasks = match root.get("tasks") {
        None => {
            violations.push("tasks", "missing required field");
            Vec::new()
        }
        Some(Value::Array(items)) => {
            if items.len() > limits.max_tasks {
                violations.push(
                    "tasks",
                    format!(
                        "contains {} tasks, at most {} are accepted",
                        items.len(),
                        limits.max_tasks
                    ),
                );
            }
            items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| validate_task(index, item, &mut violations))
                .collect()
        }
        Some(other) => {
            violations.push("tasks", format!("expected an array, found {}", kind_of(other)));
            Vec::new()
        }
    };

    if violations.is_empty() {
        Ok(TaskBacklog::new(project_name, tasks))
    } else {
        Err(violations.into_error())
    }
}

// ---------------------------------------------------------------------------
// Per-task checks
// ---------------------------------------------------------------------------

fn validate_task(index: usize, raw: &Value, violations: &mut Violations) -> Option<Task> {
    let base = format!("tasks[{index}]");
    let Some(obj) = raw.as_object() else {
        violations.push(&base, format!("expected an object, found {}", kind_of(raw)));
        return None;
    };
    let before = violations.len();
    let path = |field: &str| format!("{base}.{field}");

    let title = match obj.get("title") {
        None | Some(Value::Null) => {
            violations.push(path("title"), "missing required field");
            None
        }
        Some(Value::String(s)) if normalize_title(s).is_empty() => {
            violations.push(path("title"), "must not be blank");
            None
        }
        Some(Value::String(s)) => Some(s.as_str()),
        Some(other) => {
            violations.push(
                path("title"),
                format!("expected a string, found {}", kind_of(other)),
            );
            None
        }
    };

    let description = optional_string(obj, "description", &path("description"), violations);

    let issue_type = optional_enum(
        obj,
        "type",
        &path("type"),
        violations,
        IssueType::parse,
        &names(&IssueType::ALL.map(IssueType::as_str)),
    );
    let priority = optional_enum(
        obj,
        "priority",
        &path("priority"),
        violations,
        Priority::parse,
        &names(&Priority::ALL.map(Priority::as_str)),
    );

    let labels = optional_string_array(obj, "labels", &path("labels"), violations, true);

    let story_points = match obj.get("storyPoints") {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => match n.as_f64().and_then(StoryPoints::new) {
            Some(points) => Some(points),
            None => {
                violations.push(path("storyPoints"), "must be a non-negative number");
                None
            }
        },
        Some(other) => {
            violations.push(
                path("storyPoints"),
                format!("expected a number, found {}", kind_of(other)),
            );
            None
        }
    };

    let criteria = optional_string_array(
        obj,
        "acceptanceCriteria",
        &path("acceptanceCriteria"),
        violations,
        false,
    );

    if violations.len() > before {
        return None;
    }

    let mut task = Task::new(title?)?;
    if let Some(description) = description {
        task = task.with_description(description);
    }
    if let Some(issue_type) = issue_type {
        task = task.with_type(issue_type);
    }
    if let Some(priority) = priority {
        task = task.with_priority(priority);
    }
    if let Some(points) = story_points {
        task = task.with_story_points(points);
    }
    Some(
        task.with_labels(labels.unwrap_or_default())
            .with_acceptance_criteria(criteria.unwrap_or_default()),
    )
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn optional_string(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Violations,
) -> Option<String> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => {
            violations.push(path, format!("expected a string, found {}", kind_of(other)));
            None
        }
    }
}

fn optional_enum<T>(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Violations,
    parse: fn(&str) -> Option<T>,
    allowed: &str,
) -> Option<T> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => {
            let parsed = parse(s);
            if parsed.is_none() {
                violations.push(path, format!("'{s}' is not one of {allowed}"));
            }
            parsed
        }
        Some(other) => {
            violations.push(path, format!("expected a string, found {}", kind_of(other)));
            None
        }
    }
}

fn optional_string_array(
    obj: &Map<String, Value>,
    key: &str,
    path: &str,
    violations: &mut Violations,
    reject_blank: bool,
) -> Option<Vec<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::String(s) if reject_blank && s.trim().is_empty() => {
                        violations.push(format!("{path}[{i}]"), "must not be blank");
                    }
                    Value::String(s) => out.push(s.clone()),
                    other => violations.push(
                        format!("{path}[{i}]"),
                        format!("expected a string, found {}", kind_of(other)),
                    ),
                }
            }
            Some(out)
        }
        Some(other) => {
            violations.push(path, format!("expected an array, found {}", kind_of(other)));
            None
        }
    }
}

fn names(values: &[&str]) -> String {
    values.join("|")
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Default)]
struct Violations(Vec<FieldViolation>);

impl Violations {
    fn push(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.push(FieldViolation {
            field: field.into(),
            reason: reason.into(),
        });
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn into_error(self) -> SchemaError {
        SchemaError { violations: self.0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_task_is_accepted_with_defaults() {
        let backlog = validate(&json!({ "tasks": [{ "title": "Fix bug" }] })).unwrap();
        assert_eq!(backlog.project_name(), None);
        let task = &backlog.tasks()[0];
        assert_eq!(task.title(), "Fix bug");
        assert_eq!(task.issue_type(), None);
        assert_eq!(task.effective_type(), IssueType::Task);
        assert_eq!(task.priority(), None);
    }

    #[test]
    fn empty_task_list_is_valid() {
        let backlog = validate(&json!({ "projectName": "Shop", "tasks": [] })).unwrap();
        assert!(backlog.is_empty());
        assert_eq!(backlog.project_name(), Some("Shop"));
    }

    #[test]
    fn non_object_root_is_rejected() {
        let err = validate(&json!([{ "title": "x" }])).unwrap_err();
        assert!(err.has_violation_at("$"));
    }

    #[test]
    fn missing_or_mistyped_tasks_field_is_rejected() {
        assert!(validate(&json!({})).unwrap_err().has_violation_at("tasks"));
        assert!(validate(&json!({ "tasks": "a, b" }))
            .unwrap_err()
            .has_violation_at("tasks"));
    }

    #[test]
    fn every_violation_is_reported() {
        let err = validate(&json!({
            "tasks": [
                { "title": "ok" },
                { "description": "no title", "priority": "Urgent" },
                { "title": "   ", "type": "Epic", "storyPoints": -2, "labels": ["ok", 3] }
            ]
        }))
        .unwrap_err();

        let fields: Vec<_> = err.violations.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "tasks[1].title",
                "tasks[1].priority",
                "tasks[2].title",
                "tasks[2].type",
                "tasks[2].labels[1]",
                "tasks[2].storyPoints",
            ]
        );
    }

    #[test]
    fn enum_membership_is_exact() {
        let err = validate(&json!({ "tasks": [{ "title": "t", "priority": "high" }] })).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(err.violations[0].reason.contains("Highest|High|Medium|Low|Lowest"));
    }

    #[test]
    fn nulls_are_treated_as_absent() {
        let backlog = validate(&json!({
            "projectName": null,
            "tasks": [{ "title": "t", "description": null, "type": null, "priority": null,
                        "labels": null, "storyPoints": null, "acceptanceCriteria": null }]
        }))
        .unwrap();
        assert_eq!(backlog.tasks()[0], Task::new("t").unwrap());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let backlog = validate(&json!({ "tasks": [{ "title": "t", "epic": "E1" }], "model": "x" }));
        assert!(backlog.is_ok());
    }

    #[test]
    fn backlog_size_is_capped() {
        let tasks: Vec<_> = (0..4).map(|i| json!({ "title": format!("t{i}") })).collect();
        let limits = ValidationLimits { max_tasks: 3 };
        let err = validate_with(&json!({ "tasks": tasks }), &limits).unwrap_err();
        assert_eq!(err.violations.len(), 1);
        assert!(err.has_violation_at("tasks"));
    }

    #[test]
    fn full_task_round_trips_through_serialization() {
        let raw = json!({
            "projectName": "Shop",
            "tasks": [{
                "title": "Checkout  flow",
                "description": "Build it",
                "type": "Story",
                "priority": "High",
                "labels": ["web", "payments", "web"],
                "storyPoints": 5,
                "acceptanceCriteria": ["Given a cart", "When paying"]
            }]
        });
        let first = validate(&raw).unwrap();
        assert_eq!(first.tasks()[0].title(), "Checkout flow");
        assert_eq!(first.tasks()[0].labels().len(), 2);

        let second = validate(&serde_json::to_value(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn error_message_lists_violations() {
        let err = validate(&json!({ "tasks": [{}] })).unwrap_err();
        assert_eq!(
            err.to_string(),
            "backlog failed schema validation with 1 violation(s): tasks[0].title: missing required field"
        );
    }
}
