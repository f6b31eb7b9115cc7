//! The backlog data model: [`Task`] entries grouped into a [`TaskBacklog`].
//!
//! These types only exist in *validated* form and have no `Deserialize`
//! implementation: untrusted generative output enters the domain only through
//! [`crate::validator::validate`]. `Serialize` produces the
//! same camelCase JSON shape the validator accepts, so a serialized backlog
//! validates back to an equal value.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::StoryPoints;

// ---------------------------------------------------------------------------
// Closed vocabularies
// ---------------------------------------------------------------------------

/// Kind of issue a task becomes in the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, serde::Deserialize)]
pub enum IssueType {
    Story,
    Task,
    Bug,
}

impl IssueType {
    /// Every variant, in declaration order.
    pub const ALL: [IssueType; 3] = [IssueType::Story, IssueType::Task, IssueType::Bug];

    /// The type used when a task does not name one.
    pub const DEFAULT: IssueType = IssueType::Task;

    /// Canonical wire name (`"Story"`, `"Task"`, `"Bug"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Story => "Story",
            Self::Task => "Task",
            Self::Bug => "Bug",
        }
    }

    /// Parses a canonical wire name. Matching is case-sensitive.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == value)
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority of a task, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, serde::Deserialize)]
pub enum Priority {
    Highest,
    High,
    Medium,
    Low,
    Lowest,
}

impl Priority {
    /// Every variant, in declaration order.
    pub const ALL: [Priority; 5] = [
        Priority::Highest,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::Lowest,
    ];

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Highest => "Highest",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Lowest => "Lowest",
        }
    }

    /// Parses a canonical wire name. Matching is case-sensitive.
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == value)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// One candidate issue of a backlog.
///
/// `title` is the only mandatory field. It is stored normalized: trimmed, with
/// internal whitespace runs collapsed to a single space.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    title: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    issue_type: Option<IssueType>,

    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<Priority>,

    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    labels: BTreeSet<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    story_points: Option<StoryPoints>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    acceptance_criteria: Vec<String>,
}

impl Task {
    /// Creates a task with only a title.
    ///
    /// Returns `None` if the title is blank once normalized.
    pub fn new(title: &str) -> Option<Self> {
        let title = normalize_title(title);
        if title.is_empty() {
            return None;
        }
        Some(Self {
            title,
            description: None,
            issue_type: None,
            priority: None,
            labels: BTreeSet::new(),
            story_points: None,
            acceptance_criteria: Vec::new(),
        })
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, issue_type: IssueType) -> Self {
        self.issue_type = Some(issue_type);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Adds labels. Blank labels are ignored; duplicates collapse.
    #[must_use]
    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels.extend(
            labels
                .into_iter()
                .map(Into::into)
                .filter(|l: &String| !l.trim().is_empty()),
        );
        self
    }

    #[must_use]
    pub fn with_story_points(mut self, points: StoryPoints) -> Self {
        self.story_points = Some(points);
        self
    }

    #[must_use]
    pub fn with_acceptance_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria.extend(criteria.into_iter().map(Into::into));
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// The issue type as written by the generator, if any.
    pub fn issue_type(&self) -> Option<IssueType> {
        self.issue_type
    }

    /// The issue type after applying the default ([`IssueType::DEFAULT`]).
    pub fn effective_type(&self) -> IssueType {
        self.issue_type.unwrap_or(IssueType::DEFAULT)
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn labels(&self) -> &BTreeSet<String> {
        &self.labels
    }

    pub fn story_points(&self) -> Option<StoryPoints> {
        self.story_points
    }

    pub fn acceptance_criteria(&self) -> &[String] {
        &self.acceptance_criteria
    }
}

/// Trims and collapses whitespace runs to single spaces.
pub(crate) fn normalize_title(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Backlog
// ---------------------------------------------------------------------------

/// A verified backlog: an optional project name and an ordered list of tasks.
///
/// The task list may be empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBacklog {
    #[serde(skip_serializing_if = "Option::is_none")]
    project_name: Option<String>,
    tasks: Vec<Task>,
}

impl TaskBacklog {
    pub fn new(project_name: Option<String>, tasks: Vec<Task>) -> Self {
        Self {
            project_name,
            tasks,
        }
    }

    pub fn project_name(&self) -> Option<&str> {
        self.project_name.as_deref()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Returns a backlog holding only the tasks for which `keep` is true.
    #[must_use]
    pub fn retain(&self, mut keep: impl FnMut(&Task) -> bool) -> Self {
        Self {
            project_name: self.project_name.clone(),
            tasks: self.tasks.iter().filter(|t| keep(t)).cloned().collect(),
        }
    }
}
