//! Outcome of a sync pass.

use crate::domain::{IssueKey, ProjectId};
use serde::Serialize;
use std::fmt;

/// Step of the per-project state machine an issue failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStage {
    /// Listing, dereplicating and persisting issues
    Discover,
    /// Pulling the timeline of a dirty issue
    Fetch,
    /// Replaying cached timeline events
    Replay,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStage::Discover => "discover",
            SyncStage::Fetch => "fetch",
            SyncStage::Replay => "replay",
        };
        f.write_str(name)
    }
}

/// One issue that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueFailure {
    /// The remote issue
    pub key: IssueKey,
    /// Where it failed
    pub stage: SyncStage,
    /// Rendered error
    pub error: String,
}

/// What one pass did for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectReport {
    /// The project
    pub project: ProjectId,
    /// Remote issues listed
    pub discovered: usize,
    /// Local issues created for new remote issues
    pub created: usize,
    /// New remote issues matched to existing local issues
    pub matched: usize,
    /// Records marked dirty
    pub marked_dirty: usize,
    /// Timelines fetched and cached
    pub fetched: usize,
    /// Issues replayed and cleared
    pub replayed: usize,
    /// Per-issue failures
    pub failures: Vec<IssueFailure>,
    /// Issues that exhausted their retry budget
    pub stuck: Vec<IssueKey>,
    /// Failure that aborted the project, if any
    pub error: Option<String>,
}

impl ProjectReport {
    /// An empty report for `project`.
    #[must_use]
    pub fn new(project: ProjectId) -> Self {
        Self {
            project,
            discovered: 0,
            created: 0,
            matched: 0,
            marked_dirty: 0,
            fetched: 0,
            replayed: 0,
            failures: Vec::new(),
            stuck: Vec::new(),
            error: None,
        }
    }

    /// No failures, no stuck issues, no project error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.stuck.is_empty() && self.error.is_none()
    }
}

/// What one pass did, per project in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// One report per project
    pub projects: Vec<ProjectReport>,
}

impl SyncReport {
    /// The report of one project.
    #[must_use]
    pub fn project(&self, id: &ProjectId) -> Option<&ProjectReport> {
        self.projects.iter().find(|report| &report.project == id)
    }

    /// Whether every project is clean.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.projects.iter().all(ProjectReport::is_clean)
    }

    /// Per-issue failures across all projects.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.projects.iter().map(|report| report.failures.len()).sum()
    }

    /// Stuck issues across all projects.
    pub fn stuck(&self) -> impl Iterator<Item = &IssueKey> {
        self.projects.iter().flat_map(|report| report.stuck.iter())
    }
}
