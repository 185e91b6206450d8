use super::template::{FieldMap, Templated};
use super::{IssueId, TemplateId, TrackableId};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An issue node in the primary graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Unique identifier for the issue
    pub id: IssueId,

    /// Container the issue belongs to
    pub trackable: TrackableId,

    /// Template the templated fields are validated against
    pub template: TemplateId,

    /// Current title (may carry a correlation stamp suffix)
    pub title: String,

    /// Issue body
    pub body: String,

    /// Open or closed
    pub state: IssueState,

    /// Labels
    #[serde(default)]
    pub labels: BTreeSet<String>,

    /// Reference to the remote issue this was imported from (`project#id`)
    pub external_ref: Option<String>,

    /// Templated field values, string-encoded JSON
    #[serde(default)]
    pub templated_fields: FieldMap,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Open/closed state of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    /// Issue is open
    Open,

    /// Issue has been closed
    Closed,
}

impl Templated for Issue {
    fn template_id(&self) -> &TemplateId {
        &self.template
    }

    fn set_template_id(&mut self, template: TemplateId) {
        self.template = template;
    }

    fn templated_fields(&self) -> &FieldMap {
        &self.templated_fields
    }

    fn templated_fields_mut(&mut self) -> &mut FieldMap {
        &mut self.templated_fields
    }
}

/// Data for creating a new issue
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    /// Container to create the issue in
    pub trackable: TrackableId,

    /// Template for the templated fields
    pub template: TemplateId,

    /// Issue title
    pub title: String,

    /// Issue body
    pub body: String,

    /// Labels
    pub labels: BTreeSet<String>,

    /// External reference
    pub external_ref: Option<String>,

    /// Already-validated templated fields
    pub templated_fields: FieldMap,

    /// Creation timestamp (taken from the remote issue when imported)
    pub created_at: DateTime<Utc>,
}

/// A mutation applied to an issue while the storage holds its lock.
///
/// Returning an error aborts the mutation; storage leaves the stored issue untouched.
pub type IssueMutation = Box<dyn FnOnce(&mut Issue) -> Result<()> + Send>;
