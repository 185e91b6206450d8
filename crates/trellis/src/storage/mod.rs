//! Storage contract for the primary issue graph.
//!
//! The graph database itself is an external collaborator; this trait is the
//! read/write contract the sync engine relies on. An in-memory backend is
//! provided for tests and embedding.
//!
//! # Locking
//!
//! [`IssueStorage::update_issue`] runs the caller's mutation while the backend
//! holds the issue exclusively, so validation and write happen under one lock.
//! The templated field functions in [`crate::template::fields`] rely on this.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeSet;
//! use trellis::domain::{NewIssue, FieldMap};
//! use trellis::storage::{IssueStorage, new_in_memory_storage};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = new_in_memory_storage();
//!
//!     let issue = storage
//!         .create_issue(NewIssue {
//!             trackable: "backend".into(),
//!             template: "issue".into(),
//!             title: "Fix bug".to_string(),
//!             body: String::new(),
//!             labels: BTreeSet::new(),
//!             external_ref: None,
//!             templated_fields: FieldMap::new(),
//!             created_at: chrono::Utc::now(),
//!         })
//!         .await?;
//!     println!("Created issue: {}", issue.id);
//!     Ok(())
//! }
//! ```

use crate::domain::{
    Issue, IssueId, IssueMutation, NewIssue, NewTimelineItem, TimelineItem, TimelineItemId,
    TimelineItemKind, TrackableId,
};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub mod in_memory;

/// Core storage trait for issues and their timelines.
///
/// Implementations must be `Send + Sync`; all methods take `&self` so one
/// backend can be shared by concurrent project passes.
#[async_trait]
pub trait IssueStorage: Send + Sync {
    // ========== Issues ==========

    /// Create a new issue. Generates its id.
    async fn create_issue(&self, issue: NewIssue) -> Result<Issue>;

    /// Get an issue by ID. Returns `None` if it doesn't exist.
    async fn get_issue(&self, id: &IssueId) -> Result<Option<Issue>>;

    /// All issues in a trackable, oldest first.
    async fn list_issues(&self, trackable: &TrackableId) -> Result<Vec<Issue>>;

    /// Apply `mutation` to an issue under the backend's lock.
    ///
    /// The mutation works on a copy; the stored issue is replaced only when
    /// it returns `Ok`, and `updated_at` is bumped.
    ///
    /// # Errors
    ///
    /// - `Error::IssueNotFound` if the issue doesn't exist
    /// - whatever error the mutation returns
    async fn update_issue(&self, id: &IssueId, mutation: IssueMutation) -> Result<Issue>;

    // ========== Timeline ==========

    /// Append a timeline item to an issue.
    ///
    /// # Errors
    ///
    /// Returns `Error::IssueNotFound` if the issue doesn't exist.
    async fn add_timeline_item(&self, issue: &IssueId, item: NewTimelineItem)
    -> Result<TimelineItem>;

    /// Replace the payload of an existing item (e.g. an edited comment).
    ///
    /// # Errors
    ///
    /// Returns `Error::TimelineItemNotFound` if the item doesn't exist.
    async fn edit_timeline_item(
        &self,
        id: &TimelineItemId,
        kind: TimelineItemKind,
        modified_at: DateTime<Utc>,
    ) -> Result<TimelineItem>;

    /// Get a timeline item by ID.
    async fn get_timeline_item(&self, id: &TimelineItemId) -> Result<Option<TimelineItem>>;

    /// An issue's timeline ordered by `created_at` (insertion order on ties).
    async fn timeline(&self, issue: &IssueId) -> Result<Vec<TimelineItem>>;
}

/// Create an empty in-memory issue storage.
#[must_use]
pub fn new_in_memory_storage() -> Arc<dyn IssueStorage> {
    Arc::new(in_memory::InMemoryIssueStorage::default())
}
