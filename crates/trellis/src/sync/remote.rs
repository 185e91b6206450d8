//! Contract of the remote issue tracker.
//!
//! Adapters for concrete trackers implement [`RemoteTracker`]. Listings are
//! paginated with opaque, resumable cursors. Adapters report credential or
//! identity problems as [`crate::Error::Notified`] and everything else as
//! [`crate::Error::Transient`].

use crate::domain::{ProjectId, RemoteIssueId};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page
    pub items: Vec<T>,

    /// Cursor for the next page; `None` on the last page
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// A final page.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }
}

/// An issue as reported by the remote tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteIssue {
    /// Tracker-specific id
    pub id: RemoteIssueId,

    /// Current title
    pub title: String,

    /// Body text
    #[serde(default)]
    pub body: String,

    /// Creation time on the tracker
    pub created_at: DateTime<Utc>,

    /// Last time anything about the issue changed; monotonic per issue
    pub updated_at: DateTime<Utc>,

    /// Values for the local template's fields, already mapped by the adapter
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

/// A timeline event of a remote issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteTimelineEvent {
    /// Tracker-specific event id, stable across polls
    pub id: String,

    /// When the event happened
    pub created_at: DateTime<Utc>,

    /// Login of whoever caused the event
    #[serde(default)]
    pub actor: Option<String>,

    /// Type-specific payload
    pub payload: RemoteEventPayload,
}

impl RemoteTimelineEvent {
    /// Last edit timestamp, for payloads that can be edited.
    #[must_use]
    pub fn edited_at(&self) -> Option<DateTime<Utc>> {
        match &self.payload {
            RemoteEventPayload::CommentCreated { edited_at, .. } => *edited_at,
            _ => None,
        }
    }
}

/// Payload of a remote timeline event, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RemoteEventPayload {
    /// A comment was posted (and possibly edited since)
    CommentCreated {
        /// Current comment text
        body: String,
        /// Time of the latest edit
        #[serde(default)]
        edited_at: Option<DateTime<Utc>>,
    },

    /// The title was changed
    TitleChanged {
        /// Title before
        old_title: String,
        /// Title after
        new_title: String,
    },

    /// A label was added
    Labeled {
        /// The label
        label: String,
    },

    /// A label was removed
    Unlabeled {
        /// The label
        label: String,
    },

    /// The issue was closed
    Closed,

    /// The issue was reopened
    Reopened,

    /// Any event type this engine has no internal representation for
    #[serde(other)]
    Unsupported,
}

impl RemoteEventPayload {
    /// Stable short name of the event type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CommentCreated { .. } => "comment-created",
            Self::TitleChanged { .. } => "title-changed",
            Self::Labeled { .. } => "labeled",
            Self::Unlabeled { .. } => "unlabeled",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Read access to a remote issue tracker.
#[async_trait]
pub trait RemoteTracker: Send + Sync {
    /// List the issues of `project`, one page at a time.
    async fn list_issues(
        &self,
        project: &ProjectId,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Page<RemoteIssue>>;

    /// List the timeline of one remote issue, one page at a time.
    async fn list_timeline(
        &self,
        project: &ProjectId,
        issue: &RemoteIssueId,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Page<RemoteTimelineEvent>>;
}
