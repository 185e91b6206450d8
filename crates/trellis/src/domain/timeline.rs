use super::{IssueId, TimelineItemId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An internal timeline item attached to an issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineItem {
    /// Unique identifier
    pub id: TimelineItemId,

    /// Issue the item belongs to
    pub issue: IssueId,

    /// When the event happened
    pub created_at: DateTime<Utc>,

    /// Last edit (equal to `created_at` until edited)
    pub last_modified_at: DateTime<Utc>,

    /// Who caused the event, if known
    pub author: Option<String>,

    /// Remote event id the item was replayed from
    pub external_ref: Option<String>,

    /// What happened
    pub kind: TimelineItemKind,
}

/// Payload of a timeline item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimelineItemKind {
    /// A comment was added
    Comment {
        /// Comment text
        body: String,
    },

    /// The title changed
    TitleChanged {
        /// Title before the change
        old_title: String,
        /// Title after the change
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
}

impl TimelineItemKind {
    /// Stable short name, used as the event kind in replay records.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Comment { .. } => "comment",
            Self::TitleChanged { .. } => "title-changed",
            Self::Labeled { .. } => "labeled",
            Self::Unlabeled { .. } => "unlabeled",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
        }
    }
}

/// Data for appending a timeline item to an issue
#[derive(Debug, Clone, PartialEq)]
pub struct NewTimelineItem {
    /// When the event happened
    pub created_at: DateTime<Utc>,

    /// Who caused the event, if known
    pub author: Option<String>,

    /// Remote event id the item is replayed from
    pub external_ref: Option<String>,

    /// What happened
    pub kind: TimelineItemKind,
}

impl NewTimelineItem {
    /// An item with no author and no external reference.
    pub fn new(created_at: DateTime<Utc>, kind: TimelineItemKind) -> Self {
        Self {
            created_at,
            author: None,
            external_ref: None,
            kind,
        }
    }
}
