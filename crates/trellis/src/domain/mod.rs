//! Domain types for templated issues and their timelines.
//!
//! Identifiers are string newtypes. Local node ids ([`IssueId`],
//! [`TimelineItemId`]) are minted by the storage layer; remote ids
//! ([`ProjectId`], [`RemoteIssueId`]) are whatever the external tracker uses.

mod issue;
mod template;
mod timeline;

pub use issue::{Issue, IssueMutation, IssueState, NewIssue};
pub use template::{FieldMap, ResolvedTemplate, Template, Templated};
pub use timeline::{NewTimelineItem, TimelineItem, TimelineItemKind};

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Local identifier of an issue node.
    IssueId
);

string_id!(
    /// Local identifier of a timeline item.
    TimelineItemId
);

string_id!(
    /// Identifier of a template.
    TemplateId
);

string_id!(
    /// Local container (trackable) that issues belong to.
    TrackableId
);

string_id!(
    /// External project on the remote tracker (e.g. `owner/repo`).
    ProjectId
);

string_id!(
    /// Issue identifier on the remote tracker.
    RemoteIssueId
);

/// Key of all per-issue sync state: (project, remote issue).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IssueKey {
    /// External project.
    pub project: ProjectId,

    /// Issue id on the remote tracker.
    pub issue: RemoteIssueId,
}

impl IssueKey {
    /// Create a key.
    pub fn new(project: impl Into<ProjectId>, issue: impl Into<RemoteIssueId>) -> Self {
        Self {
            project: project.into(),
            issue: issue.into(),
        }
    }

    /// The `external_ref` stamped on local issues imported from this key.
    #[must_use]
    pub fn external_ref(&self) -> String {
        format!("{}#{}", self.project, self.issue)
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.project, self.issue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_key_display_matches_external_ref() {
        let key = IssueKey::new("acme/widgets", "42");
        assert_eq!(key.to_string(), "acme/widgets#42");
        assert_eq!(key.external_ref(), key.to_string());
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = IssueId::new("issue-a3f8");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"issue-a3f8\"");
    }
}
