//! Collaborators the orchestrator reports to.
//!
//! A [`NotificationSink`] receives conditions needing operator attention:
//! notified errors and issues that exhausted their retry budget. A
//! [`PostReplayHook`] runs after an issue's timeline replays cleanly and
//! before its dirty flag is cleared.

use crate::domain::{IssueId, IssueKey, ProjectId};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::error;

/// Reason code of a stuck issue notification.
pub const RETRIES_EXHAUSTED: &str = "timeline-retries-exhausted";

/// A condition forwarded to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Project the condition occurred in
    pub project: ProjectId,

    /// Remote issue, when the condition is scoped to one
    pub issue: Option<IssueKey>,

    /// Machine-readable reason code
    pub reason: String,

    /// Human-readable description
    pub message: String,
}

impl Notification {
    /// Build a notification from a [`Error::Notified`] error.
    ///
    /// Any other error kind is carried with the reason `"error"`.
    #[must_use]
    pub fn from_error(project: &ProjectId, issue: Option<&IssueKey>, err: &Error) -> Self {
        let (reason, message) = match err {
            Error::Notified { reason, message } => (reason.clone(), message.clone()),
            other => ("error".to_string(), other.to_string()),
        };
        Self {
            project: project.clone(),
            issue: issue.cloned(),
            reason,
            message,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.issue {
            Some(issue) => write!(f, "[{}] {}: {}", self.reason, issue, self.message),
            None => write!(f, "[{}] {}: {}", self.reason, self.project, self.message),
        }
    }
}

/// Receiver of operator notifications.
///
/// Delivery is best effort: the orchestrator logs a failed delivery and
/// moves on without retrying.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification.
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        error!(
            project = %notification.project,
            reason = %notification.reason,
            "{}",
            notification.message
        );
        Ok(())
    }
}

/// Cleanup run after an issue's timeline replayed without error.
///
/// A failing hook fails the replay attempt and counts against the retry
/// budget like any other replay failure.
#[async_trait]
pub trait PostReplayHook: Send + Sync {
    /// Called with the remote key and the local issue it is linked to.
    async fn after_replay(&self, key: &IssueKey, issue: &IssueId) -> Result<()>;
}

/// Hook that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

#[async_trait]
impl PostReplayHook for NoopHook {
    async fn after_replay(&self, _key: &IssueKey, _issue: &IssueId) -> Result<()> {
        Ok(())
    }
}
