//! Timeline replay: applying one remote event onto the internal model.
//!
//! Each remote event produces at most one internal timeline item. A
//! [`TimelineEventRecord`] links the remote event id to that item, which
//! makes replay idempotent under repeated polling:
//!
//! - a recorded event with no newer edit is skipped and its recorded
//!   timestamp returned
//! - a recorded comment with a newer edit updates the existing item in place
//! - an unsupported event type produces nothing and is not recorded
//!
//! Side effects on the issue itself (title, labels, open/closed) are applied
//! before the item is written. They are idempotent, so a replay interrupted
//! between the two steps converges on retry.

use super::dereplication::{Dereplicator, append_stamp, extract_stamp, strip_stamp};
use super::remote::{RemoteEventPayload, RemoteTimelineEvent};
use super::state::{RemoteIssueRecord, SyncStateStore, TimelineEventRecord};
use crate::domain::{Issue, IssueState, NewTimelineItem, TimelineItemId, TimelineItemKind};
use crate::error::{Error, Result};
use crate::storage::IssueStorage;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

/// Replays remote timeline events onto local issues.
pub struct TimelineReplay {
    issues: Arc<dyn IssueStorage>,
    state: Arc<dyn SyncStateStore>,
    dereplicator: Arc<dyn Dereplicator>,
}

impl TimelineReplay {
    /// Create a replayer writing to `issues` and recording into `state`.
    pub fn new(
        issues: Arc<dyn IssueStorage>,
        state: Arc<dyn SyncStateStore>,
        dereplicator: Arc<dyn Dereplicator>,
    ) -> Self {
        Self {
            issues,
            state,
            dereplicator,
        }
    }

    /// Apply `event` to the local issue linked by `record`.
    ///
    /// Returns the timestamp the event was applied at, or `None` when the
    /// event type has no internal representation.
    ///
    /// # Errors
    ///
    /// - `Error::IssueNotFound` if the linked local issue is gone
    /// - any storage or state store error
    pub async fn handle_event(
        &self,
        record: &RemoteIssueRecord,
        event: &RemoteTimelineEvent,
    ) -> Result<Option<DateTime<Utc>>> {
        let project = &record.key.project;
        let cached = self.state.event_record(project, &event.id).await?;

        if let Some(cached) = &cached
            && event.edited_at() <= cached.edited_at
        {
            return Ok(Some(cached.applied_at));
        }

        let Some(kind) = self.internal_kind(record, event).await? else {
            debug!(issue = %record.key, event = %event.id, kind = event.payload.kind(), "Skipping unsupported event");
            return Ok(None);
        };
        let applied_at = event.edited_at().unwrap_or(event.created_at);

        let local_item = match cached {
            // Only editable payloads reach this point with a cached record
            Some(cached) => {
                self.issues
                    .edit_timeline_item(&cached.local_item, kind, applied_at)
                    .await?;
                debug!(issue = %record.key, event = %event.id, item = %cached.local_item, "Updated edited event");
                cached.local_item
            }
            None => self.append(record, event, kind).await?,
        };

        self.state
            .upsert_event_record(TimelineEventRecord {
                project: project.clone(),
                remote_event_id: event.id.clone(),
                local_item,
                applied_at,
                edited_at: event.edited_at(),
                event_kind: event.payload.kind().to_string(),
            })
            .await?;

        Ok(Some(applied_at))
    }

    /// Map the payload onto an item kind, applying issue side effects.
    async fn internal_kind(
        &self,
        record: &RemoteIssueRecord,
        event: &RemoteTimelineEvent,
    ) -> Result<Option<TimelineItemKind>> {
        let kind = match &event.payload {
            RemoteEventPayload::CommentCreated { body, .. } => {
                TimelineItemKind::Comment { body: body.clone() }
            }
            RemoteEventPayload::TitleChanged { new_title, .. } => {
                let issue = self.issue(record).await?;
                // A local stamp is never reassigned, whatever the remote title carries
                let new_title = match extract_stamp(&issue.title) {
                    Some(stamp) => append_stamp(strip_stamp(new_title), stamp),
                    None => new_title.clone(),
                };
                let old_title = issue.title;
                let title = new_title.clone();
                self.mutate(record, move |issue| issue.title = title).await?;
                TimelineItemKind::TitleChanged {
                    old_title,
                    new_title,
                }
            }
            RemoteEventPayload::Labeled { label } => {
                let added = label.clone();
                self.mutate(record, move |issue| {
                    issue.labels.insert(added);
                })
                .await?;
                TimelineItemKind::Labeled {
                    label: label.clone(),
                }
            }
            RemoteEventPayload::Unlabeled { label } => {
                let removed = label.clone();
                self.mutate(record, move |issue| {
                    issue.labels.remove(&removed);
                })
                .await?;
                TimelineItemKind::Unlabeled {
                    label: label.clone(),
                }
            }
            RemoteEventPayload::Closed => {
                self.mutate(record, |issue| issue.state = IssueState::Closed)
                    .await?;
                TimelineItemKind::Closed
            }
            RemoteEventPayload::Reopened => {
                self.mutate(record, |issue| issue.state = IssueState::Open)
                    .await?;
                TimelineItemKind::Reopened
            }
            RemoteEventPayload::Unsupported => return Ok(None),
        };
        Ok(Some(kind))
    }

    /// Append a new item, or link the one a previous interrupted replay wrote.
    async fn append(
        &self,
        record: &RemoteIssueRecord,
        event: &RemoteTimelineEvent,
        kind: TimelineItemKind,
    ) -> Result<TimelineItemId> {
        let issue = self.issue(record).await?;
        let item = NewTimelineItem {
            created_at: event.created_at,
            author: event.actor.clone(),
            external_ref: Some(event.id.clone()),
            kind,
        };

        let accepted = self
            .dereplicator
            .validate_timeline_item(&issue, vec![item])
            .await?;

        match accepted.into_iter().next() {
            Some(item) => {
                let created = self.issues.add_timeline_item(&issue.id, item).await?;
                debug!(issue = %record.key, event = %event.id, item = %created.id, "Replayed event");
                Ok(created.id)
            }
            None => {
                let existing = self
                    .issues
                    .timeline(&issue.id)
                    .await?
                    .into_iter()
                    .find(|item| item.external_ref.as_deref() == Some(event.id.as_str()))
                    .ok_or_else(|| {
                        Error::Storage(format!(
                            "Event {} was rejected as a duplicate but no matching item exists on {}",
                            event.id, issue.id
                        ))
                    })?;
                debug!(issue = %record.key, event = %event.id, item = %existing.id, "Linked previously replayed event");
                Ok(existing.id)
            }
        }
    }

    async fn issue(&self, record: &RemoteIssueRecord) -> Result<Issue> {
        self.issues
            .get_issue(&record.local_issue)
            .await?
            .ok_or_else(|| Error::IssueNotFound(record.local_issue.clone()))
    }

    async fn mutate<F>(&self, record: &RemoteIssueRecord, change: F) -> Result<Issue>
    where
        F: FnOnce(&mut Issue) + Send + 'static,
    {
        self.issues
            .update_issue(
                &record.local_issue,
                Box::new(move |issue| {
                    change(issue);
                    Ok(())
                }),
            )
            .await
    }
}
