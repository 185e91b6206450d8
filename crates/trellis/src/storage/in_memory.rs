//! In-memory issue storage backed by hash maps.
//!
//! All data lives behind one `tokio::sync::Mutex`, so every trait method is
//! atomic with respect to every other. Ids come from two hash-based
//! generators: `issue-xxxx` for issues and `item-xxxx` for timeline items.

use super::IssueStorage;
use crate::domain::{
    Issue, IssueId, IssueMutation, IssueState, NewIssue, NewTimelineItem, TimelineItem,
    TimelineItemId, TimelineItemKind, TrackableId,
};
use crate::error::{Error, Result};
use crate::id_generation::IdGenerator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Thread-safe in-memory issue storage.
#[derive(Debug, Default)]
pub struct InMemoryIssueStorage {
    inner: Mutex<Inner>,
}

#[derive(Debug)]
struct Inner {
    issues: HashMap<IssueId, Issue>,

    /// Issue ids per trackable, in creation order
    by_trackable: HashMap<TrackableId, Vec<IssueId>>,

    items: HashMap<TimelineItemId, TimelineItem>,

    /// Item ids per issue, in insertion order
    timelines: HashMap<IssueId, Vec<TimelineItemId>>,

    issue_ids: IdGenerator,
    item_ids: IdGenerator,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            issues: HashMap::new(),
            by_trackable: HashMap::new(),
            items: HashMap::new(),
            timelines: HashMap::new(),
            issue_ids: IdGenerator::new("issue"),
            item_ids: IdGenerator::new("item"),
        }
    }
}

#[async_trait]
impl IssueStorage for InMemoryIssueStorage {
    async fn create_issue(&self, new_issue: NewIssue) -> Result<Issue> {
        let mut inner = self.inner.lock().await;

        let id = inner
            .issue_ids
            .generate(&[
                new_issue.trackable.as_str(),
                new_issue.title.as_str(),
                new_issue.body.as_str(),
            ])
            .map(IssueId::new)
            .map_err(|e| Error::Storage(format!("ID generation failed: {e}")))?;

        let issue = Issue {
            id: id.clone(),
            trackable: new_issue.trackable,
            template: new_issue.template,
            title: new_issue.title,
            body: new_issue.body,
            state: IssueState::Open,
            labels: new_issue.labels,
            external_ref: new_issue.external_ref,
            templated_fields: new_issue.templated_fields,
            created_at: new_issue.created_at,
            updated_at: Utc::now(),
        };

        inner
            .by_trackable
            .entry(issue.trackable.clone())
            .or_default()
            .push(id.clone());
        inner.timelines.insert(id.clone(), Vec::new());
        inner.issues.insert(id, issue.clone());

        Ok(issue)
    }

    async fn get_issue(&self, id: &IssueId) -> Result<Option<Issue>> {
        let inner = self.inner.lock().await;
        Ok(inner.issues.get(id).cloned())
    }

    async fn list_issues(&self, trackable: &TrackableId) -> Result<Vec<Issue>> {
        let inner = self.inner.lock().await;
        let mut issues: Vec<Issue> = inner
            .by_trackable
            .get(trackable)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.issues.get(id).cloned())
            .collect();
        issues.sort_by_key(|issue| issue.created_at);
        Ok(issues)
    }

    async fn update_issue(&self, id: &IssueId, mutation: IssueMutation) -> Result<Issue> {
        let mut inner = self.inner.lock().await;

        let stored = inner
            .issues
            .get_mut(id)
            .ok_or_else(|| Error::IssueNotFound(id.clone()))?;

        let mut working = stored.clone();
        mutation(&mut working)?;

        if working.id != stored.id || working.trackable != stored.trackable {
            return Err(Error::Storage(format!(
                "Mutation of {id} attempted to change its identity"
            )));
        }

        working.updated_at = Utc::now();
        *stored = working.clone();
        Ok(working)
    }

    async fn add_timeline_item(
        &self,
        issue: &IssueId,
        item: NewTimelineItem,
    ) -> Result<TimelineItem> {
        let mut inner = self.inner.lock().await;

        if !inner.issues.contains_key(issue) {
            return Err(Error::IssueNotFound(issue.clone()));
        }

        let id = inner
            .item_ids
            .generate(&[issue.as_str(), item.kind.name()])
            .map(TimelineItemId::new)
            .map_err(|e| Error::Storage(format!("ID generation failed: {e}")))?;

        let item = TimelineItem {
            id: id.clone(),
            issue: issue.clone(),
            created_at: item.created_at,
            last_modified_at: item.created_at,
            author: item.author,
            external_ref: item.external_ref,
            kind: item.kind,
        };

        inner
            .timelines
            .entry(issue.clone())
            .or_default()
            .push(id.clone());
        inner.items.insert(id, item.clone());

        Ok(item)
    }

    async fn edit_timeline_item(
        &self,
        id: &TimelineItemId,
        kind: TimelineItemKind,
        modified_at: DateTime<Utc>,
    ) -> Result<TimelineItem> {
        let mut inner = self.inner.lock().await;

        let item = inner
            .items
            .get_mut(id)
            .ok_or_else(|| Error::TimelineItemNotFound(id.clone()))?;
        item.kind = kind;
        item.last_modified_at = modified_at;

        Ok(item.clone())
    }

    async fn get_timeline_item(&self, id: &TimelineItemId) -> Result<Option<TimelineItem>> {
        let inner = self.inner.lock().await;
        Ok(inner.items.get(id).cloned())
    }

    async fn timeline(&self, issue: &IssueId) -> Result<Vec<TimelineItem>> {
        let inner = self.inner.lock().await;
        let mut items: Vec<TimelineItem> = inner
            .timelines
            .get(issue)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.items.get(id).cloned())
            .collect();
        items.sort_by_key(|item| item.created_at);
        Ok(items)
    }
}
