//! In-memory sync state.
//!
//! All records live behind one `tokio::sync::Mutex`, which makes the
//! conditional updates (`clear_dirty`, `record_failure`) trivially atomic.

use super::jsonl::StateLine;
use super::{RemoteIssueRecord, SyncStateStore, TimelineCacheEntry, TimelineEventRecord};
use crate::domain::{IssueId, IssueKey, ProjectId};
use crate::error::{Error, Result};
use crate::sync::remote::RemoteTimelineEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Thread-safe in-memory sync state.
#[derive(Debug, Default)]
pub struct InMemorySyncState {
    inner: Mutex<StateInner>,
}

#[derive(Debug, Default)]
struct StateInner {
    records: BTreeMap<IssueKey, RemoteIssueRecord>,
    timelines: BTreeMap<IssueKey, TimelineCacheEntry>,
    events: BTreeMap<(ProjectId, String), TimelineEventRecord>,
}

impl InMemorySyncState {
    /// Every stored record as a snapshot line, records first.
    pub(crate) async fn snapshot(&self) -> Vec<StateLine> {
        let inner = self.inner.lock().await;
        inner
            .records
            .values()
            .cloned()
            .map(StateLine::Record)
            .chain(inner.timelines.values().cloned().map(StateLine::Timeline))
            .chain(inner.events.values().cloned().map(StateLine::Event))
            .collect()
    }

    /// Replace all state with the given snapshot lines.
    ///
    /// Later lines win over earlier ones with the same key.
    pub(crate) async fn restore(&self, lines: Vec<StateLine>) {
        let mut fresh = StateInner::default();
        for line in lines {
            match line {
                StateLine::Record(record) => {
                    fresh.records.insert(record.key.clone(), record);
                }
                StateLine::Timeline(entry) => {
                    fresh.timelines.insert(entry.key.clone(), entry);
                }
                StateLine::Event(event) => {
                    fresh
                        .events
                        .insert((event.project.clone(), event.remote_event_id.clone()), event);
                }
            }
        }
        *self.inner.lock().await = fresh;
    }
}

#[async_trait]
impl SyncStateStore for InMemorySyncState {
    async fn get_record(&self, key: &IssueKey) -> Result<Option<RemoteIssueRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(key).cloned())
    }

    async fn mark_dirty(
        &self,
        key: &IssueKey,
        local_issue: &IssueId,
        remote_updated_at: DateTime<Utc>,
    ) -> Result<RemoteIssueRecord> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .entry(key.clone())
            .or_insert_with(|| RemoteIssueRecord {
                key: key.clone(),
                local_issue: local_issue.clone(),
                dirty: false,
                revision: 0,
                remote_updated_at,
                last_synced_at: None,
            });

        record.local_issue = local_issue.clone();
        record.dirty = true;
        record.revision += 1;
        record.remote_updated_at = record.remote_updated_at.max(remote_updated_at);
        Ok(record.clone())
    }

    async fn dirty_records(&self, project: &ProjectId) -> Result<Vec<RemoteIssueRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|record| &record.key.project == project && record.dirty)
            .cloned()
            .collect())
    }

    async fn clear_dirty(
        &self,
        key: &IssueKey,
        expected_revision: u64,
        synced_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .records
            .get_mut(key)
            .ok_or_else(|| Error::RecordNotFound(key.to_string()))?;

        if record.revision != expected_revision {
            return Ok(false);
        }
        record.dirty = false;
        record.last_synced_at = Some(synced_at);
        Ok(true)
    }

    async fn stuck_records(
        &self,
        project: &ProjectId,
        bound: u32,
    ) -> Result<Vec<RemoteIssueRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|record| &record.key.project == project && record.dirty)
            .filter(|record| {
                inner
                    .timelines
                    .get(&record.key)
                    .is_some_and(|entry| entry.attempts >= bound)
            })
            .cloned()
            .collect())
    }

    async fn timeline_entry(&self, key: &IssueKey) -> Result<Option<TimelineCacheEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner.timelines.get(key).cloned())
    }

    async fn cache_timeline(
        &self,
        key: &IssueKey,
        events: Vec<RemoteTimelineEvent>,
        fetched_at: DateTime<Utc>,
        revision: u64,
    ) -> Result<TimelineCacheEntry> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .timelines
            .entry(key.clone())
            .or_insert_with(|| TimelineCacheEntry::new(key.clone()));
        entry.merge(events);
        entry.fetched_at = Some(fetched_at);
        entry.revision = Some(revision);
        Ok(entry.clone())
    }

    async fn record_failure(&self, key: &IssueKey) -> Result<u32> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .timelines
            .entry(key.clone())
            .or_insert_with(|| TimelineCacheEntry::new(key.clone()));
        entry.attempts = entry.attempts.saturating_add(1);
        Ok(entry.attempts)
    }

    async fn reset_attempts(&self, key: &IssueKey) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .timelines
            .get_mut(key)
            .ok_or_else(|| Error::RecordNotFound(key.to_string()))?;
        entry.attempts = 0;
        Ok(())
    }

    async fn retryable_entries(
        &self,
        project: &ProjectId,
        bound: u32,
    ) -> Result<Vec<TimelineCacheEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .timelines
            .values()
            .filter(|entry| &entry.key.project == project && entry.attempts < bound)
            .cloned()
            .collect())
    }

    async fn event_record(
        &self,
        project: &ProjectId,
        remote_event_id: &str,
    ) -> Result<Option<TimelineEventRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .events
            .get(&(project.clone(), remote_event_id.to_string()))
            .cloned())
    }

    async fn upsert_event_record(&self, record: TimelineEventRecord) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.events.insert(
            (record.project.clone(), record.remote_event_id.clone()),
            record,
        );
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        // Nothing to persist
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        Ok(())
    }
}
