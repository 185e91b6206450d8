//! Durable side-store of the sync engine.
//!
//! Three record kinds live here, independent of the primary issue graph:
//!
//! - [`RemoteIssueRecord`]: one per observed remote issue, carrying the dirty
//!   flag and a revision counter for conditional clears
//! - [`TimelineCacheEntry`]: raw timeline events fetched for a remote issue,
//!   plus the retry attempt counter
//! - [`TimelineEventRecord`]: which internal item a remote event was replayed
//!   into, for idempotent replay
//!
//! Records are never deleted by the sync engine.
//!
//! # Backends
//!
//! [`create_state_store`] returns either a purely in-memory store or one
//! backed by a JSONL snapshot file. The JSONL store keeps everything in
//! memory and writes the snapshot on [`SyncStateStore::save`].

use crate::domain::{IssueId, IssueKey, ProjectId, TimelineItemId};
use crate::error::Result;
use crate::sync::remote::RemoteTimelineEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod in_memory;
pub mod jsonl;

pub use in_memory::InMemorySyncState;
pub use jsonl::LoadWarning;

/// Sync state of one remote issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIssueRecord {
    /// (project, remote issue) identity
    pub key: IssueKey,

    /// Local issue the remote one is linked to
    pub local_issue: IssueId,

    /// Timeline changes remain to be pulled and replayed
    pub dirty: bool,

    /// Bumped by every `mark_dirty`; guards `clear_dirty`
    pub revision: u64,

    /// Remote "last updated" timestamp seen at the last discover
    pub remote_updated_at: DateTime<Utc>,

    /// When the dirty flag was last cleared
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Raw timeline events fetched for one remote issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineCacheEntry {
    /// (project, remote issue) identity
    pub key: IssueKey,

    /// Cached events, ordered by creation time
    pub events: Vec<RemoteTimelineEvent>,

    /// Failed fetch/replay attempts since the last success
    pub attempts: u32,

    /// Time of the last successful fetch
    pub fetched_at: Option<DateTime<Utc>>,

    /// Record revision the cached events were fetched at
    #[serde(default)]
    pub revision: Option<u64>,
}

impl TimelineCacheEntry {
    /// An empty entry with no attempts.
    #[must_use]
    pub fn new(key: IssueKey) -> Self {
        Self {
            key,
            events: Vec::new(),
            attempts: 0,
            fetched_at: None,
            revision: None,
        }
    }

    /// Merge freshly fetched events in, replacing cached events with the same id.
    pub fn merge(&mut self, fetched: Vec<RemoteTimelineEvent>) {
        for event in fetched {
            match self.events.iter_mut().find(|cached| cached.id == event.id) {
                Some(cached) => *cached = event,
                None => self.events.push(event),
            }
        }
        self.events.sort_by_key(|event| event.created_at);
    }
}

/// Record of a remote event that has been replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEventRecord {
    /// Project the event came from
    pub project: ProjectId,

    /// Remote event id
    pub remote_event_id: String,

    /// Internal item the event produced
    pub local_item: TimelineItemId,

    /// Timestamp returned by the replay
    pub applied_at: DateTime<Utc>,

    /// Edit timestamp of the event version that was applied
    pub edited_at: Option<DateTime<Utc>>,

    /// Remote event kind (e.g. `comment-created`)
    pub event_kind: String,
}

/// Storage for sync state.
///
/// Every method is atomic with respect to the others; in particular
/// [`mark_dirty`](Self::mark_dirty), [`clear_dirty`](Self::clear_dirty) and
/// [`record_failure`](Self::record_failure) are safe under overlapping passes.
#[async_trait]
pub trait SyncStateStore: Send + Sync {
    // ========== Remote issue records ==========

    /// Get the record of a remote issue.
    async fn get_record(&self, key: &IssueKey) -> Result<Option<RemoteIssueRecord>>;

    /// Link a remote issue to a local one and mark it dirty.
    ///
    /// Creates the record on first observation. Bumps `revision` and stores
    /// `remote_updated_at`. Returns the updated record.
    async fn mark_dirty(
        &self,
        key: &IssueKey,
        local_issue: &IssueId,
        remote_updated_at: DateTime<Utc>,
    ) -> Result<RemoteIssueRecord>;

    /// All dirty records of a project, ordered by key.
    async fn dirty_records(&self, project: &ProjectId) -> Result<Vec<RemoteIssueRecord>>;

    /// Clear the dirty flag if the record is still at `expected_revision`.
    ///
    /// Returns `false` (and changes nothing) when the record was re-marked
    /// dirty in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if the record doesn't exist.
    async fn clear_dirty(
        &self,
        key: &IssueKey,
        expected_revision: u64,
        synced_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Dirty records whose timeline entry has reached `bound` attempts.
    async fn stuck_records(&self, project: &ProjectId, bound: u32)
    -> Result<Vec<RemoteIssueRecord>>;

    // ========== Timeline cache ==========

    /// Get the timeline cache entry of a remote issue.
    async fn timeline_entry(&self, key: &IssueKey) -> Result<Option<TimelineCacheEntry>>;

    /// Merge fetched events into the cache entry, creating it if needed.
    ///
    /// `revision` is the record revision the events were fetched at; replay
    /// uses it to clear the dirty flag conditionally.
    async fn cache_timeline(
        &self,
        key: &IssueKey,
        events: Vec<RemoteTimelineEvent>,
        fetched_at: DateTime<Utc>,
        revision: u64,
    ) -> Result<TimelineCacheEntry>;

    /// Count one failed attempt and return the new total.
    ///
    /// Creates the entry if this is the first attempt.
    async fn record_failure(&self, key: &IssueKey) -> Result<u32>;

    /// Reset the attempt counter to zero.
    ///
    /// # Errors
    ///
    /// Returns `Error::RecordNotFound` if no entry exists for `key`.
    async fn reset_attempts(&self, key: &IssueKey) -> Result<()>;

    /// Entries of a project with fewer than `bound` attempts, ordered by key.
    async fn retryable_entries(
        &self,
        project: &ProjectId,
        bound: u32,
    ) -> Result<Vec<TimelineCacheEntry>>;

    // ========== Replayed events ==========

    /// Get the record of a replayed remote event.
    async fn event_record(
        &self,
        project: &ProjectId,
        remote_event_id: &str,
    ) -> Result<Option<TimelineEventRecord>>;

    /// Insert or replace the record of a replayed remote event.
    async fn upsert_event_record(&self, record: TimelineEventRecord) -> Result<()>;

    // ========== Persistence ==========

    /// Persist the current state. No-op for the in-memory backend.
    async fn save(&self) -> Result<()>;

    /// Discard in-memory state and re-read it from the backing file.
    /// No-op for the in-memory backend.
    async fn reload(&self) -> Result<()>;
}

/// Backend configuration for the sync state store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum StateBackend {
    /// Ephemeral, in-memory state
    #[default]
    #[serde(rename = "memory")]
    InMemory,

    /// In-memory state snapshotted to a JSONL file
    Jsonl {
        /// Snapshot file
        path: PathBuf,
    },
}

impl StateBackend {
    /// The snapshot file for file-based backends.
    #[must_use]
    pub fn data_path(&self) -> Option<&Path> {
        match self {
            StateBackend::Jsonl { path } => Some(path),
            StateBackend::InMemory => None,
        }
    }
}

/// JSONL-snapshotted wrapper around the in-memory store.
struct JsonlBackedState {
    inner: InMemorySyncState,
    path: PathBuf,
}

impl JsonlBackedState {
    async fn open(path: PathBuf) -> Result<Self> {
        let state = Self {
            inner: InMemorySyncState::default(),
            path,
        };
        state.reload().await?;
        Ok(state)
    }
}

#[async_trait]
impl SyncStateStore for JsonlBackedState {
    async fn get_record(&self, key: &IssueKey) -> Result<Option<RemoteIssueRecord>> {
        self.inner.get_record(key).await
    }

    async fn mark_dirty(
        &self,
        key: &IssueKey,
        local_issue: &IssueId,
        remote_updated_at: DateTime<Utc>,
    ) -> Result<RemoteIssueRecord> {
        self.inner
            .mark_dirty(key, local_issue, remote_updated_at)
            .await
    }

    async fn dirty_records(&self, project: &ProjectId) -> Result<Vec<RemoteIssueRecord>> {
        self.inner.dirty_records(project).await
    }

    async fn clear_dirty(
        &self,
        key: &IssueKey,
        expected_revision: u64,
        synced_at: DateTime<Utc>,
    ) -> Result<bool> {
        self.inner
            .clear_dirty(key, expected_revision, synced_at)
            .await
    }

    async fn stuck_records(
        &self,
        project: &ProjectId,
        bound: u32,
    ) -> Result<Vec<RemoteIssueRecord>> {
        self.inner.stuck_records(project, bound).await
    }

    async fn timeline_entry(&self, key: &IssueKey) -> Result<Option<TimelineCacheEntry>> {
        self.inner.timeline_entry(key).await
    }

    async fn cache_timeline(
        &self,
        key: &IssueKey,
        events: Vec<RemoteTimelineEvent>,
        fetched_at: DateTime<Utc>,
        revision: u64,
    ) -> Result<TimelineCacheEntry> {
        self.inner
            .cache_timeline(key, events, fetched_at, revision)
            .await
    }

    async fn record_failure(&self, key: &IssueKey) -> Result<u32> {
        self.inner.record_failure(key).await
    }

    async fn reset_attempts(&self, key: &IssueKey) -> Result<()> {
        self.inner.reset_attempts(key).await
    }

    async fn retryable_entries(
        &self,
        project: &ProjectId,
        bound: u32,
    ) -> Result<Vec<TimelineCacheEntry>> {
        self.inner.retryable_entries(project, bound).await
    }

    async fn event_record(
        &self,
        project: &ProjectId,
        remote_event_id: &str,
    ) -> Result<Option<TimelineEventRecord>> {
        self.inner.event_record(project, remote_event_id).await
    }

    async fn upsert_event_record(&self, record: TimelineEventRecord) -> Result<()> {
        self.inner.upsert_event_record(record).await
    }

    async fn save(&self) -> Result<()> {
        let lines = self.inner.snapshot().await;
        jsonl::write_snapshot(&self.path, &lines).await
    }

    async fn reload(&self) -> Result<()> {
        if !self.path.exists() {
            // First run: nothing persisted yet
            self.inner.restore(Vec::new()).await;
            return Ok(());
        }

        let (lines, warnings) = jsonl::read_snapshot(&self.path).await?;
        for warning in &warnings {
            tracing::warn!(warning = ?warning, path = %self.path.display(), "Sync state load warning");
        }
        self.inner.restore(lines).await;
        Ok(())
    }
}

/// Create a sync state store for the given backend.
///
/// For [`StateBackend::Jsonl`] an existing snapshot is loaded; a missing
/// file starts empty and is created on the first `save()`.
///
/// # Errors
///
/// Returns an error if an existing snapshot file cannot be read.
pub async fn create_state_store(backend: StateBackend) -> Result<Arc<dyn SyncStateStore>> {
    match backend {
        StateBackend::InMemory => Ok(Arc::new(InMemorySyncState::default())),
        StateBackend::Jsonl { path } => Ok(Arc::new(JsonlBackedState::open(path).await?)),
    }
}
