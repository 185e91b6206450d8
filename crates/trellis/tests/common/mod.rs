//! Common test utilities shared across integration tests.
//!
//! [`ScriptedTracker`] is an in-memory remote tracker with fault injection;
//! [`RecordingSink`] and [`ScriptedHook`] capture what the orchestrator
//! reports. [`Harness`] wires them to in-memory storage and sync state.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use trellis::config::{DereplicationStrategy, ProjectConfig, SyncConfig};
use trellis::domain::{
    Issue, IssueId, IssueKey, IssueMutation, NewIssue, NewTimelineItem, ProjectId, RemoteIssueId,
    Template, TimelineItem, TimelineItemId, TimelineItemKind, TrackableId,
};
use trellis::error::{Error, Result};
use trellis::storage::{IssueStorage, new_in_memory_storage};
use trellis::sync::state::InMemorySyncState;
use trellis::sync::{
    Notification, NotificationSink, Page, PostReplayHook, RemoteEventPayload, RemoteIssue,
    RemoteTimelineEvent, RemoteTracker, SyncContext, SyncOrchestrator, SyncStateStore,
};
use trellis::template::TemplateRegistry;

/// Priority schema of the `bug` template.
pub const PRIORITY_SCHEMA: &str = r#"{"type": ["integer", "null"], "minimum": 0, "maximum": 4}"#;

/// Severity schema of the `bug` template.
pub const SEVERITY_SCHEMA: &str = r#"{"type": ["string", "null"], "enum": ["low", "high", null]}"#;

/// A fixed timestamp `minute` minutes into the test epoch.
pub fn ts(minute: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::minutes(minute)
}

/// A remote issue with no templated field values.
pub fn remote_issue(id: &str, title: &str, updated_minute: i64) -> RemoteIssue {
    RemoteIssue {
        id: id.into(),
        title: title.to_string(),
        body: format!("body of {id}"),
        created_at: ts(0),
        updated_at: ts(updated_minute),
        fields: BTreeMap::new(),
    }
}

/// A remote issue with the given templated field values.
pub fn remote_issue_with(id: &str, title: &str, fields: &[(&str, Value)]) -> RemoteIssue {
    RemoteIssue {
        fields: fields
            .iter()
            .map(|(name, value)| ((*name).to_string(), value.clone()))
            .collect(),
        ..remote_issue(id, title, 1)
    }
}

/// A comment event.
pub fn comment(id: &str, body: &str, minute: i64) -> RemoteTimelineEvent {
    RemoteTimelineEvent {
        id: id.to_string(),
        created_at: ts(minute),
        actor: Some("octo".into()),
        payload: RemoteEventPayload::CommentCreated {
            body: body.to_string(),
            edited_at: None,
        },
    }
}

/// An event with an arbitrary payload.
pub fn event(id: &str, minute: i64, payload: RemoteEventPayload) -> RemoteTimelineEvent {
    RemoteTimelineEvent {
        id: id.to_string(),
        created_at: ts(minute),
        actor: Some("octo".into()),
        payload,
    }
}

/// A project mapped to the `<id>-trackable` trackable and `bug` template.
pub fn project(id: &str) -> ProjectConfig {
    ProjectConfig {
        id: id.into(),
        trackable: format!("{id}-trackable").as_str().into(),
        template: "bug".into(),
    }
}

/// How an injected fault fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Unclassified failure
    Transient,
    /// Condition needing operator attention
    Notified,
}

impl Fault {
    fn error(self, what: &str) -> Error {
        match self {
            Fault::Transient => Error::transient(anyhow::anyhow!("{what}: connection reset")),
            Fault::Notified => Error::notified("bad-credentials", format!("{what}: token rejected")),
        }
    }
}

#[derive(Default)]
struct TrackerState {
    issues: BTreeMap<ProjectId, Vec<RemoteIssue>>,
    timelines: HashMap<(ProjectId, RemoteIssueId), Vec<RemoteTimelineEvent>>,
    failing_listings: HashMap<ProjectId, Fault>,
    failing_timelines: HashMap<(ProjectId, RemoteIssueId), Fault>,
    timeline_calls: HashMap<(ProjectId, RemoteIssueId), usize>,
}

/// In-memory remote tracker with cursor pagination and fault injection.
#[derive(Default)]
pub struct ScriptedTracker {
    state: Mutex<TrackerState>,
}

fn paginate<T: Clone>(items: &[T], cursor: Option<&str>, page_size: u32) -> Page<T> {
    let start: usize = cursor.map_or(0, |c| c.parse().unwrap());
    let end = (start + page_size as usize).min(items.len());
    Page {
        items: items[start..end].to_vec(),
        next_cursor: (end < items.len()).then(|| end.to_string()),
    }
}

impl ScriptedTracker {
    /// Add or replace a remote issue.
    pub async fn put_issue(&self, project: &str, issue: RemoteIssue) {
        let mut state = self.state.lock().await;
        let issues = state.issues.entry(project.into()).or_default();
        match issues.iter_mut().find(|existing| existing.id == issue.id) {
            Some(existing) => *existing = issue,
            None => issues.push(issue),
        }
    }

    /// Append or replace a timeline event.
    pub async fn put_event(&self, project: &str, issue: &str, event: RemoteTimelineEvent) {
        let mut state = self.state.lock().await;
        let events = state
            .timelines
            .entry((project.into(), issue.into()))
            .or_default();
        match events.iter_mut().find(|existing| existing.id == event.id) {
            Some(existing) => *existing = event,
            None => events.push(event),
        }
    }

    /// Make issue listing of `project` fail until healed.
    pub async fn fail_listing(&self, project: &str, fault: Fault) {
        self.state
            .lock()
            .await
            .failing_listings
            .insert(project.into(), fault);
    }

    /// Make timeline listing of one issue fail until healed.
    pub async fn fail_timeline(&self, project: &str, issue: &str, fault: Fault) {
        self.state
            .lock()
            .await
            .failing_timelines
            .insert((project.into(), issue.into()), fault);
    }

    /// Remove every injected fault.
    pub async fn heal(&self) {
        let mut state = self.state.lock().await;
        state.failing_listings.clear();
        state.failing_timelines.clear();
    }

    /// How often the timeline of one issue was requested (all pages).
    pub async fn timeline_calls(&self, project: &str, issue: &str) -> usize {
        self.state
            .lock()
            .await
            .timeline_calls
            .get(&(project.into(), issue.into()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RemoteTracker for ScriptedTracker {
    async fn list_issues(
        &self,
        project: &ProjectId,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Page<RemoteIssue>> {
        let state = self.state.lock().await;
        if let Some(fault) = state.failing_listings.get(project) {
            return Err(fault.error(&format!("listing {project}")));
        }
        let issues = state.issues.get(project).cloned().unwrap_or_default();
        Ok(paginate(&issues, cursor, page_size))
    }

    async fn list_timeline(
        &self,
        project: &ProjectId,
        issue: &RemoteIssueId,
        cursor: Option<&str>,
        page_size: u32,
    ) -> Result<Page<RemoteTimelineEvent>> {
        let mut state = self.state.lock().await;
        let key = (project.clone(), issue.clone());
        *state.timeline_calls.entry(key.clone()).or_default() += 1;

        if let Some(fault) = state.failing_timelines.get(&key) {
            return Err(fault.error(&format!("timeline {project}#{issue}")));
        }
        let events = state.timelines.get(&key).cloned().unwrap_or_default();
        Ok(paginate(&events, cursor, page_size))
    }
}

/// Sink that records every notification.
#[derive(Default)]
pub struct RecordingSink {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    /// Everything received so far.
    pub async fn received(&self) -> Vec<Notification> {
        self.notifications.lock().await.clone()
    }

    /// Notifications with the given reason.
    pub async fn with_reason(&self, reason: &str) -> Vec<Notification> {
        self.received()
            .await
            .into_iter()
            .filter(|n| n.reason == reason)
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.notifications.lock().await.push(notification);
        Ok(())
    }
}

/// Post-replay hook that records calls and can be told to fail for an issue.
#[derive(Default)]
pub struct ScriptedHook {
    calls: Mutex<Vec<IssueKey>>,
    failing: Mutex<HashSet<IssueKey>>,
}

impl ScriptedHook {
    /// Fail the hook for `key` until healed.
    pub async fn fail_for(&self, key: IssueKey) {
        self.failing.lock().await.insert(key);
    }

    /// Stop failing.
    pub async fn heal(&self) {
        self.failing.lock().await.clear();
    }

    /// Keys the hook ran for, in order.
    pub async fn calls(&self) -> Vec<IssueKey> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl PostReplayHook for ScriptedHook {
    async fn after_replay(&self, key: &IssueKey, _issue: &IssueId) -> Result<()> {
        self.calls.lock().await.push(key.clone());
        if self.failing.lock().await.contains(key) {
            return Err(Error::Storage(format!("cleanup failed for {key}")));
        }
        Ok(())
    }
}

/// Issue storage whose next timeline append can be made to fail once.
pub struct FlakyStorage {
    inner: Arc<dyn IssueStorage>,
    fail_next_item: AtomicBool,
}

impl FlakyStorage {
    /// Wrap a fresh in-memory storage.
    pub fn new() -> Self {
        Self {
            inner: new_in_memory_storage(),
            fail_next_item: AtomicBool::new(false),
        }
    }

    /// Fail the next `add_timeline_item` call.
    pub fn fail_next_timeline_item(&self) {
        self.fail_next_item.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IssueStorage for FlakyStorage {
    async fn create_issue(&self, issue: NewIssue) -> Result<Issue> {
        self.inner.create_issue(issue).await
    }

    async fn get_issue(&self, id: &IssueId) -> Result<Option<Issue>> {
        self.inner.get_issue(id).await
    }

    async fn list_issues(&self, trackable: &TrackableId) -> Result<Vec<Issue>> {
        self.inner.list_issues(trackable).await
    }

    async fn update_issue(&self, id: &IssueId, mutation: IssueMutation) -> Result<Issue> {
        self.inner.update_issue(id, mutation).await
    }

    async fn add_timeline_item(
        &self,
        issue: &IssueId,
        item: NewTimelineItem,
    ) -> Result<TimelineItem> {
        if self.fail_next_item.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("graph write timed out".into()));
        }
        self.inner.add_timeline_item(issue, item).await
    }

    async fn edit_timeline_item(
        &self,
        id: &TimelineItemId,
        kind: TimelineItemKind,
        modified_at: DateTime<Utc>,
    ) -> Result<TimelineItem> {
        self.inner.edit_timeline_item(id, kind, modified_at).await
    }

    async fn get_timeline_item(&self, id: &TimelineItemId) -> Result<Option<TimelineItem>> {
        self.inner.get_timeline_item(id).await
    }

    async fn timeline(&self, issue: &IssueId) -> Result<Vec<TimelineItem>> {
        self.inner.timeline(issue).await
    }
}

/// Registry holding the `bug` template (`priority`, `severity`).
pub fn bug_registry() -> TemplateRegistry {
    let mut registry = TemplateRegistry::new();
    registry
        .register(
            Template::new("bug", "Bug")
                .with_field("priority", PRIORITY_SCHEMA)
                .with_field("severity", SEVERITY_SCHEMA),
        )
        .unwrap();
    registry
}

/// In-memory collaborators wired together.
pub struct Harness {
    pub issues: Arc<dyn IssueStorage>,
    pub templates: Arc<RwLock<TemplateRegistry>>,
    pub state: Arc<dyn SyncStateStore>,
    pub tracker: Arc<ScriptedTracker>,
    pub sink: Arc<RecordingSink>,
    pub hook: Arc<ScriptedHook>,
}

impl Harness {
    /// A harness with in-memory sync state.
    pub fn new() -> Self {
        Self::with_state(Arc::new(InMemorySyncState::default()))
    }

    /// A harness using the given sync state store.
    pub fn with_state(state: Arc<dyn SyncStateStore>) -> Self {
        Self::with_parts(new_in_memory_storage(), state)
    }

    /// A harness using the given issue storage and sync state store.
    pub fn with_parts(issues: Arc<dyn IssueStorage>, state: Arc<dyn SyncStateStore>) -> Self {
        Self {
            issues,
            templates: Arc::new(RwLock::new(bug_registry())),
            state,
            tracker: Arc::new(ScriptedTracker::default()),
            sink: Arc::new(RecordingSink::default()),
            hook: Arc::new(ScriptedHook::default()),
        }
    }

    /// An orchestrator over this harness.
    pub fn orchestrator(&self, config: SyncConfig) -> SyncOrchestrator {
        let ctx = SyncContext::new(
            self.issues.clone(),
            self.templates.clone(),
            self.state.clone(),
            self.tracker.clone(),
            config.dereplication,
        )
        .with_notifier(self.sink.clone())
        .with_hook(self.hook.clone());
        SyncOrchestrator::new(ctx, config).unwrap()
    }

    /// Default configuration syncing the given projects.
    pub fn config(projects: &[&str]) -> SyncConfig {
        SyncConfig {
            page_size: 2,
            projects: projects.iter().map(|id| project(id)).collect(),
            ..SyncConfig::default()
        }
    }

    /// The local issue linked to a remote one.
    pub async fn local_issue(&self, project: &str, issue: &str) -> Issue {
        let record = self
            .state
            .get_record(&IssueKey::new(project, issue))
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no record for {project}#{issue}"));
        self.issues
            .get_issue(&record.local_issue)
            .await
            .unwrap()
            .unwrap()
    }
}

/// A JSON priority value.
pub fn priority(value: i64) -> Value {
    json!(value)
}
