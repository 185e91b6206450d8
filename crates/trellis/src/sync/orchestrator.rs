//! Sync orchestrator: the per-project discover, fetch, replay loop.
//!
//! A pass runs three steps for every configured project:
//!
//! 1. **Discover**: page through remote issues. New ones go through the
//!    dereplicator and are created or matched locally; changed ones have
//!    their templated fields updated. Either way the record is marked dirty.
//! 2. **Fetch**: pull and cache the full timeline of every dirty issue that
//!    still has retry budget. Nothing is interpreted yet.
//! 3. **Replay**: replay the cached events of every dirty issue that still
//!    has retry budget, run the post-replay hook and conditionally clear the
//!    dirty flag. A cached timeline is replayed even when this pass failed
//!    to fetch it again.
//!
//! Failures are isolated per issue and per project. Fetch and replay
//! failures count against the retry bound, except notified errors, which go
//! to the notification sink instead. An issue reaching the bound is left
//! dirty, reported as stuck, and announced once.
//!
//! State is saved after each project, so an aborted pass resumes from the
//! dirty flags and cached timelines it left behind.

use super::dereplication::{
    Dereplicator, ExternalKeyDereplicator, InvasiveDereplicator, IssueCandidate, IssueMatch,
};
use super::notify::{
    LoggingSink, NoopHook, Notification, NotificationSink, PostReplayHook, RETRIES_EXHAUSTED,
};
use super::remote::{RemoteIssue, RemoteTracker};
use super::replay::TimelineReplay;
use super::report::{IssueFailure, ProjectReport, SyncReport, SyncStage};
use super::state::{RemoteIssueRecord, SyncStateStore, TimelineCacheEntry};
use crate::config::{DereplicationStrategy, ProjectConfig, SyncConfig};
use crate::domain::{IssueId, IssueKey, NewIssue, ProjectId, ResolvedTemplate, Templated};
use crate::error::{Error, Result};
use crate::storage::IssueStorage;
use crate::template::{TemplateRegistry, update_fields, validate_initial_fields};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

/// Handles a sync pass works with.
///
/// Everything the pass touches is passed in here; there is no global state.
#[derive(Clone)]
pub struct SyncContext {
    /// Primary issue graph
    pub issues: Arc<dyn IssueStorage>,
    /// Templates imported issues are validated against
    pub templates: Arc<RwLock<TemplateRegistry>>,
    /// Sync side-store
    pub state: Arc<dyn SyncStateStore>,
    /// Remote tracker API
    pub tracker: Arc<dyn RemoteTracker>,
    /// Duplicate detection strategy
    pub dereplicator: Arc<dyn Dereplicator>,
    /// Operator notifications
    pub notifier: Arc<dyn NotificationSink>,
    /// Cleanup after a clean replay
    pub hook: Arc<dyn PostReplayHook>,
}

impl SyncContext {
    /// Build a context with the dereplicator selected by `strategy`, a
    /// logging notification sink and no post-replay hook.
    pub fn new(
        issues: Arc<dyn IssueStorage>,
        templates: Arc<RwLock<TemplateRegistry>>,
        state: Arc<dyn SyncStateStore>,
        tracker: Arc<dyn RemoteTracker>,
        strategy: DereplicationStrategy,
    ) -> Self {
        let dereplicator: Arc<dyn Dereplicator> = match strategy {
            DereplicationStrategy::Invasive => Arc::new(InvasiveDereplicator::new(issues.clone())),
            DereplicationStrategy::ExternalKey => {
                Arc::new(ExternalKeyDereplicator::new(issues.clone()))
            }
        };

        Self {
            issues,
            templates,
            state,
            tracker,
            dereplicator,
            notifier: Arc::new(LoggingSink),
            hook: Arc::new(NoopHook),
        }
    }

    /// Replace the notification sink.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the post-replay hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn PostReplayHook>) -> Self {
        self.hook = hook;
        self
    }
}

/// Per-issue async locks, created on first use.
///
/// An entry only the map still references is neither held nor awaited; such
/// entries are pruned whenever a lock is taken.
#[derive(Default)]
struct IssueLocks {
    locks: Mutex<HashMap<IssueKey, Arc<Mutex<()>>>>,
}

impl IssueLocks {
    async fn lock(&self, key: &IssueKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Drives sync passes.
///
/// One orchestrator may run overlapping passes (e.g. a scheduled and a
/// manual trigger); work on any single remote issue is serialized.
pub struct SyncOrchestrator {
    ctx: SyncContext,
    config: SyncConfig,
    replay: TimelineReplay,
    locks: IssueLocks,
}

impl SyncOrchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if `config` does not validate.
    pub fn new(ctx: SyncContext, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let replay = TimelineReplay::new(
            ctx.issues.clone(),
            ctx.state.clone(),
            ctx.dereplicator.clone(),
        );
        Ok(Self {
            ctx,
            config,
            replay,
            locks: IssueLocks::default(),
        })
    }

    /// The configuration this orchestrator runs with.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one pass over every configured project.
    ///
    /// Never fails as a whole: per-project and per-issue errors are
    /// captured in the report.
    pub async fn sync_pass(&self) -> SyncReport {
        let projects = &self.config.projects;
        let reports = if self.config.parallel_projects {
            join_all(projects.iter().map(|project| self.sync_project(project))).await
        } else {
            let mut reports = Vec::with_capacity(projects.len());
            for project in projects {
                reports.push(self.sync_project(project).await);
            }
            reports
        };

        let report = SyncReport { projects: reports };
        info!(
            projects = report.projects.len(),
            failures = report.failure_count(),
            stuck = report.stuck().count(),
            "Sync pass finished"
        );
        report
    }

    /// Run one pass over a single project.
    pub async fn sync_project(&self, project: &ProjectConfig) -> ProjectReport {
        let mut report = ProjectReport::new(project.id.clone());

        if let Err(e) = self.run_project(project, &mut report).await {
            self.report_error(&project.id, None, &e).await;
            report.error = Some(e.to_string());
        }

        // Checkpoint whatever progress was made
        if let Err(e) = self.ctx.state.save().await {
            warn!(project = %project.id, error = %e, "Failed to save sync state");
            report.error.get_or_insert_with(|| e.to_string());
        }

        info!(
            project = %project.id,
            discovered = report.discovered,
            created = report.created,
            matched = report.matched,
            dirty = report.marked_dirty,
            fetched = report.fetched,
            replayed = report.replayed,
            failures = report.failures.len(),
            stuck = report.stuck.len(),
            "Project sync finished"
        );
        report
    }

    async fn run_project(&self, project: &ProjectConfig, report: &mut ProjectReport) -> Result<()> {
        let template = self.ctx.templates.read().await.resolve(&project.template)?;

        self.discover(project, &template, report).await?;
        self.fetch_timelines(project, report).await?;
        self.replay_timelines(project, report).await?;

        report.stuck = self
            .ctx
            .state
            .stuck_records(&project.id, self.config.retry_bound)
            .await?
            .into_iter()
            .map(|record| record.key)
            .collect();
        Ok(())
    }

    // ========== Discover ==========

    async fn discover(
        &self,
        project: &ProjectConfig,
        template: &ResolvedTemplate,
        report: &mut ProjectReport,
    ) -> Result<()> {
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .ctx
                .tracker
                .list_issues(&project.id, cursor.as_deref(), self.config.page_size)
                .await?;

            for remote in page.items {
                report.discovered += 1;
                let key = IssueKey::new(project.id.clone(), remote.id.clone());
                let _guard = self.locks.lock(&key).await;

                if let Err(e) = self.discover_issue(project, template, &key, remote, report).await {
                    self.issue_failed(&key, SyncStage::Discover, e, report).await;
                }
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(()),
            }
        }
    }

    async fn discover_issue(
        &self,
        project: &ProjectConfig,
        template: &ResolvedTemplate,
        key: &IssueKey,
        remote: RemoteIssue,
        report: &mut ProjectReport,
    ) -> Result<()> {
        let local = match self.ctx.state.get_record(key).await? {
            Some(record) if remote.updated_at <= record.remote_updated_at => {
                debug!(issue = %key, "Remote issue unchanged");
                return Ok(());
            }
            Some(record) => {
                self.update_local_fields(&record.local_issue, template, remote.fields)
                    .await?;
                record.local_issue
            }
            None => self.link_new_issue(project, template, key, &remote, report).await?,
        };

        self.ctx
            .state
            .mark_dirty(key, &local, remote.updated_at)
            .await?;
        report.marked_dirty += 1;
        debug!(issue = %key, local = %local, "Marked dirty");
        Ok(())
    }

    /// Dereplicate a first-seen remote issue and create or match it locally.
    async fn link_new_issue(
        &self,
        project: &ProjectConfig,
        template: &ResolvedTemplate,
        key: &IssueKey,
        remote: &RemoteIssue,
        report: &mut ProjectReport,
    ) -> Result<IssueId> {
        let candidate = IssueCandidate {
            title: remote.title.clone(),
            body: remote.body.clone(),
            labels: BTreeSet::new(),
            external_ref: Some(key.external_ref()),
            fields: remote.fields.clone(),
            created_at: remote.created_at,
            timeline: Vec::new(),
        };

        let result = self
            .ctx
            .dereplicator
            .validate_issue(&project.trackable, candidate)
            .await?;

        let issue = match result.matched {
            IssueMatch::Existing(issue) => {
                info!(issue = %key, local = %issue.id, "Matched remote issue to existing issue");
                self.update_local_fields(&issue.id, template, remote.fields.clone())
                    .await?;
                report.matched += 1;
                issue
            }
            IssueMatch::Candidate(candidate) => {
                let templated_fields = validate_initial_fields(template, &candidate.fields)?;
                let issue = self
                    .ctx
                    .issues
                    .create_issue(NewIssue {
                        trackable: project.trackable.clone(),
                        template: template.id().clone(),
                        title: candidate.title,
                        body: candidate.body,
                        labels: candidate.labels,
                        external_ref: candidate.external_ref,
                        templated_fields,
                        created_at: candidate.created_at,
                    })
                    .await?;
                info!(issue = %key, local = %issue.id, "Created issue for remote issue");
                report.created += 1;
                issue
            }
        };

        let accepted = self
            .ctx
            .dereplicator
            .validate_timeline_item(&issue, result.emitted)
            .await?;
        for item in accepted {
            self.ctx.issues.add_timeline_item(&issue.id, item).await?;
        }
        Ok(issue.id)
    }

    /// Apply remote field values, migrating the issue if its template changed.
    async fn update_local_fields(
        &self,
        issue: &IssueId,
        template: &ResolvedTemplate,
        fields: BTreeMap<String, Value>,
    ) -> Result<()> {
        let template = template.clone();
        self.ctx
            .issues
            .update_issue(
                issue,
                Box::new(move |issue| {
                    let migrating = issue.template_id() != template.id();
                    if migrating {
                        issue.set_template_id(template.id().clone());
                    }
                    update_fields(issue, &template, &fields, migrating)
                }),
            )
            .await?;
        Ok(())
    }

    // ========== Timeline fetch ==========

    /// Fetch and cache the timeline of every dirty issue with retry budget left.
    async fn fetch_timelines(
        &self,
        project: &ProjectConfig,
        report: &mut ProjectReport,
    ) -> Result<()> {
        for record in self.ctx.state.dirty_records(&project.id).await? {
            if self.is_exhausted(&record.key).await? {
                continue;
            }

            let _guard = self.locks.lock(&record.key).await;
            match self.fetch_timeline(&record).await {
                Ok(entry) => {
                    debug!(issue = %record.key, events = entry.events.len(), "Cached timeline");
                    report.fetched += 1;
                }
                Err(e) => self.issue_failed(&record.key, SyncStage::Fetch, e, report).await,
            }
        }
        Ok(())
    }

    async fn fetch_timeline(&self, record: &RemoteIssueRecord) -> Result<TimelineCacheEntry> {
        let mut events = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .ctx
                .tracker
                .list_timeline(
                    &record.key.project,
                    &record.key.issue,
                    cursor.as_deref(),
                    self.config.page_size,
                )
                .await?;
            events.extend(page.items);

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.ctx
            .state
            .cache_timeline(&record.key, events, Utc::now(), record.revision)
            .await
    }

    async fn is_exhausted(&self, key: &IssueKey) -> Result<bool> {
        Ok(self
            .ctx
            .state
            .timeline_entry(key)
            .await?
            .is_some_and(|entry| entry.attempts >= self.config.retry_bound))
    }

    // ========== Timeline replay ==========

    /// Replay every cached timeline of a dirty issue with retry budget left.
    ///
    /// Works from the cache alone, so a timeline fetched on an earlier pass
    /// is replayed even if this pass could not fetch it again.
    async fn replay_timelines(
        &self,
        project: &ProjectConfig,
        report: &mut ProjectReport,
    ) -> Result<()> {
        let entries = self
            .ctx
            .state
            .retryable_entries(&project.id, self.config.retry_bound)
            .await?;

        for entry in entries {
            let Some(revision) = entry.revision else {
                continue;
            };

            let _guard = self.locks.lock(&entry.key).await;
            let record = match self.ctx.state.get_record(&entry.key).await {
                Ok(Some(record)) if record.dirty => record,
                Ok(_) => continue,
                Err(e) => {
                    self.issue_failed(&entry.key, SyncStage::Replay, e, report).await;
                    continue;
                }
            };

            match self.replay_issue(&entry, &record, revision).await {
                Ok(true) => report.replayed += 1,
                Ok(false) => {
                    debug!(issue = %entry.key, revision, "Record changed since the cached fetch, leaving dirty");
                }
                Err(e) => self.issue_failed(&entry.key, SyncStage::Replay, e, report).await,
            }
        }
        Ok(())
    }

    /// Replay every cached event; `Ok(false)` if the dirty flag could not be cleared.
    ///
    /// Attempts are reset only once the flag is cleared, so an issue whose
    /// cache keeps going stale still runs into the retry bound.
    async fn replay_issue(
        &self,
        entry: &TimelineCacheEntry,
        record: &RemoteIssueRecord,
        revision: u64,
    ) -> Result<bool> {
        for event in &entry.events {
            self.replay.handle_event(record, event).await?;
        }

        self.ctx
            .hook
            .after_replay(&record.key, &record.local_issue)
            .await?;
        let cleared = self
            .ctx
            .state
            .clear_dirty(&record.key, revision, Utc::now())
            .await?;
        if cleared {
            self.ctx.state.reset_attempts(&record.key).await?;
        }
        Ok(cleared)
    }

    // ========== Failure handling ==========

    /// Record a per-issue failure, counting it against the retry budget.
    async fn issue_failed(
        &self,
        key: &IssueKey,
        stage: SyncStage,
        err: Error,
        report: &mut ProjectReport,
    ) {
        self.report_error(&key.project, Some(key), &err).await;

        let counts = stage != SyncStage::Discover && !err.is_notified();
        report.failures.push(IssueFailure {
            key: key.clone(),
            stage,
            error: err.to_string(),
        });
        if !counts {
            return;
        }

        let attempts = match self.ctx.state.record_failure(key).await {
            Ok(attempts) => attempts,
            Err(e) => {
                warn!(issue = %key, error = %e, "Failed to record sync attempt");
                return;
            }
        };

        if attempts == self.config.retry_bound {
            error!(
                issue = %key,
                attempts,
                "Timeline retries exhausted; issue left dirty until reset"
            );
            self.deliver(Notification {
                project: key.project.clone(),
                issue: Some(key.clone()),
                reason: RETRIES_EXHAUSTED.to_string(),
                message: format!(
                    "{key} failed {attempts} timeline attempts (last {stage} error: {err})"
                ),
            })
            .await;
        } else {
            warn!(issue = %key, %stage, attempts, "Timeline attempt failed");
        }
    }

    /// Log an error; forward it to the sink if it is a notified error.
    async fn report_error(&self, project: &ProjectId, issue: Option<&IssueKey>, err: &Error) {
        if err.is_notified() {
            error!(project = %project, issue = ?issue.map(ToString::to_string), error = %err, "Sync needs attention");
            self.deliver(Notification::from_error(project, issue, err))
                .await;
        } else {
            warn!(project = %project, issue = ?issue.map(ToString::to_string), error = %err, "Sync failed");
        }
    }

    /// Best-effort delivery: failures are logged, never retried.
    async fn deliver(&self, notification: Notification) {
        if let Err(e) = self.ctx.notifier.notify(notification).await {
            warn!(error = %e, "Failed to deliver notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RemoteIssueId;
    use crate::storage::new_in_memory_storage;
    use crate::sync::remote::{Page, RemoteTimelineEvent};
    use crate::sync::state::InMemorySyncState;

    #[tokio::test]
    async fn issue_locks_serialize_same_key() {
        let locks = IssueLocks::default();
        let key = IssueKey::new("p", "1");

        let guard = locks.lock(&key).await;
        let other = locks.lock(&IssueKey::new("p", "2")).await;
        drop(other);

        let contended = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.lock(&key),
        )
        .await;
        assert!(contended.is_err(), "same key must block while held");

        drop(guard);
        let _again = locks.lock(&key).await;
    }

    #[tokio::test]
    async fn released_issue_locks_are_pruned() {
        let locks = IssueLocks::default();
        for id in 0..50 {
            drop(locks.lock(&IssueKey::new("p", id.to_string())).await);
        }

        let held = locks.lock(&IssueKey::new("p", "held")).await;
        assert_eq!(locks.len().await, 1);

        // A held lock survives pruning and still excludes
        let _other = locks.lock(&IssueKey::new("p", "other")).await;
        assert_eq!(locks.len().await, 2);
        let contended = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            locks.lock(&IssueKey::new("p", "held")),
        )
        .await;
        assert!(contended.is_err());
        drop(held);
    }

    #[test]
    fn invalid_config_is_rejected() {
        struct NoTracker;

        #[async_trait::async_trait]
        impl RemoteTracker for NoTracker {
            async fn list_issues(
                &self,
                _project: &ProjectId,
                _cursor: Option<&str>,
                _page_size: u32,
            ) -> Result<Page<RemoteIssue>> {
                Ok(Page::last(Vec::new()))
            }

            async fn list_timeline(
                &self,
                _project: &ProjectId,
                _issue: &RemoteIssueId,
                _cursor: Option<&str>,
                _page_size: u32,
            ) -> Result<Page<RemoteTimelineEvent>> {
                Ok(Page::last(Vec::new()))
            }
        }

        let ctx = SyncContext::new(
            new_in_memory_storage(),
            Arc::new(RwLock::new(TemplateRegistry::new())),
            Arc::new(InMemorySyncState::default()),
            Arc::new(NoTracker),
            DereplicationStrategy::Invasive,
        );
        let config = SyncConfig {
            retry_bound: 0,
            ..SyncConfig::default()
        };
        assert!(matches!(
            SyncOrchestrator::new(ctx, config),
            Err(Error::Config(_))
        ));
    }
}
