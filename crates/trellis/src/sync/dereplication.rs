//! Dereplication: recognizing a newly observed remote issue as one already
//! known locally.
//!
//! Two strategies implement [`Dereplicator`]:
//!
//! - [`InvasiveDereplicator`] embeds a correlation stamp (a UUID in a
//!   bracketed title suffix, `"Fix bug [123e4567-...]"`) and matches issues
//!   whose current titles carry the same stamp. An unstamped candidate is
//!   first looked up by external reference, so an interrupted import is
//!   picked up again instead of minting a second stamp.
//! - [`ExternalKeyDereplicator`] matches on the `project#remote-id`
//!   external reference and filters timeline items by their remote event id.
//!
//! A current title is derived from title-change history: the newest
//! title-change item wins, falling back to the stored title.

use crate::domain::{Issue, NewTimelineItem, TimelineItem, TimelineItemKind, TrackableId};
use crate::error::Result;
use crate::storage::IssueStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::debug;
use uuid::Uuid;

/// Trailing ` [8-4-4-4-12]` hex suffix.
static STAMP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\s\[([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\]$",
    )
    .expect("stamp regex is valid")
});

/// Extract the correlation stamp from the end of a title.
#[must_use]
pub fn extract_stamp(title: &str) -> Option<Uuid> {
    let captures = STAMP_REGEX.captures(title)?;
    Uuid::parse_str(captures.get(1)?.as_str()).ok()
}

/// The title with any trailing correlation stamp removed.
#[must_use]
pub fn strip_stamp(title: &str) -> &str {
    match STAMP_REGEX.find(title) {
        Some(stamp) => &title[..stamp.start()],
        None => title,
    }
}

/// Append a correlation stamp to a title.
#[must_use]
pub fn append_stamp(title: &str, stamp: Uuid) -> String {
    format!("{title} [{stamp}]")
}

/// An issue observed on the remote tracker, not yet persisted locally.
#[derive(Debug, Clone, PartialEq)]
pub struct IssueCandidate {
    /// Title as observed
    pub title: String,

    /// Body text
    pub body: String,

    /// Labels
    pub labels: BTreeSet<String>,

    /// Remote reference (`project#remote-id`)
    pub external_ref: Option<String>,

    /// Initial templated field values
    pub fields: BTreeMap<String, Value>,

    /// Creation time on the tracker
    pub created_at: DateTime<Utc>,

    /// Timeline items to attach on creation, oldest first
    pub timeline: Vec<NewTimelineItem>,
}

impl IssueCandidate {
    /// The title after applying the candidate's own title-change history.
    #[must_use]
    pub fn current_title(&self) -> &str {
        latest_title(
            self.timeline
                .iter()
                .map(|item| (item.created_at, &item.kind)),
        )
        .unwrap_or(&self.title)
    }
}

/// The issue a candidate resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueMatch {
    /// The candidate duplicates an existing local issue
    Existing(Issue),

    /// The candidate is new; the caller should create it
    Candidate(IssueCandidate),
}

/// Outcome of [`Dereplicator::validate_issue`].
#[derive(Debug, Clone, PartialEq)]
pub struct DereplicationResult {
    /// What the candidate resolved to
    pub matched: IssueMatch,

    /// Timeline items the strategy synthesized (e.g. a stamp title change)
    pub emitted: Vec<NewTimelineItem>,
}

impl DereplicationResult {
    fn unchanged(matched: IssueMatch) -> Self {
        Self {
            matched,
            emitted: Vec::new(),
        }
    }
}

/// Strategy for recognizing duplicate issues and timeline items.
#[async_trait]
pub trait Dereplicator: Send + Sync {
    /// Resolve `candidate` against the issues already in `trackable`.
    ///
    /// Calling this again for an already-known issue must return the same
    /// match and emit nothing.
    async fn validate_issue(
        &self,
        trackable: &TrackableId,
        candidate: IssueCandidate,
    ) -> Result<DereplicationResult>;

    /// Filter candidate timeline items for `issue` down to the ones to keep.
    async fn validate_timeline_item(
        &self,
        issue: &Issue,
        items: Vec<NewTimelineItem>,
    ) -> Result<Vec<NewTimelineItem>>;
}

fn latest_title<'a>(
    items: impl Iterator<Item = (DateTime<Utc>, &'a TimelineItemKind)>,
) -> Option<&'a str> {
    items
        .filter_map(|(at, kind)| match kind {
            TimelineItemKind::TitleChanged { new_title, .. } => Some((at, new_title.as_str())),
            _ => None,
        })
        // max_by_key keeps the last of equal keys, so later insertions win ties
        .max_by_key(|(at, _)| *at)
        .map(|(_, title)| title)
}

fn current_title<'a>(issue: &'a Issue, timeline: &'a [TimelineItem]) -> &'a str {
    latest_title(timeline.iter().map(|item| (item.created_at, &item.kind)))
        .unwrap_or(&issue.title)
}

async fn find_by_external_ref(
    issues: &dyn IssueStorage,
    trackable: &TrackableId,
    external_ref: &str,
) -> Result<Option<Issue>> {
    Ok(issues
        .list_issues(trackable)
        .await?
        .into_iter()
        .find(|issue| issue.external_ref.as_deref() == Some(external_ref)))
}

/// Title-stamp dereplication.
pub struct InvasiveDereplicator {
    issues: Arc<dyn IssueStorage>,
}

impl InvasiveDereplicator {
    /// Create a dereplicator that looks up existing issues in `issues`.
    pub fn new(issues: Arc<dyn IssueStorage>) -> Self {
        Self { issues }
    }
}

#[async_trait]
impl Dereplicator for InvasiveDereplicator {
    async fn validate_issue(
        &self,
        trackable: &TrackableId,
        mut candidate: IssueCandidate,
    ) -> Result<DereplicationResult> {
        let Some(stamp) = extract_stamp(candidate.current_title()) else {
            // An import interrupted before its sync record was written left
            // the stamp only on the local side; find it by reference instead
            if let Some(external_ref) = candidate.external_ref.as_deref()
                && let Some(issue) =
                    find_by_external_ref(self.issues.as_ref(), trackable, external_ref).await?
            {
                debug!(trackable = %trackable, issue = %issue.id, external_ref, "Matched unstamped issue by external reference");
                return Ok(DereplicationResult::unchanged(IssueMatch::Existing(issue)));
            }

            let old_title = candidate.current_title().to_string();
            let new_title = append_stamp(&old_title, Uuid::new_v4());
            debug!(trackable = %trackable, title = %new_title, "Minted correlation stamp");

            let change = NewTimelineItem::new(
                Utc::now(),
                TimelineItemKind::TitleChanged {
                    old_title,
                    new_title: new_title.clone(),
                },
            );
            candidate.title = new_title;
            return Ok(DereplicationResult {
                matched: IssueMatch::Candidate(candidate),
                emitted: vec![change],
            });
        };

        for issue in self.issues.list_issues(trackable).await? {
            let timeline = self.issues.timeline(&issue.id).await?;
            if extract_stamp(current_title(&issue, &timeline)) == Some(stamp) {
                debug!(trackable = %trackable, issue = %issue.id, %stamp, "Matched by correlation stamp");
                return Ok(DereplicationResult::unchanged(IssueMatch::Existing(issue)));
            }
        }

        Ok(DereplicationResult::unchanged(IssueMatch::Candidate(
            candidate,
        )))
    }

    async fn validate_timeline_item(
        &self,
        _issue: &Issue,
        items: Vec<NewTimelineItem>,
    ) -> Result<Vec<NewTimelineItem>> {
        Ok(items)
    }
}

/// External-reference dereplication.
pub struct ExternalKeyDereplicator {
    issues: Arc<dyn IssueStorage>,
}

impl ExternalKeyDereplicator {
    /// Create a dereplicator that looks up existing issues in `issues`.
    pub fn new(issues: Arc<dyn IssueStorage>) -> Self {
        Self { issues }
    }
}

#[async_trait]
impl Dereplicator for ExternalKeyDereplicator {
    async fn validate_issue(
        &self,
        trackable: &TrackableId,
        candidate: IssueCandidate,
    ) -> Result<DereplicationResult> {
        let Some(external_ref) = candidate.external_ref.as_deref() else {
            return Ok(DereplicationResult::unchanged(IssueMatch::Candidate(
                candidate,
            )));
        };

        let existing = find_by_external_ref(self.issues.as_ref(), trackable, external_ref).await?;

        Ok(DereplicationResult::unchanged(match existing {
            Some(issue) => IssueMatch::Existing(issue),
            None => IssueMatch::Candidate(candidate),
        }))
    }

    async fn validate_timeline_item(
        &self,
        issue: &Issue,
        items: Vec<NewTimelineItem>,
    ) -> Result<Vec<NewTimelineItem>> {
        let mut seen: HashSet<String> = self
            .issues
            .timeline(&issue.id)
            .await?
            .into_iter()
            .filter_map(|item| item.external_ref)
            .collect();

        Ok(items
            .into_iter()
            .filter(|item| match &item.external_ref {
                Some(external_ref) => seen.insert(external_ref.clone()),
                None => true,
            })
            .collect())
    }
}
