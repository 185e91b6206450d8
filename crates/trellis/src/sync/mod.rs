//! External tracker synchronization.
//!
//! - [`remote`]: the paginated remote tracker contract
//! - [`state`]: durable sync state (dirty flags, cached timelines, replay records)
//! - [`dereplication`]: matching remote issues to existing local ones
//! - [`replay`]: applying one remote event onto the internal model
//! - [`notify`]: notification sink and post-replay hook
//! - [`orchestrator`]: the discover, fetch, replay pass

pub mod dereplication;
pub mod notify;
pub mod orchestrator;
pub mod remote;
pub mod replay;
pub mod report;
pub mod state;

pub use dereplication::{
    DereplicationResult, Dereplicator, ExternalKeyDereplicator, InvasiveDereplicator,
    IssueCandidate, IssueMatch,
};
pub use notify::{LoggingSink, NoopHook, Notification, NotificationSink, PostReplayHook};
pub use orchestrator::{SyncContext, SyncOrchestrator};
pub use remote::{Page, RemoteEventPayload, RemoteIssue, RemoteTimelineEvent, RemoteTracker};
pub use replay::TimelineReplay;
pub use report::{IssueFailure, ProjectReport, SyncReport, SyncStage};
pub use state::{StateBackend, SyncStateStore, create_state_store};
