//! The view-update contract.
//!
//! The actor pushes a fresh [`MonitorView`] to its [`ViewSink`] after every
//! handled message. Rendering is the sink's business.

use queue_core::{Job, JobDetail, OrphanedJob, StatusBreakdown};

use crate::state::{ConnectionState, Picker, SecondaryView, StatusFilter};

/// Snapshot of everything a renderer may show.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorView {
    pub state: ConnectionState,
    /// Profile name of the current or last attempted session.
    pub connection: String,
    pub queue: String,
    pub generation: u64,
    /// Whether push notifications are flowing. Polling runs regardless.
    pub subscribed: bool,
    pub status_filter: StatusFilter,
    pub secondary: SecondaryView,
    pub jobs: Vec<Job>,
    pub breakdown: StatusBreakdown,
    pub recent: Vec<Job>,
    pub orphans: Vec<OrphanedJob>,
    pub queues: Vec<String>,
    pub detail: Option<JobDetail>,
    /// Last query failure; cleared by the next success.
    pub error: Option<String>,
    pub notice: Option<String>,
    pub picker: Option<Picker>,
}

/// Receives view snapshots.
pub trait ViewSink: Send + 'static {
    fn refresh(&mut self, view: &MonitorView);
}

/// Sink that drops every snapshot.
#[derive(Debug, Default)]
pub struct NullView;

impl ViewSink for NullView {
    fn refresh(&mut self, _view: &MonitorView) {}
}

impl<F> ViewSink for F
where
    F: FnMut(&MonitorView) + Send + 'static,
{
    fn refresh(&mut self, view: &MonitorView) {
        self(view)
    }
}
