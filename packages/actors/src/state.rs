//! Plain state types owned by the monitor actor.

use std::fmt;

use queue_core::JobStatus;

/// Connection lifecycle of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job list restriction. `None` shows every status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFilter(pub Option<JobStatus>);

impl StatusFilter {
    /// Options in cycling order.
    pub const OPTIONS: [StatusFilter; 6] = [
        StatusFilter(None),
        StatusFilter(Some(JobStatus::Doing)),
        StatusFilter(Some(JobStatus::Todo)),
        StatusFilter(Some(JobStatus::Succeeded)),
        StatusFilter(Some(JobStatus::Failed)),
        StatusFilter(Some(JobStatus::Cancelled)),
    ];

    pub const ALL: StatusFilter = StatusFilter(None);

    /// The option after this one, wrapping around.
    pub fn next(self) -> Self {
        let index = Self::OPTIONS.iter().position(|f| *f == self).unwrap_or(0);
        Self::OPTIONS[(index + 1) % Self::OPTIONS.len()]
    }

    pub fn status(self) -> Option<JobStatus> {
        self.0
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            None => f.write_str("All"),
            Some(status) => f.write_str(status.as_str()),
        }
    }
}

/// The secondary panel next to the job list. Only the selected one is
/// refreshed on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecondaryView {
    /// Per-status counts.
    #[default]
    Status,
    /// Recently deferred jobs.
    Live,
    /// Jobs presumed stuck.
    Orphaned,
}

impl SecondaryView {
    pub const ALL: [SecondaryView; 3] = [
        SecondaryView::Status,
        SecondaryView::Live,
        SecondaryView::Orphaned,
    ];

    pub fn next(self) -> Self {
        match self {
            SecondaryView::Status => SecondaryView::Live,
            SecondaryView::Live => SecondaryView::Orphaned,
            SecondaryView::Orphaned => SecondaryView::Status,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            SecondaryView::Status => SecondaryView::Orphaned,
            SecondaryView::Live => SecondaryView::Status,
            SecondaryView::Orphaned => SecondaryView::Live,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SecondaryView::Status => "Status",
            SecondaryView::Live => "Live",
            SecondaryView::Orphaned => "Orphaned",
        }
    }
}

/// What confirming a picker does, stored as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    QueueSwitch(String),
    ConnectionSwitch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerKind {
    Queue,
    Connection,
}

/// A list selection in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Picker {
    pub kind: PickerKind,
    pub items: Vec<String>,
    pub index: usize,
}

impl Picker {
    /// Open over `items` with the cursor on `current` if present.
    /// Returns `None` for an empty list.
    pub fn open(kind: PickerKind, items: Vec<String>, current: &str) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let index = items.iter().position(|i| i == current).unwrap_or(0);
        Some(Self { kind, items, index })
    }

    /// Move the cursor, staying within the list.
    pub fn move_by(&mut self, delta: i32) {
        let last = self.items.len().saturating_sub(1) as i64;
        self.index = (self.index as i64 + i64::from(delta)).clamp(0, last) as usize;
    }

    /// The action for the highlighted item.
    pub fn confirm(&self) -> Option<PendingAction> {
        let target = self.items.get(self.index)?.clone();
        Some(match self.kind {
            PickerKind::Queue => PendingAction::QueueSwitch(target),
            PickerKind::Connection => PendingAction::ConnectionSwitch(target),
        })
    }
}

/// A transient message that expires on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub seq: u64,
}
