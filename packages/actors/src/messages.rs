//! Message types for the monitor actor.
//!
//! User actions come from the outside; everything else is produced by tasks
//! the actor spawned and carries the generation it was issued under.

use db::{ConnectError, Session, StoreError};
use queue_core::{ChangeEvent, Job, JobDetail, JobId, OrphanedJob, StatusCount};
use ractor::RpcReplyPort;

use crate::state::{SecondaryView, StatusFilter};
use crate::view::MonitorView;

/// Messages for the MonitorActor, generic over the session's store.
#[derive(Debug)]
pub enum MonitorMessage<S: db::JobStore> {
    // --- user actions ---
    /// Open a session for a named profile, replacing the current one.
    /// `queue` overrides the profile's default queue.
    Connect {
        connection: String,
        queue: Option<String>,
    },

    /// Close the session and stay disconnected.
    Disconnect,

    /// Point the session at another queue.
    SwitchQueue { queue: String },

    /// Restrict the job list to one status, or show all.
    SetStatusFilter { filter: StatusFilter },

    /// Advance the status filter to the next option.
    CycleStatusFilter,

    /// Select a secondary view.
    SelectView { view: SecondaryView },

    /// Select the next secondary view.
    NextView,

    /// Select the previous secondary view.
    PrevView,

    /// Fetch a job with its history and open the detail view.
    ShowJob { id: JobId },

    /// Close the detail view.
    CloseDetail,

    /// Open the queue picker over the last fetched queue list.
    OpenQueuePicker,

    /// Open the connection picker over the configured profiles.
    OpenConnectionPicker,

    /// Move the picker cursor by `delta`, clamped.
    PickerMove { delta: i32 },

    /// Act on the highlighted picker item.
    PickerConfirm,

    /// Close the picker without acting.
    PickerCancel,

    /// Snapshot of the externally visible state.
    GetView { reply: RpcReplyPort<MonitorView> },

    /// Close everything and stop the actor.
    Shutdown,

    // --- producer results ---
    /// Outcome of a connect or switch attempt.
    Connected {
        generation: u64,
        result: Box<Result<Session<S>, ConnectError>>,
    },

    /// Poll timer fired.
    Tick { generation: u64 },

    /// A decoded change notification.
    Notification {
        session_generation: u64,
        event: ChangeEvent,
    },

    /// The subscription loop ended with a read failure.
    SubscriptionLost {
        session_generation: u64,
        error: StoreError,
    },

    /// Re-pointing the subscription at a new queue failed.
    ResubscribeFailed {
        session_generation: u64,
        error: StoreError,
    },

    JobsLoaded {
        generation: u64,
        filter: StatusFilter,
        result: Result<Vec<Job>, StoreError>,
    },

    StatusCountsLoaded {
        generation: u64,
        result: Result<Vec<StatusCount>, StoreError>,
    },

    RecentJobsLoaded {
        generation: u64,
        result: Result<Vec<Job>, StoreError>,
    },

    OrphansLoaded {
        generation: u64,
        result: Result<Vec<OrphanedJob>, StoreError>,
    },

    QueuesLoaded {
        generation: u64,
        result: Result<Vec<String>, StoreError>,
    },

    JobDetailLoaded {
        generation: u64,
        result: Result<JobDetail, StoreError>,
    },

    /// Expire the notice with this sequence number, if still shown.
    ClearNotice { seq: u64 },
}

/// Errors starting the monitor.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Config(#[from] queue_core::ConfigError),

    #[error("Actor error: {0}")]
    Spawn(#[from] ractor::SpawnErr),
}
