//! Names from the job store schema this monitor reads.
//!
//! The monitor never writes; these are the tables, columns and
//! notification channels it consumes.

/// Jobs table.
pub const JOBS_TABLE: &str = "procrastinate_jobs";
/// Append-only job event history.
pub const EVENTS_TABLE: &str = "procrastinate_events";
/// Worker liveness rows.
pub const WORKERS_TABLE: &str = "procrastinate_workers";

/// Notification channel carrying events for every queue.
pub const GLOBAL_CHANNEL: &str = "procrastinate_any_queue_v1";
/// Prefix of the per-queue notification channel.
pub const QUEUE_CHANNEL_PREFIX: &str = "procrastinate_queue_v1#";

/// Event label written when a job is deferred.
pub const DEFERRED_EVENT: &str = "deferred";

/// Column list selecting a job row, aliased for `JobRow`.
///
/// Enum columns are cast to text so they decode into `String`.
pub(crate) const JOB_COLUMNS: &str = r#"
    j.id, j.queue_name, j.task_name, j.priority, j.lock, j.queueing_lock,
    j.args, j.status::text AS status, j.scheduled_at, j.attempts,
    j.abort_requested, j.worker_id
"#;

/// Per-queue notification channel name.
pub fn queue_channel(queue: &str) -> String {
    format!("{QUEUE_CHANNEL_PREFIX}{queue}")
}
