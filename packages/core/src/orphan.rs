//! Heuristic classification of jobs presumed stuck or abandoned.
//!
//! Two independent rules, both relative to an age threshold:
//!
//! - a `doing` job whose worker row is gone, or whose worker's last
//!   heartbeat is older than `now - threshold`;
//! - a `todo` job that is due (no schedule, or scheduled at or before
//!   `now`) and has no event of any kind newer than `now - threshold`.
//!
//! The store evaluates the same predicate in SQL; this module labels the
//! rows it returns and lets the rule be checked without a database.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::{Job, JobStatus};

/// Why a job was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum OrphanReason {
    /// In progress, but its worker row no longer exists.
    MissingWorker,
    /// In progress, and the worker stopped heartbeating.
    StaleHeartbeat { last_heartbeat: DateTime<Utc> },
    /// Due, but nothing has happened to it within the threshold.
    StalledPending { last_event_at: Option<DateTime<Utc>> },
}

impl OrphanReason {
    /// Apply both rules to one job.
    ///
    /// `last_heartbeat` is `None` when no worker row matches the job's
    /// worker id. `last_event_at` is the newest event recorded for the job.
    pub fn classify(
        job: &Job,
        last_heartbeat: Option<DateTime<Utc>>,
        last_event_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        threshold: TimeDelta,
    ) -> Option<Self> {
        let cutoff = now - threshold;
        match job.status {
            JobStatus::Doing => match last_heartbeat {
                None => Some(OrphanReason::MissingWorker),
                Some(at) if at < cutoff => Some(OrphanReason::StaleHeartbeat { last_heartbeat: at }),
                Some(_) => None,
            },
            JobStatus::Todo => {
                if job.is_scheduled_after(now) {
                    return None;
                }
                match last_event_at {
                    Some(at) if at > cutoff => None,
                    _ => Some(OrphanReason::StalledPending { last_event_at }),
                }
            }
            _ => None,
        }
    }

    /// Short label for display.
    pub fn label(&self) -> &'static str {
        match self {
            OrphanReason::MissingWorker => "worker gone",
            OrphanReason::StaleHeartbeat { .. } => "stale heartbeat",
            OrphanReason::StalledPending { .. } => "stalled",
        }
    }
}

/// A job flagged by the orphan heuristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanedJob {
    pub job: Job,
    pub reason: OrphanReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobId;

    fn job(id: i64, status: JobStatus) -> Job {
        Job {
            id: JobId(id),
            queue_name: "default".into(),
            task_name: "send_email".into(),
            priority: 0,
            lock: None,
            queueing_lock: None,
            args: serde_json::json!({}),
            status,
            scheduled_at: None,
            attempts: 0,
            abort_requested: false,
            worker_id: Some(1),
        }
    }

    #[test]
    fn doing_job_with_old_heartbeat_is_flagged() {
        let now = Utc::now();
        let threshold = TimeDelta::minutes(30);

        let stale = job(7, JobStatus::Doing);
        let beat = now - TimeDelta::minutes(45);
        assert_eq!(
            OrphanReason::classify(&stale, Some(beat), None, now, threshold),
            Some(OrphanReason::StaleHeartbeat { last_heartbeat: beat })
        );

        let fresh = job(8, JobStatus::Doing);
        let beat = now - TimeDelta::minutes(2);
        assert_eq!(OrphanReason::classify(&fresh, Some(beat), None, now, threshold), None);
    }

    #[test]
    fn doing_job_without_worker_row_is_flagged() {
        let now = Utc::now();
        let reason = OrphanReason::classify(
            &job(1, JobStatus::Doing),
            None,
            Some(now),
            now,
            TimeDelta::minutes(1),
        );
        assert_eq!(reason, Some(OrphanReason::MissingWorker));
    }

    #[test]
    fn due_todo_job_without_recent_events_is_flagged() {
        let now = Utc::now();
        let threshold = TimeDelta::minutes(30);
        let pending = job(3, JobStatus::Todo);

        let old = now - TimeDelta::hours(2);
        assert_eq!(
            OrphanReason::classify(&pending, None, Some(old), now, threshold),
            Some(OrphanReason::StalledPending { last_event_at: Some(old) })
        );
        assert_eq!(
            OrphanReason::classify(&pending, None, None, now, threshold),
            Some(OrphanReason::StalledPending { last_event_at: None })
        );

        let recent = now - TimeDelta::minutes(5);
        assert_eq!(OrphanReason::classify(&pending, None, Some(recent), now, threshold), None);
    }

    #[test]
    fn future_scheduled_todo_job_is_not_flagged() {
        let now = Utc::now();
        let mut scheduled = job(4, JobStatus::Todo);
        scheduled.scheduled_at = Some(now + TimeDelta::hours(1));
        assert_eq!(
            OrphanReason::classify(&scheduled, None, None, now, TimeDelta::minutes(30)),
            None
        );

        scheduled.scheduled_at = Some(now - TimeDelta::hours(1));
        assert!(
            OrphanReason::classify(&scheduled, None, None, now, TimeDelta::minutes(30)).is_some()
        );
    }

    #[test]
    fn terminal_jobs_are_never_flagged() {
        let now = Utc::now();
        for status in [JobStatus::Succeeded, JobStatus::Failed, JobStatus::Aborted] {
            assert_eq!(
                OrphanReason::classify(&job(9, status), None, None, now, TimeDelta::minutes(1)),
                None
            );
        }
    }
}
