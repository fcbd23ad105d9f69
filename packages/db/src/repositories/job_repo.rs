//! Read-only job queries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobEvent, JobId, JobStatus, OrphanReason, OrphanedJob, StatusCount};
use sqlx::PgPool;

use crate::StoreError;
use crate::schema::{DEFERRED_EVENT, EVENTS_TABLE, JOB_COLUMNS, JOBS_TABLE, WORKERS_TABLE};

/// Maximum rows returned by the recent-jobs query.
pub const RECENT_JOBS_LIMIT: i64 = 200;

/// Repository for job reads.
pub struct JobRepository;

/// Raw job row as decoded by sqlx.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    id: i64,
    queue_name: String,
    task_name: String,
    priority: i32,
    lock: Option<String>,
    queueing_lock: Option<String>,
    args: Option<serde_json::Value>,
    status: String,
    scheduled_at: Option<DateTime<Utc>>,
    attempts: i32,
    abort_requested: bool,
    worker_id: Option<i64>,
}

impl JobRow {
    pub(crate) fn into_job(self) -> Result<Job, StoreError> {
        Ok(Job {
            id: JobId(self.id),
            queue_name: self.queue_name,
            task_name: self.task_name,
            priority: self.priority,
            lock: self.lock,
            queueing_lock: self.queueing_lock,
            args: self.args.unwrap_or(serde_json::Value::Null),
            status: self.status.parse()?,
            scheduled_at: self.scheduled_at,
            attempts: self.attempts,
            abort_requested: self.abort_requested,
            worker_id: self.worker_id,
        })
    }
}

/// Orphan candidate row: a job plus the liveness data behind the verdict.
#[derive(Debug, sqlx::FromRow)]
struct OrphanRow {
    #[sqlx(flatten)]
    job: JobRow,
    last_heartbeat: Option<DateTime<Utc>>,
    last_event_at: Option<DateTime<Utc>>,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    job_id: i64,
    event_type: String,
    at: DateTime<Utc>,
}

/// Filter options for listing jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub queue: String,
    pub status: Option<JobStatus>,
    /// `None` means unbounded.
    pub limit: Option<u32>,
    pub offset: u32,
}

impl JobFilter {
    /// All jobs of a queue.
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            status: None,
            limit: None,
            offset: 0,
        }
    }

    /// Restrict to one status.
    pub fn with_status(mut self, status: Option<JobStatus>) -> Self {
        self.status = status;
        self
    }

    /// Page through the result.
    pub fn with_page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = offset;
        self
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(JobRow::into_job).collect()
}

impl JobRepository {
    /// Jobs for a queue, newest id first.
    pub async fn list(pool: &PgPool, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM {JOBS_TABLE} j
            WHERE j.queue_name = $1
              AND ($2::text IS NULL OR j.status::text = $2)
            ORDER BY j.id DESC
            LIMIT $3 OFFSET $4
            "#
        );

        let rows: Vec<JobRow> = sqlx::query_as(&query)
            .bind(&filter.queue)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.limit.map(i64::from))
            .bind(i64::from(filter.offset))
            .fetch_all(pool)
            .await?;

        into_jobs(rows)
    }

    /// Get a job by ID.
    pub async fn get(pool: &PgPool, id: JobId) -> Result<Job, StoreError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM {JOBS_TABLE} j WHERE j.id = $1");

        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(id.0)
            .fetch_optional(pool)
            .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("Job not found: {}", id)))?
            .into_job()
    }

    /// Event history of a job, oldest first.
    pub async fn events(pool: &PgPool, id: JobId) -> Result<Vec<JobEvent>, StoreError> {
        let query = format!(
            r#"
            SELECT id, job_id, type::text AS event_type, at
            FROM {EVENTS_TABLE}
            WHERE job_id = $1 AND at IS NOT NULL
            ORDER BY at ASC, id ASC
            "#
        );

        let rows: Vec<EventRow> = sqlx::query_as(&query).bind(id.0).fetch_all(pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| JobEvent {
                id: r.id,
                job_id: JobId(r.job_id),
                event_type: r.event_type,
                at: r.at,
            })
            .collect())
    }

    /// Count jobs by status for a queue. Absent statuses have no row.
    pub async fn count_by_status(pool: &PgPool, queue: &str) -> Result<Vec<StatusCount>, StoreError> {
        let query = format!(
            r#"
            SELECT status::text AS status, COUNT(*) AS count
            FROM {JOBS_TABLE}
            WHERE queue_name = $1
            GROUP BY status
            ORDER BY status
            "#
        );

        let rows: Vec<(String, i64)> = sqlx::query_as(&query).bind(queue).fetch_all(pool).await?;

        rows.into_iter()
            .map(|(status, count)| {
                Ok(StatusCount {
                    status: status.parse()?,
                    count: u64::try_from(count)
                        .map_err(|_| StoreError::MalformedRow(format!("negative count {count}")))?,
                })
            })
            .collect()
    }

    /// Jobs deferred at or after `since`, newest id first, capped.
    pub async fn list_recent(
        pool: &PgPool,
        queue: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        let query = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM {JOBS_TABLE} j
            WHERE j.queue_name = $1
              AND EXISTS (
                SELECT 1 FROM {EVENTS_TABLE} e
                WHERE e.job_id = j.id
                  AND e.type::text = $2
                  AND e.at >= $3
              )
            ORDER BY j.id DESC
            LIMIT $4
            "#
        );

        let rows: Vec<JobRow> = sqlx::query_as(&query)
            .bind(queue)
            .bind(DEFERRED_EVENT)
            .bind(since)
            .bind(RECENT_JOBS_LIMIT)
            .fetch_all(pool)
            .await?;

        into_jobs(rows)
    }

    /// Jobs presumed stuck, ascending by id.
    ///
    /// One unioned query: `doing` jobs whose worker is missing or stopped
    /// heartbeating, and due `todo` jobs with no event inside the threshold.
    pub async fn list_orphaned(
        pool: &PgPool,
        queue: &str,
        threshold: Duration,
    ) -> Result<Vec<OrphanedJob>, StoreError> {
        let query = format!(
            r#"
            SELECT * FROM (
                SELECT {JOB_COLUMNS},
                       w.last_heartbeat AS last_heartbeat,
                       (SELECT MAX(e.at) FROM {EVENTS_TABLE} e WHERE e.job_id = j.id) AS last_event_at,
                       NOW() AS observed_at
                FROM {JOBS_TABLE} j
                LEFT JOIN {WORKERS_TABLE} w ON j.worker_id = w.id
                WHERE j.queue_name = $1
                  AND j.status = 'doing'
                  AND (w.id IS NULL OR w.last_heartbeat < NOW() - make_interval(secs => $2))

                UNION ALL

                SELECT {JOB_COLUMNS},
                       NULL::timestamptz AS last_heartbeat,
                       (SELECT MAX(e.at) FROM {EVENTS_TABLE} e WHERE e.job_id = j.id) AS last_event_at,
                       NOW() AS observed_at
                FROM {JOBS_TABLE} j
                WHERE j.queue_name = $1
                  AND j.status = 'todo'
                  AND (j.scheduled_at IS NULL OR j.scheduled_at <= NOW())
                  AND NOT EXISTS (
                    SELECT 1 FROM {EVENTS_TABLE} e
                    WHERE e.job_id = j.id AND e.at > NOW() - make_interval(secs => $2)
                  )
            ) orphans
            ORDER BY id ASC
            "#
        );

        let rows: Vec<OrphanRow> = sqlx::query_as(&query)
            .bind(queue)
            .bind(threshold.as_secs_f64())
            .fetch_all(pool)
            .await?;

        let threshold = chrono::TimeDelta::from_std(threshold)
            .map_err(|e| StoreError::MalformedRow(format!("threshold out of range: {e}")))?;

        rows.into_iter()
            .map(|row| {
                let job = row.job.into_job()?;
                let reason = OrphanReason::classify(
                    &job,
                    row.last_heartbeat,
                    row.last_event_at,
                    row.observed_at,
                    threshold,
                )
                .unwrap_or_else(|| fallback_reason(&job, row.last_heartbeat, row.last_event_at));
                Ok(OrphanedJob { job, reason })
            })
            .collect()
    }
}

/// Reason for a row the store flagged but whose timestamps sit on the boundary.
fn fallback_reason(
    job: &Job,
    last_heartbeat: Option<DateTime<Utc>>,
    last_event_at: Option<DateTime<Utc>>,
) -> OrphanReason {
    match (job.status, last_heartbeat) {
        (JobStatus::Doing, Some(at)) => OrphanReason::StaleHeartbeat { last_heartbeat: at },
        (JobStatus::Doing, None) => OrphanReason::MissingWorker,
        _ => OrphanReason::StalledPending { last_event_at },
    }
}
