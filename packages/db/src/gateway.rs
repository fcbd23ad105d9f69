//! The read-only query surface used by the monitor.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use queue_core::{Job, JobEvent, JobId, OrphanedJob, StatusCount};
use sqlx::PgPool;

use crate::repositories::{JobFilter, JobRepository, QueueRepository};
use crate::{PoolSettings, StoreError};

/// Typed reads against a job store.
///
/// Implementations hold no cross-call state; every operation is idempotent
/// and safe to run concurrently. Failures are returned, never retried.
pub trait JobStore: Clone + Send + Sync + 'static {
    /// Distinct queue names, lexicographic.
    fn list_queues(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Jobs for a queue, id descending.
    fn list_jobs(
        &self,
        filter: JobFilter,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// A single job.
    fn get_job(&self, id: JobId) -> impl Future<Output = Result<Job, StoreError>> + Send;

    /// A job's history, ascending by timestamp.
    fn get_job_events(
        &self,
        id: JobId,
    ) -> impl Future<Output = Result<Vec<JobEvent>, StoreError>> + Send;

    /// One row per status present in the queue.
    fn count_by_status(
        &self,
        queue: String,
    ) -> impl Future<Output = Result<Vec<StatusCount>, StoreError>> + Send;

    /// Jobs deferred at or after `since`, id descending, capped.
    fn list_recent_jobs(
        &self,
        queue: String,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Job>, StoreError>> + Send;

    /// Jobs presumed stuck, id ascending.
    fn list_orphaned(
        &self,
        queue: String,
        threshold: Duration,
    ) -> impl Future<Output = Result<Vec<OrphanedJob>, StoreError>> + Send;

    /// Release the underlying connections. Safe to call more than once.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// [`JobStore`] over a PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct QueryGateway {
    pool: PgPool,
    query_timeout: Duration,
}

impl QueryGateway {
    /// Wrap an open pool.
    pub fn new(pool: PgPool, settings: &PoolSettings) -> Self {
        Self {
            pool,
            query_timeout: settings.query_timeout,
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn timed<T>(
        &self,
        query: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| StoreError::Timeout)?
    }
}

impl JobStore for QueryGateway {
    async fn list_queues(&self) -> Result<Vec<String>, StoreError> {
        self.timed(QueueRepository::list(&self.pool)).await
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        self.timed(JobRepository::list(&self.pool, &filter)).await
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.timed(JobRepository::get(&self.pool, id)).await
    }

    async fn get_job_events(&self, id: JobId) -> Result<Vec<JobEvent>, StoreError> {
        self.timed(JobRepository::events(&self.pool, id)).await
    }

    async fn count_by_status(&self, queue: String) -> Result<Vec<StatusCount>, StoreError> {
        self.timed(JobRepository::count_by_status(&self.pool, &queue))
            .await
    }

    async fn list_recent_jobs(
        &self,
        queue: String,
        since: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        self.timed(JobRepository::list_recent(&self.pool, &queue, since))
            .await
    }

    async fn list_orphaned(
        &self,
        queue: String,
        threshold: Duration,
    ) -> Result<Vec<OrphanedJob>, StoreError> {
        self.timed(JobRepository::list_orphaned(&self.pool, &queue, threshold))
            .await
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
        }
    }
}
