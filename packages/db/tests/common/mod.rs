use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::sync::{Mutex, MutexGuard};

use db::{PoolSettings, QueryGateway, StoreError};

static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

const TEST_SCHEMA: &str = "queue_monitor_test";

const STORE_SCHEMA: &str = r#"
DROP SCHEMA IF EXISTS queue_monitor_test CASCADE;
CREATE SCHEMA queue_monitor_test;

CREATE TYPE procrastinate_job_status AS ENUM (
    'todo', 'doing', 'succeeded', 'failed', 'cancelled', 'aborting', 'aborted'
);
CREATE TYPE procrastinate_job_event_type AS ENUM (
    'deferred', 'started', 'deferred_for_retry', 'failed', 'succeeded',
    'cancelled', 'abort_requested', 'aborted', 'scheduled', 'retried'
);

CREATE TABLE procrastinate_workers (
    id bigserial PRIMARY KEY,
    last_heartbeat timestamptz NOT NULL DEFAULT NOW()
);

CREATE TABLE procrastinate_jobs (
    id bigserial PRIMARY KEY,
    queue_name character varying(128) NOT NULL,
    task_name character varying(128) NOT NULL,
    priority integer NOT NULL DEFAULT 0,
    lock text,
    queueing_lock text,
    args jsonb DEFAULT '{}' NOT NULL,
    status procrastinate_job_status DEFAULT 'todo' NOT NULL,
    scheduled_at timestamptz NULL,
    attempts integer DEFAULT 0 NOT NULL,
    abort_requested boolean DEFAULT false NOT NULL,
    worker_id bigint NULL
);

CREATE TABLE procrastinate_events (
    id bigserial PRIMARY KEY,
    job_id bigint NOT NULL REFERENCES procrastinate_jobs ON DELETE CASCADE,
    type procrastinate_job_event_type,
    at timestamptz DEFAULT NOW() NULL
);
"#;

pub struct TestDb {
    _guard: MutexGuard<'static, ()>,
    pub pool: PgPool,
    pub gateway: QueryGateway,
    /// Options the pool was built from, for opening extra connections.
    pub options: PgConnectOptions,
}

/// Fresh store schema, or `None` when `TEST_DATABASE_URL` is unset.
pub async fn setup_db() -> Result<Option<TestDb>, StoreError> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return Ok(None);
    };

    let guard = TEST_LOCK.lock().await;
    let options = PgConnectOptions::from_str(&url)?.options([("search_path", TEST_SCHEMA)]);
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect_with(options.clone())
        .await?;
    sqlx::raw_sql(STORE_SCHEMA).execute(&pool).await?;

    let gateway = QueryGateway::new(pool.clone(), &PoolSettings::default());
    Ok(Some(TestDb {
        _guard: guard,
        pool,
        gateway,
        options,
    }))
}

pub async fn insert_worker(pool: &PgPool, last_heartbeat: DateTime<Utc>) -> Result<i64, StoreError> {
    let id = sqlx::query_scalar("INSERT INTO procrastinate_workers (last_heartbeat) VALUES ($1) RETURNING id")
        .bind(last_heartbeat)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

pub async fn insert_job(
    pool: &PgPool,
    queue: &str,
    status: &str,
    worker_id: Option<i64>,
    scheduled_at: Option<DateTime<Utc>>,
) -> Result<i64, StoreError> {
    let id = sqlx::query_scalar(
        r#"
        INSERT INTO procrastinate_jobs (queue_name, task_name, status, worker_id, scheduled_at, args)
        VALUES ($1, 'tasks.process', $2::procrastinate_job_status, $3, $4, '{"n": 1}')
        RETURNING id
        "#,
    )
    .bind(queue)
    .bind(status)
    .bind(worker_id)
    .bind(scheduled_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn insert_event(
    pool: &PgPool,
    job_id: i64,
    event_type: &str,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO procrastinate_events (job_id, type, at) VALUES ($1, $2::procrastinate_job_event_type, $3)",
    )
    .bind(job_id)
    .bind(event_type)
    .bind(at)
    .execute(pool)
    .await?;
    Ok(())
}
