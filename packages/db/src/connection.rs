//! Connection pool management and the store error type.

use std::str::FromStr;
use std::time::Duration;

use queue_core::ConnectionProfile;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions, PgSslMode};
use thiserror::Error;

/// Pool tuning shared by every session.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Upper bound on pooled query connections. The listener has its own.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// Per-query deadline enforced by the gateway.
    pub query_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolSettings {
    /// Set the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Set the per-query deadline.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// Store errors. Surfaced to the caller, never retried here.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(#[source] sqlx::Error),
    #[error("Query timed out")]
    Timeout,
    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),
    #[error("Malformed row: {0}")]
    MalformedRow(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Subscription closed")]
    SubscriptionClosed,
    #[error("Invalid connection profile: {0}")]
    Profile(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StoreError::Timeout,
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Connection(err),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::MalformedRow(err.to_string())
            }
            other => StoreError::Query(other),
        }
    }
}

impl From<queue_core::DecodeError> for StoreError {
    fn from(err: queue_core::DecodeError) -> Self {
        StoreError::MalformedRow(err.to_string())
    }
}

/// Failure to open a session against a profile.
#[derive(Debug, Error)]
#[error("connect to {profile}: {source}")]
pub struct ConnectError {
    pub profile: String,
    #[source]
    pub source: StoreError,
}

/// Build connect options from a profile.
pub fn connect_options(profile: &ConnectionProfile) -> Result<PgConnectOptions, StoreError> {
    let ssl_mode = PgSslMode::from_str(&profile.sslmode)
        .map_err(|e| StoreError::Profile(format!("sslmode {:?}: {}", profile.sslmode, e)))?;

    let mut options = PgConnectOptions::new()
        .host(&profile.host)
        .port(profile.port)
        .database(&profile.database)
        .username(&profile.username)
        .ssl_mode(ssl_mode)
        .application_name("queue-monitor");
    if !profile.password.is_empty() {
        options = options.password(&profile.password);
    }
    Ok(options)
}

/// Open a pool for the profile and verify the store answers.
pub async fn open_pool(
    profile: &ConnectionProfile,
    settings: &PoolSettings,
) -> Result<PgPool, StoreError> {
    tracing::info!("Connecting to database: {}", profile.display_url());

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(connect_options(profile)?)
        .await
        .map_err(StoreError::Connection)?;

    if let Err(e) = ping(&pool).await {
        pool.close().await;
        return Err(e);
    }

    tracing::info!("Connected to database: {}", profile.name);
    Ok(pool)
}

/// Open the dedicated listening connection.
///
/// It sits in a one-connection pool of its own so it never competes with
/// queries for a slot in the query pool.
pub async fn open_listener(
    options: PgConnectOptions,
    settings: &PoolSettings,
) -> Result<PgListener, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(settings.acquire_timeout)
        .connect_lazy_with(options);
    PgListener::connect_with(&pool)
        .await
        .map_err(StoreError::Connection)
}

/// Lightweight round-trip.
pub async fn ping(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
