//! Queue-level reads.

use sqlx::PgPool;

use crate::StoreError;
use crate::schema::JOBS_TABLE;

/// Repository for queue discovery.
pub struct QueueRepository;

impl QueueRepository {
    /// Distinct queue names in lexicographic order.
    pub async fn list(pool: &PgPool) -> Result<Vec<String>, StoreError> {
        let query = format!("SELECT DISTINCT queue_name FROM {JOBS_TABLE} ORDER BY queue_name");

        let queues: Vec<String> = sqlx::query_scalar(&query).fetch_all(pool).await?;

        Ok(queues)
    }
}
