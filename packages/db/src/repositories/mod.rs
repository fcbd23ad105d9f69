//! Repository implementations for store reads.

mod job_repo;
mod queue_repo;

pub use job_repo::{JobFilter, JobRepository, RECENT_JOBS_LIMIT};
pub use queue_repo::QueueRepository;
