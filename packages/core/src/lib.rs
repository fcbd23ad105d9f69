//! Core domain types for the job queue monitor.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and JobEvent as read from the store
//! - StatusCount and StatusBreakdown for per-queue aggregates
//! - ChangeEvent for push notifications
//! - OrphanReason for the stuck-job heuristic
//! - MonitorConfig and ConnectionProfile for static configuration

pub mod config;
mod events;
mod job;
mod orphan;
mod queue;

pub use config::{ConfigError, ConnectionProfile, MonitorConfig};
pub use events::{ChangeEvent, DecodeError};
pub use job::{Job, JobDetail, JobEvent, JobId, JobStatus};
pub use orphan::{OrphanReason, OrphanedJob};
pub use queue::{StatusBreakdown, StatusCount};
