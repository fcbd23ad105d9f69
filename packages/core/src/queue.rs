//! Per-queue aggregate types.

use serde::{Deserialize, Serialize};

use crate::JobStatus;

/// Number of jobs in one status. Derived on each refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: JobStatus,
    pub count: u64,
}

/// Status counts for a queue with every status present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBreakdown {
    counts: [u64; JobStatus::ALL.len()],
}

impl StatusBreakdown {
    /// Build from the rows the store returned; missing statuses are zero.
    pub fn from_counts(counts: &[StatusCount]) -> Self {
        let mut breakdown = Self::default();
        for row in counts {
            breakdown.counts[row.status as usize] += row.count;
        }
        breakdown
    }

    /// Count for a single status.
    pub fn get(&self, status: JobStatus) -> u64 {
        self.counts[status as usize]
    }

    /// All statuses in display order with their counts.
    pub fn iter(&self) -> impl Iterator<Item = StatusCount> + '_ {
        JobStatus::ALL.into_iter().map(|status| StatusCount {
            status,
            count: self.get(status),
        })
    }

    /// Total jobs in the queue.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Jobs not yet in a terminal status.
    pub fn active(&self) -> u64 {
        self.iter()
            .filter(|row| !row.status.is_terminal())
            .map(|row| row.count)
            .sum()
    }
}
