//! Headless renderer: reports view changes through tracing.

use actors::{ConnectionState, MonitorView, ViewSink};
use queue_core::JobStatus;

/// Logs what changed between snapshots.
#[derive(Debug, Default)]
pub struct LogView {
    last: Option<Summary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Summary {
    state: ConnectionState,
    connection: String,
    queue: String,
    subscribed: bool,
    jobs: usize,
    counts: String,
    orphans: usize,
    error: Option<String>,
    notice: Option<String>,
}

impl Summary {
    fn of(view: &MonitorView) -> Self {
        let counts = view
            .breakdown
            .iter()
            .filter(|row| row.count > 0)
            .map(|row| format!("{}={}", row.status, row.count))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            state: view.state,
            connection: view.connection.clone(),
            queue: view.queue.clone(),
            subscribed: view.subscribed,
            jobs: view.jobs.len(),
            counts,
            orphans: view.orphans.len(),
            error: view.error.clone(),
            notice: view.notice.clone(),
        }
    }
}

impl ViewSink for LogView {
    fn refresh(&mut self, view: &MonitorView) {
        let next = Summary::of(view);
        let previous = self.last.replace(next.clone());
        if previous.as_ref() == Some(&next) {
            return;
        }
        let previous = previous.as_ref();

        if previous.is_none_or(|p| p.state != next.state || p.connection != next.connection) {
            tracing::info!("{} ({})", next.state, next.connection);
        }
        if let Some(notice) = &next.notice
            && previous.is_none_or(|p| p.notice.as_ref() != Some(notice))
        {
            tracing::warn!("{}", notice);
        }
        if let Some(error) = &next.error
            && previous.is_none_or(|p| p.error.as_ref() != Some(error))
        {
            tracing::error!("{}", error);
        }
        if next.state != ConnectionState::Connected {
            return;
        }
        if previous.is_some_and(|p| p.subscribed && !next.subscribed) {
            tracing::warn!("Live updates lost; refreshing every poll interval");
        }

        let doing = view
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Doing)
            .count();
        tracing::info!(
            queue = %next.queue,
            jobs = next.jobs,
            doing,
            orphans = next.orphans,
            "{}",
            if next.counts.is_empty() { "no jobs" } else { next.counts.as_str() }
        );
    }
}
