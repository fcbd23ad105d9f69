//! One-shot poll timer, re-armed after each fire.

use std::time::Duration;

use ractor::ActorRef;
use tokio::task::JoinHandle;

use crate::messages::MonitorMessage;

/// Poll timer. At most one pending fire at a time.
#[derive(Debug)]
pub struct PollScheduler {
    interval: Duration,
    pending: Option<JoinHandle<()>>,
}

impl PollScheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Schedule a `Tick` tagged with `generation`, replacing any pending one.
    pub fn arm<S: db::JobStore>(&mut self, myself: &ActorRef<MonitorMessage<S>>, generation: u64) {
        self.disarm();
        let myself = myself.clone();
        let interval = self.interval;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = myself.send_message(MonitorMessage::Tick { generation });
        }));
    }

    /// Cancel the pending fire, if any.
    pub fn disarm(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending.as_ref().is_some_and(|p| !p.is_finished())
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
