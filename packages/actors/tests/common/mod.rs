//! In-memory store, listener and connector for driving the monitor.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::{Connector, JobFilter, JobStore, NotificationSource, StoreError};
use queue_core::{
    ConnectionProfile, Job, JobEvent, JobId, JobStatus, MonitorConfig, OrphanReason, OrphanedJob,
    StatusCount,
};
use tokio::sync::mpsc;

use actors::{ActorRef, MonitorArgs, MonitorMessage, MonitorSettings, MonitorView};

pub const CONFIG: &str = r#"
poll_interval: 60s
orphan_threshold: 30m
connections:
  - name: local
    host: localhost
    database: app
    username: app
  - name: staging
    host: staging.internal
    database: app
    username: app
    default_queue: emails
"#;

pub fn job(id: i64, queue: &str, status: JobStatus) -> Job {
    Job {
        id: JobId(id),
        queue_name: queue.to_string(),
        task_name: "tasks.send".to_string(),
        priority: 0,
        lock: None,
        queueing_lock: None,
        args: serde_json::json!({"id": id}),
        status,
        scheduled_at: None,
        attempts: 0,
        abort_requested: false,
        worker_id: None,
    }
}

/// Shared backing data plus a log of every connection-level operation.
#[derive(Default)]
pub struct World {
    jobs: Mutex<Vec<Job>>,
    events: Mutex<Vec<JobEvent>>,
    log: Mutex<Vec<String>>,
    unreachable: Mutex<HashSet<String>>,
    no_listener: Mutex<HashSet<String>>,
    listen_failing: AtomicBool,
    delays: Mutex<HashMap<String, Duration>>,
    connect_delays: Mutex<HashMap<String, Duration>>,
    list_calls: Mutex<HashMap<String, usize>>,
    failing: AtomicBool,
    sources: Mutex<Vec<mpsc::UnboundedSender<Result<String, StoreError>>>>,
}

impl World {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_job(&self, job: Job) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn add_event(&self, job_id: i64, event_type: &str, at: DateTime<Utc>) {
        let mut events = self.events.lock().unwrap();
        let id = events.len() as i64 + 1;
        events.push(JobEvent {
            id,
            job_id: JobId(job_id),
            event_type: event_type.to_string(),
            at,
        });
    }

    /// Make connecting to `profile` fail.
    pub fn set_unreachable(&self, profile: &str) {
        self.unreachable.lock().unwrap().insert(profile.to_string());
    }

    pub fn set_reachable(&self, profile: &str) {
        self.unreachable.lock().unwrap().remove(profile);
    }

    /// Make opening the listening connection for `profile` fail.
    pub fn refuse_listener(&self, profile: &str) {
        self.no_listener.lock().unwrap().insert(profile.to_string());
    }

    /// Make every LISTEN fail.
    pub fn set_listen_failing(&self, failing: bool) {
        self.listen_failing.store(failing, Ordering::SeqCst);
    }

    /// Slow down opening the query store for `profile`.
    pub fn delay_connect(&self, profile: &str, delay: Duration) {
        self.connect_delays
            .lock()
            .unwrap()
            .insert(profile.to_string(), delay);
    }

    /// Number of job listings issued for `queue`.
    pub fn list_calls(&self, queue: &str) -> usize {
        self.list_calls.lock().unwrap().get(queue).copied().unwrap_or(0)
    }

    /// Slow down job listings for `queue`.
    pub fn delay_queue(&self, queue: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(queue.to_string(), delay);
    }

    /// Make every query fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Deliver a raw payload on the most recently opened listener.
    pub fn notify(&self, payload: &str) {
        if let Some(source) = self.sources.lock().unwrap().last() {
            let _ = source.send(Ok(payload.to_string()));
        }
    }

    /// Break the most recently opened listener.
    pub fn drop_listener(&self) {
        if let Some(source) = self.sources.lock().unwrap().last() {
            let _ = source.send(Err(StoreError::SubscriptionClosed));
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.log().iter().position(|e| e == entry)
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Timeout)
        } else {
            Ok(())
        }
    }

    fn queue_jobs(&self, queue: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.queue_name == queue)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.id.cmp(&a.id));
        jobs
    }
}

#[derive(Clone)]
pub struct FakeStore {
    profile: String,
    world: Arc<World>,
}

impl JobStore for FakeStore {
    async fn list_queues(&self) -> Result<Vec<String>, StoreError> {
        self.world.check()?;
        let queues: BTreeSet<String> = self
            .world
            .jobs
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.queue_name.clone())
            .collect();
        Ok(queues.into_iter().collect())
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>, StoreError> {
        *self
            .world
            .list_calls
            .lock()
            .unwrap()
            .entry(filter.queue.clone())
            .or_default() += 1;
        let delay = self.world.delays.lock().unwrap().get(&filter.queue).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.world.check()?;
        let limit = filter.limit.map_or(usize::MAX, |l| l as usize);
        Ok(self
            .world
            .queue_jobs(&filter.queue)
            .into_iter()
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .skip(filter.offset as usize)
            .take(limit)
            .collect())
    }

    async fn get_job(&self, id: JobId) -> Result<Job, StoreError> {
        self.world.check()?;
        self.world
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Job not found: {id}")))
    }

    async fn get_job_events(&self, id: JobId) -> Result<Vec<JobEvent>, StoreError> {
        self.world.check()?;
        let mut events: Vec<JobEvent> = self
            .world
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.job_id == id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.at);
        Ok(events)
    }

    async fn count_by_status(&self, queue: String) -> Result<Vec<StatusCount>, StoreError> {
        self.world.check()?;
        let jobs = self.world.queue_jobs(&queue);
        Ok(JobStatus::ALL
            .into_iter()
            .map(|status| StatusCount {
                status,
                count: jobs.iter().filter(|j| j.status == status).count() as u64,
            })
            .filter(|c| c.count > 0)
            .collect())
    }

    async fn list_recent_jobs(
        &self,
        queue: String,
        since: DateTime<Utc>,
    ) -> Result<Vec<Job>, StoreError> {
        self.world.check()?;
        let deferred: HashSet<JobId> = self
            .world
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type == "deferred" && e.at >= since)
            .map(|e| e.job_id)
            .collect();
        Ok(self
            .world
            .queue_jobs(&queue)
            .into_iter()
            .filter(|j| deferred.contains(&j.id))
            .collect())
    }

    async fn list_orphaned(
        &self,
        queue: String,
        _threshold: Duration,
    ) -> Result<Vec<OrphanedJob>, StoreError> {
        self.world.check()?;
        let mut orphans: Vec<OrphanedJob> = self
            .world
            .queue_jobs(&queue)
            .into_iter()
            .filter(|j| j.status == JobStatus::Doing && j.worker_id.is_none())
            .map(|job| OrphanedJob {
                job,
                reason: OrphanReason::MissingWorker,
            })
            .collect();
        orphans.sort_by_key(|o| o.job.id);
        Ok(orphans)
    }

    async fn close(&self) {
        self.world.record(format!("close store {}", self.profile));
    }
}

pub struct FakeSource {
    profile: String,
    world: Arc<World>,
    payloads: mpsc::UnboundedReceiver<Result<String, StoreError>>,
}

impl NotificationSource for FakeSource {
    async fn listen(&mut self, channel: &str) -> Result<(), StoreError> {
        if self.world.listen_failing.load(Ordering::SeqCst) {
            return Err(StoreError::SubscriptionClosed);
        }
        self.world
            .record(format!("{} listen {}", self.profile, channel));
        Ok(())
    }

    async fn unlisten_all(&mut self) -> Result<(), StoreError> {
        self.world.record(format!("{} unlisten *", self.profile));
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, StoreError> {
        match self.payloads.recv().await {
            Some(payload) => payload,
            None => std::future::pending().await,
        }
    }
}

pub struct FakeConnector {
    world: Arc<World>,
}

impl FakeConnector {
    pub fn new(world: Arc<World>) -> Self {
        Self { world }
    }
}

impl Connector for FakeConnector {
    type Store = FakeStore;
    type Source = FakeSource;

    async fn open_store(&self, profile: &ConnectionProfile) -> Result<FakeStore, StoreError> {
        self.world.record(format!("open store {}", profile.name));
        let delay = self.world.connect_delays.lock().unwrap().get(&profile.name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.world.unreachable.lock().unwrap().contains(&profile.name) {
            return Err(StoreError::Timeout);
        }
        Ok(FakeStore {
            profile: profile.name.clone(),
            world: self.world.clone(),
        })
    }

    async fn open_source(
        &self,
        profile: &ConnectionProfile,
        _store: &FakeStore,
    ) -> Result<FakeSource, StoreError> {
        if self.world.no_listener.lock().unwrap().contains(&profile.name) {
            return Err(StoreError::SubscriptionClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.world.sources.lock().unwrap().push(tx);
        Ok(FakeSource {
            profile: profile.name.clone(),
            world: self.world.clone(),
            payloads: rx,
        })
    }
}

pub type Monitor = ActorRef<MonitorMessage<FakeStore>>;

pub fn config() -> MonitorConfig {
    MonitorConfig::from_yaml(CONFIG).unwrap()
}

pub fn args(world: &Arc<World>, connection: &str) -> MonitorArgs<FakeConnector> {
    args_with(world, config(), connection)
}

pub fn args_with(
    world: &Arc<World>,
    config: MonitorConfig,
    connection: &str,
) -> MonitorArgs<FakeConnector> {
    MonitorArgs::new(FakeConnector::new(world.clone()), config, connection).with_settings(
        MonitorSettings {
            notice_ttl: Duration::from_millis(200),
            page_size: 100,
        },
    )
}

pub async fn view(monitor: &Monitor) -> MonitorView {
    let (tx, rx) = ractor::concurrency::oneshot();
    monitor
        .send_message(MonitorMessage::GetView { reply: tx.into() })
        .unwrap();
    rx.await.unwrap()
}

/// Poll the view until `done` holds, or panic after a few seconds.
pub async fn wait_for(monitor: &Monitor, done: impl Fn(&MonitorView) -> bool) -> MonitorView {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = view(monitor).await;
        if done(&current) {
            return current;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached; last view: {current:#?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn job_ids(view: &MonitorView) -> Vec<i64> {
    view.jobs.iter().map(|j| j.id.0).collect()
}
