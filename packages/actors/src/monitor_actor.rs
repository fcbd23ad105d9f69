//! The monitor actor: sole owner of the session and of all view state.
//!
//! Every store call, timer and subscription runs in a spawned task and only
//! reports back through the mailbox. Results carry the generation they were
//! issued under; the generation moves on every session replacement and
//! queue switch, and results from an older one are dropped unapplied.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use db::{
    ConnectError, Connector, Delivery, JobFilter, JobStore, Session, SessionManager, StoreError,
};
use queue_core::{
    Job, JobDetail, JobId, MonitorConfig, OrphanedJob, StatusBreakdown, StatusCount,
};
use ractor::{Actor, ActorProcessingErr, ActorRef, MessagingErr};
use tokio::sync::mpsc;

use crate::messages::{MonitorError, MonitorMessage};
use crate::scheduler::PollScheduler;
use crate::state::{
    ConnectionState, Notice, PendingAction, Picker, PickerKind, SecondaryView, StatusFilter,
};
use crate::view::{MonitorView, NullView, ViewSink};

type Myself<C> = ActorRef<MonitorMessage<<C as Connector>::Store>>;

/// Tunables that are not part of the config file.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// How long a transient notice stays up.
    pub notice_ttl: Duration,
    /// Rows fetched for the job list.
    pub page_size: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            notice_ttl: Duration::from_secs(4),
            page_size: 100,
        }
    }
}

/// Startup arguments.
pub struct MonitorArgs<C: Connector> {
    pub connector: C,
    pub config: MonitorConfig,
    pub settings: MonitorSettings,
    /// Profile to connect to on start.
    pub connection: String,
    /// Queue override for the first session.
    pub queue: Option<String>,
    pub sink: Box<dyn ViewSink>,
}

impl<C: Connector> MonitorArgs<C> {
    pub fn new(connector: C, config: MonitorConfig, connection: impl Into<String>) -> Self {
        Self {
            connector,
            config,
            settings: MonitorSettings::default(),
            connection: connection.into(),
            queue: None,
            sink: Box::new(NullView),
        }
    }

    pub fn with_queue(mut self, queue: Option<String>) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sink(mut self, sink: impl ViewSink) -> Self {
        self.sink = Box::new(sink);
        self
    }
}

/// State for the monitor actor.
pub struct MonitorState<C: Connector> {
    sessions: SessionManager<C>,
    session: Option<Session<C::Store>>,
    config: MonitorConfig,
    settings: MonitorSettings,
    scheduler: PollScheduler,
    sink: Box<dyn ViewSink>,
    generation: u64,
    state: ConnectionState,
    connection: String,
    queue: String,
    /// Queue chosen while disconnected, used by the next connect.
    pending_queue: Option<String>,
    status_filter: StatusFilter,
    secondary: SecondaryView,
    jobs: Vec<Job>,
    breakdown: StatusBreakdown,
    recent: Vec<Job>,
    orphans: Vec<OrphanedJob>,
    queues: Vec<String>,
    detail: Option<JobDetail>,
    error: Option<String>,
    notice: Option<Notice>,
    notice_seq: u64,
    picker: Option<Picker>,
}

impl<C: Connector> MonitorState<C> {
    fn new(
        connector: C,
        config: MonitorConfig,
        settings: MonitorSettings,
        sink: Box<dyn ViewSink>,
    ) -> Self {
        Self {
            sessions: SessionManager::new(connector),
            session: None,
            scheduler: PollScheduler::new(config.poll_interval),
            config,
            settings,
            sink,
            generation: 0,
            state: ConnectionState::Disconnected,
            connection: String::new(),
            queue: String::new(),
            pending_queue: None,
            status_filter: StatusFilter::ALL,
            secondary: SecondaryView::default(),
            jobs: Vec::new(),
            breakdown: StatusBreakdown::default(),
            recent: Vec::new(),
            orphans: Vec::new(),
            queues: Vec::new(),
            detail: None,
            error: None,
            notice: None,
            notice_seq: 0,
            picker: None,
        }
    }

    /// Snapshot for the view.
    pub fn view(&self) -> MonitorView {
        MonitorView {
            state: self.state,
            connection: self.connection.clone(),
            queue: self.queue.clone(),
            generation: self.generation,
            subscribed: self.session.as_ref().is_some_and(Session::is_subscribed),
            status_filter: self.status_filter,
            secondary: self.secondary,
            jobs: self.jobs.clone(),
            breakdown: self.breakdown.clone(),
            recent: self.recent.clone(),
            orphans: self.orphans.clone(),
            queues: self.queues.clone(),
            detail: self.detail.clone(),
            error: self.error.clone(),
            notice: self.notice.as_ref().map(|n| n.text.clone()),
            picker: self.picker.clone(),
        }
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    fn is_current(&self, generation: u64, what: &str) -> bool {
        if generation == self.generation {
            return true;
        }
        tracing::debug!(
            "Dropping stale {} result (generation {}, current {})",
            what,
            generation,
            self.generation
        );
        false
    }

    fn owns_subscription(&self, session_generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.generation == session_generation)
    }

    /// Apply a query outcome to the error banner.
    fn record<T>(&mut self, what: &str, result: Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.error = None;
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Failed to load {}: {}", what, e);
                self.error = Some(format!("Failed to load {what}: {e}"));
                None
            }
        }
    }

    fn show_notice(&mut self, myself: &Myself<C>, text: String) {
        self.notice_seq += 1;
        let seq = self.notice_seq;
        self.notice = Some(Notice { text, seq });

        let myself = myself.clone();
        let ttl = self.settings.notice_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let _ = myself.send_message(MonitorMessage::ClearNotice { seq });
        });
    }

    // --- session lifecycle ---

    fn begin_connect(&mut self, myself: &Myself<C>, connection: String, queue: Option<String>) {
        let profile = match self.config.connection(&connection) {
            Ok(profile) => profile.clone(),
            Err(e) => {
                tracing::warn!("Cannot connect: {}", e);
                self.show_notice(myself, e.to_string());
                return;
            }
        };
        let queue = queue
            .or_else(|| self.pending_queue.take())
            .unwrap_or_else(|| profile.default_queue.clone());
        self.pending_queue = None;
        let generation = self.next_generation();

        self.scheduler.disarm();
        self.state = ConnectionState::Connecting;
        self.connection = profile.name.clone();
        self.queue = queue.clone();
        self.detail = None;

        tracing::info!(
            "Connecting to {} on queue {} (generation {})",
            profile.name,
            queue,
            generation
        );

        let previous = self.session.take();
        let sessions = self.sessions.clone();
        let myself = myself.clone();
        tokio::spawn(async move {
            let result = sessions.switch(previous, &profile, &queue, generation).await;
            let message = MonitorMessage::Connected {
                generation,
                result: Box::new(result),
            };
            // Nobody left to own the session: close it here.
            if let Err(MessagingErr::SendErr(MonitorMessage::Connected { result, .. })) =
                myself.send_message(message)
                && let Ok(mut session) = *result
            {
                session.close().await;
            }
        });
    }

    fn on_connected(
        &mut self,
        myself: &Myself<C>,
        generation: u64,
        result: Result<Session<C::Store>, ConnectError>,
    ) {
        if !self.is_current(generation, "connect") {
            if let Ok(mut session) = result {
                tokio::spawn(async move { session.close().await });
            }
            return;
        }

        match result {
            Ok(mut session) => {
                if let Some(events) = session
                    .subscription
                    .as_mut()
                    .and_then(|s| s.take_events())
                {
                    spawn_drain(myself.clone(), session.generation, events);
                }
                tracing::info!(
                    "Connected to {} on queue {} (subscribed: {})",
                    session.connection,
                    session.queue,
                    session.is_subscribed()
                );
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                self.error = None;
                self.full_fetch(myself);
                self.scheduler.arm(myself, self.generation);
            }
            Err(e) => {
                tracing::warn!("Connection failed: {}", e);
                self.state = ConnectionState::Disconnected;
                let text = format!("Connection failed: {}", self.connection);
                self.show_notice(myself, text);
            }
        }
    }

    fn disconnect(&mut self) {
        self.next_generation();
        self.scheduler.disarm();
        self.state = ConnectionState::Disconnected;
        if let Some(mut session) = self.session.take() {
            tracing::info!("Disconnecting from {}", session.connection);
            tokio::spawn(async move { session.close().await });
        }
    }

    fn switch_queue(&mut self, myself: &Myself<C>, queue: String) {
        match self.state {
            ConnectionState::Connecting => {
                // The pending session would subscribe to the old queue.
                let connection = self.connection.clone();
                self.begin_connect(myself, connection, Some(queue));
                return;
            }
            ConnectionState::Disconnected => {
                tracing::info!("Queue {} will be used on the next connect", queue);
                self.queue = queue.clone();
                self.pending_queue = Some(queue);
                return;
            }
            ConnectionState::Connected => {}
        }
        if queue == self.queue {
            return;
        }

        let generation = self.next_generation();
        self.queue = queue.clone();
        self.jobs.clear();
        self.recent.clear();
        self.orphans.clear();
        self.breakdown = StatusBreakdown::default();
        self.detail = None;

        let Some(session) = self.session.as_mut() else {
            return;
        };
        tracing::info!(
            "Switching queue {} -> {} (generation {})",
            session.queue,
            queue,
            generation
        );
        session.queue = queue.clone();

        if let Some(subscription) = &session.subscription {
            let resubscribe = subscription.switch_queue(queue);
            let session_generation = session.generation;
            let myself_ref = myself.clone();
            tokio::spawn(async move {
                if let Err(error) = resubscribe.await {
                    let _ = myself_ref.send_message(MonitorMessage::ResubscribeFailed {
                        session_generation,
                        error,
                    });
                }
            });
        }

        self.full_fetch(myself);
        self.scheduler.arm(myself, generation);
    }

    /// Drop the subscription and keep polling.
    fn degrade_to_polling(&mut self, session_generation: u64, error: StoreError) {
        if !self.owns_subscription(session_generation) {
            tracing::debug!("Ignoring subscription error from an old session: {}", error);
            return;
        }
        tracing::warn!("Notifications unavailable, polling only: {}", error);
        if let Some(mut subscription) = self
            .session
            .as_mut()
            .and_then(|s| s.subscription.take())
        {
            tokio::spawn(async move { subscription.close().await });
        }
    }

    async fn shutdown(&mut self) {
        self.next_generation();
        self.scheduler.disarm();
        self.state = ConnectionState::Disconnected;
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }

    // --- fetches ---

    /// Run a store call off the loop and mail the result back.
    fn spawn_query<F, Fut>(&self, myself: &Myself<C>, query: F)
    where
        F: FnOnce(C::Store, u64) -> Fut,
        Fut: Future<Output = MonitorMessage<C::Store>> + Send + 'static,
    {
        let Some(session) = &self.session else {
            return;
        };
        let pending = query(session.store.clone(), self.generation);
        let myself = myself.clone();
        tokio::spawn(async move {
            let _ = myself.send_message(pending.await);
        });
    }

    /// Everything a fresh session or queue needs.
    fn full_fetch(&self, myself: &Myself<C>) {
        self.fetch_jobs(myself);
        self.fetch_status_counts(myself);
        self.fetch_queues(myself);
        if self.secondary != SecondaryView::Status {
            self.fetch_secondary(myself);
        }
    }

    /// Job list plus the selected secondary view, nothing else.
    fn refresh(&self, myself: &Myself<C>) {
        self.fetch_jobs(myself);
        self.fetch_secondary(myself);
    }

    fn fetch_jobs(&self, myself: &Myself<C>) {
        let filter = self.status_filter;
        let query = JobFilter::queue(&self.queue)
            .with_status(filter.status())
            .with_page(self.settings.page_size, 0);
        self.spawn_query(myself, move |store, generation| async move {
            MonitorMessage::JobsLoaded {
                generation,
                filter,
                result: store.list_jobs(query).await,
            }
        });
    }

    fn fetch_secondary(&self, myself: &Myself<C>) {
        match self.secondary {
            SecondaryView::Status => self.fetch_status_counts(myself),
            SecondaryView::Live => self.fetch_recent(myself),
            SecondaryView::Orphaned => self.fetch_orphans(myself),
        }
    }

    fn fetch_status_counts(&self, myself: &Myself<C>) {
        let queue = self.queue.clone();
        self.spawn_query(myself, move |store, generation| async move {
            MonitorMessage::StatusCountsLoaded {
                generation,
                result: store.count_by_status(queue).await,
            }
        });
    }

    fn fetch_recent(&self, myself: &Myself<C>) {
        let queue = self.queue.clone();
        let now = Utc::now();
        let since = TimeDelta::from_std(self.config.live_window)
            .ok()
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        self.spawn_query(myself, move |store, generation| async move {
            MonitorMessage::RecentJobsLoaded {
                generation,
                result: store.list_recent_jobs(queue, since).await,
            }
        });
    }

    fn fetch_orphans(&self, myself: &Myself<C>) {
        let queue = self.queue.clone();
        let threshold = self.config.orphan_threshold;
        self.spawn_query(myself, move |store, generation| async move {
            MonitorMessage::OrphansLoaded {
                generation,
                result: store.list_orphaned(queue, threshold).await,
            }
        });
    }

    fn fetch_queues(&self, myself: &Myself<C>) {
        self.spawn_query(myself, |store, generation| async move {
            MonitorMessage::QueuesLoaded {
                generation,
                result: store.list_queues().await,
            }
        });
    }

    fn fetch_detail(&self, myself: &Myself<C>, id: JobId) {
        self.spawn_query(myself, move |store, generation| async move {
            let (job, events) = tokio::join!(store.get_job(id), store.get_job_events(id));
            let result = job.and_then(|job| events.map(|events| JobDetail { job, events }));
            MonitorMessage::JobDetailLoaded { generation, result }
        });
    }

    // --- user actions ---

    fn set_status_filter(&mut self, myself: &Myself<C>, filter: StatusFilter) {
        if filter == self.status_filter {
            return;
        }
        self.status_filter = filter;
        self.fetch_jobs(myself);
    }

    fn select_view(&mut self, myself: &Myself<C>, view: SecondaryView) {
        self.secondary = view;
        self.fetch_secondary(myself);
    }

    fn open_queue_picker(&mut self) {
        self.picker = Picker::open(PickerKind::Queue, self.queues.clone(), &self.queue);
    }

    fn open_connection_picker(&mut self) {
        self.picker = Picker::open(
            PickerKind::Connection,
            self.config.connection_names(),
            &self.connection,
        );
    }

    fn confirm_picker(&mut self, myself: &Myself<C>) {
        let Some(action) = self.picker.take().and_then(|p| p.confirm()) else {
            return;
        };
        match action {
            PendingAction::QueueSwitch(queue) => self.switch_queue(myself, queue),
            PendingAction::ConnectionSwitch(connection) => {
                self.begin_connect(myself, connection, None)
            }
        }
    }

    // --- results ---

    fn on_jobs(&mut self, generation: u64, filter: StatusFilter, result: Result<Vec<Job>, StoreError>) {
        if !self.is_current(generation, "jobs") {
            return;
        }
        if filter != self.status_filter {
            tracing::debug!("Dropping jobs loaded for filter {}", filter);
            return;
        }
        if let Some(jobs) = self.record("jobs", result) {
            self.jobs = jobs;
        }
    }

    fn on_status_counts(&mut self, generation: u64, result: Result<Vec<StatusCount>, StoreError>) {
        if self.is_current(generation, "status counts")
            && let Some(counts) = self.record("status counts", result)
        {
            self.breakdown = StatusBreakdown::from_counts(&counts);
        }
    }

    fn on_recent(&mut self, generation: u64, result: Result<Vec<Job>, StoreError>) {
        if self.is_current(generation, "recent jobs")
            && let Some(recent) = self.record("recent jobs", result)
        {
            self.recent = recent;
        }
    }

    fn on_orphans(&mut self, generation: u64, result: Result<Vec<OrphanedJob>, StoreError>) {
        if self.is_current(generation, "orphans")
            && let Some(orphans) = self.record("orphaned jobs", result)
        {
            self.orphans = orphans;
        }
    }

    fn on_queues(&mut self, generation: u64, result: Result<Vec<String>, StoreError>) {
        if self.is_current(generation, "queues")
            && let Some(queues) = self.record("queues", result)
        {
            self.queues = queues;
        }
    }

    fn on_detail(&mut self, generation: u64, result: Result<JobDetail, StoreError>) {
        if self.is_current(generation, "job detail")
            && let Some(detail) = self.record("job detail", result)
        {
            self.detail = Some(detail);
        }
    }
}

/// Forward subscription deliveries into the mailbox, tagged with the
/// generation of the session that owns the subscription.
fn spawn_drain<S: JobStore>(
    myself: ActorRef<MonitorMessage<S>>,
    session_generation: u64,
    mut events: mpsc::Receiver<Delivery>,
) {
    tokio::spawn(async move {
        while let Some(delivery) = events.recv().await {
            let message = match delivery {
                Ok(event) => MonitorMessage::Notification {
                    session_generation,
                    event,
                },
                Err(error) => MonitorMessage::SubscriptionLost {
                    session_generation,
                    error,
                },
            };
            if myself.send_message(message).is_err() {
                break;
            }
        }
    });
}

/// Monitor actor, generic over how sessions are opened.
pub struct MonitorActor<C> {
    _connector: PhantomData<fn() -> C>,
}

impl<C> MonitorActor<C> {
    pub fn new() -> Self {
        Self {
            _connector: PhantomData,
        }
    }
}

impl<C> Default for MonitorActor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> Actor for MonitorActor<C> {
    type Msg = MonitorMessage<C::Store>;
    type State = MonitorState<C>;
    type Arguments = MonitorArgs<C>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue monitor");
        let mut state = MonitorState::new(args.connector, args.config, args.settings, args.sink);
        state.begin_connect(&myself, args.connection, args.queue);
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            MonitorMessage::Connect { connection, queue } => {
                state.begin_connect(&myself, connection, queue);
            }

            MonitorMessage::Disconnect => state.disconnect(),

            MonitorMessage::SwitchQueue { queue } => state.switch_queue(&myself, queue),

            MonitorMessage::SetStatusFilter { filter } => {
                state.set_status_filter(&myself, filter);
            }

            MonitorMessage::CycleStatusFilter => {
                let next = state.status_filter.next();
                state.set_status_filter(&myself, next);
            }

            MonitorMessage::SelectView { view } => state.select_view(&myself, view),

            MonitorMessage::NextView => {
                let view = state.secondary.next();
                state.select_view(&myself, view);
            }

            MonitorMessage::PrevView => {
                let view = state.secondary.prev();
                state.select_view(&myself, view);
            }

            MonitorMessage::ShowJob { id } => state.fetch_detail(&myself, id),

            MonitorMessage::CloseDetail => state.detail = None,

            MonitorMessage::OpenQueuePicker => state.open_queue_picker(),

            MonitorMessage::OpenConnectionPicker => state.open_connection_picker(),

            MonitorMessage::PickerMove { delta } => {
                if let Some(picker) = state.picker.as_mut() {
                    picker.move_by(delta);
                }
            }

            MonitorMessage::PickerConfirm => state.confirm_picker(&myself),

            MonitorMessage::PickerCancel => state.picker = None,

            MonitorMessage::GetView { reply } => {
                let _ = reply.send(state.view());
                return Ok(());
            }

            MonitorMessage::Shutdown => {
                tracing::info!("Shutting down queue monitor");
                state.shutdown().await;
                let view = state.view();
                state.sink.refresh(&view);
                myself.stop(None);
                return Ok(());
            }

            MonitorMessage::Connected { generation, result } => {
                state.on_connected(&myself, generation, *result);
            }

            MonitorMessage::Tick { generation } => {
                if state.session.is_none() || !state.is_current(generation, "tick") {
                    return Ok(());
                }
                tracing::debug!("Poll tick for queue {}", state.queue);
                state.refresh(&myself);
                state.scheduler.arm(&myself, generation);
            }

            MonitorMessage::Notification {
                session_generation,
                event,
            } => {
                if !state.owns_subscription(session_generation) {
                    tracing::debug!("Dropping notification from an old session");
                    return Ok(());
                }
                tracing::debug!("Change on queue {}: {}", state.queue, event.description());
                state.refresh(&myself);
            }

            MonitorMessage::SubscriptionLost {
                session_generation,
                error,
            }
            | MonitorMessage::ResubscribeFailed {
                session_generation,
                error,
            } => state.degrade_to_polling(session_generation, error),

            MonitorMessage::JobsLoaded {
                generation,
                filter,
                result,
            } => state.on_jobs(generation, filter, result),

            MonitorMessage::StatusCountsLoaded { generation, result } => {
                state.on_status_counts(generation, result);
            }

            MonitorMessage::RecentJobsLoaded { generation, result } => {
                state.on_recent(generation, result);
            }

            MonitorMessage::OrphansLoaded { generation, result } => {
                state.on_orphans(generation, result);
            }

            MonitorMessage::QueuesLoaded { generation, result } => {
                state.on_queues(generation, result);
            }

            MonitorMessage::JobDetailLoaded { generation, result } => {
                state.on_detail(generation, result);
            }

            MonitorMessage::ClearNotice { seq } => {
                if state.notice.as_ref().is_some_and(|n| n.seq == seq) {
                    state.notice = None;
                }
            }
        }

        let view = state.view();
        state.sink.refresh(&view);
        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        state.shutdown().await;
        tracing::info!("Queue monitor stopped");
        Ok(())
    }
}

/// Start the monitor and begin connecting to `args.connection`.
pub async fn start_monitor<C: Connector>(
    args: MonitorArgs<C>,
) -> Result<(ActorRef<MonitorMessage<C::Store>>, tokio::task::JoinHandle<()>), MonitorError> {
    args.config.connection(&args.connection)?;
    let (actor, handle) = Actor::spawn(None, MonitorActor::<C>::new(), args).await?;
    Ok((actor, handle))
}
