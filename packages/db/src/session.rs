//! Session lifecycle: one query pool plus one subscription, opened and
//! closed together.

use std::future::Future;
use std::sync::Arc;

use queue_core::ConnectionProfile;
use sqlx::postgres::PgListener;

use crate::listener::{NotificationSource, SubscriptionChannel, SubscriptionHandle};
use crate::{ConnectError, JobStore, PoolSettings, QueryGateway, StoreError, connection};

/// Opens the two connections a session needs.
pub trait Connector: Send + Sync + 'static {
    type Store: JobStore;
    type Source: NotificationSource;

    /// Open and verify the pooled query connection.
    fn open_store(
        &self,
        profile: &ConnectionProfile,
    ) -> impl Future<Output = Result<Self::Store, StoreError>> + Send;

    /// Open the dedicated listening connection.
    fn open_source(
        &self,
        profile: &ConnectionProfile,
        store: &Self::Store,
    ) -> impl Future<Output = Result<Self::Source, StoreError>> + Send;
}

/// [`Connector`] for PostgreSQL.
#[derive(Debug, Clone, Default)]
pub struct PgConnector {
    settings: PoolSettings,
}

impl PgConnector {
    pub fn new(settings: PoolSettings) -> Self {
        Self { settings }
    }
}

impl Connector for PgConnector {
    type Store = QueryGateway;
    type Source = PgListener;

    async fn open_store(&self, profile: &ConnectionProfile) -> Result<QueryGateway, StoreError> {
        let pool = connection::open_pool(profile, &self.settings).await?;
        Ok(QueryGateway::new(pool, &self.settings))
    }

    async fn open_source(
        &self,
        profile: &ConnectionProfile,
        _store: &QueryGateway,
    ) -> Result<PgListener, StoreError> {
        connection::open_listener(connection::connect_options(profile)?, &self.settings).await
    }
}

/// A live pairing of query store, subscription and active queue.
pub struct Session<S: JobStore> {
    /// Generation the session was opened under; identifies it.
    pub generation: u64,
    pub connection: String,
    pub queue: String,
    pub store: S,
    /// `None` when subscribing failed; polling alone keeps the view live.
    pub subscription: Option<SubscriptionHandle>,
    closed: bool,
}

impl<S: JobStore> Session<S> {
    /// Whether push notifications are flowing.
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(SubscriptionHandle::is_running)
    }

    /// Whether `close` already ran.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Cancel the subscription, then close the pool. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.close().await;
        }
        if !self.closed {
            self.store.close().await;
            self.closed = true;
            tracing::info!("Closed session for connection {}", self.connection);
        }
    }
}

impl<S: JobStore> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("generation", &self.generation)
            .field("connection", &self.connection)
            .field("queue", &self.queue)
            .field("subscribed", &self.subscription.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Opens, replaces and closes sessions.
pub struct SessionManager<C: Connector> {
    connector: Arc<C>,
}

impl<C: Connector> Clone for SessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
        }
    }
}

impl<C: Connector> SessionManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector: Arc::new(connector),
        }
    }

    /// Open a session bound to `queue`.
    ///
    /// A pool failure fails the attempt with nothing left open. A
    /// subscription failure does not: the session comes back without one.
    pub async fn connect(
        &self,
        profile: &ConnectionProfile,
        queue: &str,
        generation: u64,
    ) -> Result<Session<C::Store>, ConnectError> {
        let store = self
            .connector
            .open_store(profile)
            .await
            .map_err(|source| ConnectError {
                profile: profile.name.clone(),
                source,
            })?;

        let subscription = match self.connector.open_source(profile, &store).await {
            Ok(source) => match SubscriptionChannel::start(source, queue).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!("Subscribe failed, polling only: {}", e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Listener connection failed, polling only: {}", e);
                None
            }
        };

        Ok(Session {
            generation,
            connection: profile.name.clone(),
            queue: queue.to_string(),
            store,
            subscription,
            closed: false,
        })
    }

    /// Tear down `current` completely, then open a session for `profile`.
    pub async fn switch(
        &self,
        current: Option<Session<C::Store>>,
        profile: &ConnectionProfile,
        queue: &str,
        generation: u64,
    ) -> Result<Session<C::Store>, ConnectError> {
        self.close(current).await;
        self.connect(profile, queue, generation).await
    }

    /// Close a session if there is one.
    pub async fn close(&self, session: Option<Session<C::Store>>) {
        if let Some(mut session) = session {
            session.close().await;
        }
    }
}
