//! Push notifications over a dedicated LISTEN/NOTIFY connection.
//!
//! A [`SubscriptionChannel`] owns the listening connection inside its own
//! task. Bound to queue `Q` it listens on `prefix + Q` and on the global
//! channel. Switching queues always unlistens everything before listening
//! again, so two queue channels are never active together.

use std::future::Future;

use queue_core::ChangeEvent;
use sqlx::postgres::PgListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::StoreError;
use crate::schema::{GLOBAL_CHANNEL, queue_channel};

/// Capacity of the decoded-event buffer. A full buffer blocks the loop.
pub const NOTIFICATION_BUFFER: usize = 64;

/// Item delivered to the consumer: a change, or the one-time read failure
/// that ended the loop.
pub type Delivery = Result<ChangeEvent, StoreError>;

/// A connection able to LISTEN and yield raw notification payloads.
pub trait NotificationSource: Send + 'static {
    /// Start listening on a channel.
    fn listen(&mut self, channel: &str) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Stop listening on every channel.
    fn unlisten_all(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Wait for the next payload. An error ends the subscription.
    fn recv(&mut self) -> impl Future<Output = Result<String, StoreError>> + Send;
}

impl NotificationSource for PgListener {
    async fn listen(&mut self, channel: &str) -> Result<(), StoreError> {
        PgListener::listen(self, channel).await?;
        Ok(())
    }

    async fn unlisten_all(&mut self) -> Result<(), StoreError> {
        PgListener::unlisten_all(self).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, StoreError> {
        // `try_recv` reports a lost connection as `None` instead of
        // reconnecting behind our back.
        match self.try_recv().await? {
            Some(notification) => Ok(notification.payload().to_string()),
            None => Err(StoreError::SubscriptionClosed),
        }
    }
}

enum SubscriptionCommand {
    SwitchQueue {
        queue: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

async fn subscribe<S: NotificationSource>(source: &mut S, queue: &str) -> Result<(), StoreError> {
    source.listen(&queue_channel(queue)).await?;
    source.listen(GLOBAL_CHANNEL).await
}

async fn resubscribe<S: NotificationSource>(
    source: &mut S,
    queue: &str,
) -> Result<(), StoreError> {
    source.unlisten_all().await?;
    subscribe(source, queue).await
}

/// Subscription protocol over a [`NotificationSource`].
pub struct SubscriptionChannel;

impl SubscriptionChannel {
    /// Subscribe `source` to `queue` and start the receive loop.
    ///
    /// Fails if the initial LISTEN fails; no task is spawned then.
    pub async fn start<S: NotificationSource>(
        mut source: S,
        queue: impl Into<String>,
    ) -> Result<SubscriptionHandle, StoreError> {
        let queue = queue.into();
        subscribe(&mut source, &queue).await?;
        tracing::info!("Subscribed to notifications for queue {}", queue);

        let (event_tx, event_rx) = mpsc::channel(NOTIFICATION_BUFFER);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(source, queue, command_rx, event_tx));

        Ok(SubscriptionHandle {
            commands: Some(command_tx),
            events: Some(event_rx),
            task: Some(task),
        })
    }
}

async fn run<S: NotificationSource>(
    mut source: S,
    mut queue: String,
    mut commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    events: mpsc::Sender<Delivery>,
) {
    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(SubscriptionCommand::SwitchQueue { queue: next, reply }) => {
                    let result = resubscribe(&mut source, &next).await;
                    match &result {
                        Ok(()) => {
                            tracing::info!("Notifications switched from queue {} to {}", queue, next);
                            queue = next;
                        }
                        Err(e) => tracing::warn!("Resubscribe to queue {} failed: {}", next, e),
                    }
                    let _ = reply.send(result);
                }
                None => {
                    tracing::debug!("Subscription for queue {} cancelled", queue);
                    return;
                }
            },

            payload = source.recv() => match payload {
                Ok(raw) => match ChangeEvent::decode(&raw) {
                    Ok(event) => {
                        if events.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => tracing::warn!("Dropping notification {:?}: {}", raw, e),
                },
                Err(e) => {
                    tracing::warn!("Notification read failed for queue {}: {}", queue, e);
                    let _ = events.send(Err(e)).await;
                    return;
                }
            },
        }
    }
}

/// Control side of a running subscription.
pub struct SubscriptionHandle {
    commands: Option<mpsc::UnboundedSender<SubscriptionCommand>>,
    events: Option<mpsc::Receiver<Delivery>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Take the decoded event stream. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<Delivery>> {
        self.events.take()
    }

    /// Re-point the subscription at another queue.
    ///
    /// The command is queued immediately, so switches apply in call order;
    /// the returned future only waits for the outcome.
    pub fn switch_queue(
        &self,
        queue: impl Into<String>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send + 'static {
        let (reply, outcome) = oneshot::channel();
        let sent = match &self.commands {
            Some(commands) => commands
                .send(SubscriptionCommand::SwitchQueue {
                    queue: queue.into(),
                    reply,
                })
                .is_ok(),
            None => false,
        };
        async move {
            if !sent {
                return Err(StoreError::SubscriptionClosed);
            }
            outcome.await.map_err(|_| StoreError::SubscriptionClosed)?
        }
    }

    /// Whether the receive loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the loop and wait for it to release the connection.
    ///
    /// Idempotent.
    pub async fn close(&mut self) {
        self.commands.take();
        self.events.take();
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!("Subscription task ended abnormally: {}", e);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
