//! PostgreSQL LISTEN/NOTIFY broadcast bus for multi-node deployments.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use relay_core::config::BroadcastConfig;
use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::BroadcastBus;
use relay_core::types::{BusEvent, BusMessage};

use super::backoff::Backoff;

/// Capacity of the local fan-out of received notifications.
const EVENT_BUFFER: usize = 1024;

/// Broadcast bus over a PostgreSQL notification channel.
///
/// `notify` only enqueues; a publisher task issues `pg_notify`. A listener
/// task holds a dedicated connection subscribed to the channel and
/// reconnects with exponential backoff, announcing
/// [`BusEvent::Reconnected`] after every re-subscription.
#[derive(Debug)]
pub struct PgNotifyBus {
    pool: PgPool,
    channel: String,
    config: BroadcastConfig,
    outgoing: mpsc::Sender<BusMessage>,
    pending: Mutex<Option<mpsc::Receiver<BusMessage>>>,
    events: broadcast::Sender<BusEvent>,
    connected: AtomicBool,
}

/// How a listener session ended.
enum ListenerExit {
    /// Shutdown requested.
    Cancelled,
    /// Subscribed, then the connection dropped.
    Disconnected,
    /// Could not connect or subscribe.
    ConnectFailed(sqlx::Error),
}

impl PgNotifyBus {
    /// Create the bus. Call [`PgNotifyBus::start`] to begin I/O.
    pub fn new(pool: PgPool, config: &BroadcastConfig) -> Self {
        let (outgoing, pending) = mpsc::channel(config.publish_buffer.max(1));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            pool,
            channel: config.channel_name.clone(),
            config: config.clone(),
            outgoing,
            pending: Mutex::new(Some(pending)),
            events,
            connected: AtomicBool::new(false),
        }
    }

    /// Spawn the publisher and listener tasks.
    ///
    /// Both stop when `cancel` fires. Calling this twice is an error.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> AppResult<Vec<JoinHandle<()>>> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| AppError::conflict("Broadcast bus already started"))?;

        let publisher = tokio::spawn(self.clone().run_publisher(pending, cancel.clone()));
        let listener = tokio::spawn(self.clone().run_listener_loop(cancel));

        info!(channel = %self.channel, "Broadcast bus started");
        Ok(vec![publisher, listener])
    }

    async fn run_publisher(
        self: Arc<Self>,
        mut pending: mpsc::Receiver<BusMessage>,
        cancel: CancellationToken,
    ) {
        let mut backoff = Backoff::new(self.config.initial_backoff(), self.config.max_backoff());

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => break,
                message = pending.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let payload = match serde_json::to_string(&message) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(error = %e, "Failed to encode bus message");
                    continue;
                }
            };

            let sent = sqlx::query("SELECT pg_notify($1, $2)")
                .bind(&self.channel)
                .bind(&payload)
                .execute(&self.pool)
                .await;

            match sent {
                Ok(_) => backoff.reset(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(
                        error = %e,
                        backoff_ms = delay.as_millis() as u64,
                        "pg_notify failed; notification dropped, peers will reconcile"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        debug!("Broadcast publisher stopped");
    }

    async fn run_listener_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.initial_backoff(), self.config.max_backoff());
        let mut subscribed_before = false;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.listen_once(&cancel, &mut subscribed_before).await {
                ListenerExit::Cancelled => break,
                ListenerExit::Disconnected => {
                    backoff.reset();
                    error!(channel = %self.channel, "Broadcast listener connection lost, reconnecting");
                }
                ListenerExit::ConnectFailed(e) => {
                    error!(
                        channel = %self.channel,
                        error = %e,
                        "Broadcast listener failed to connect, retrying after backoff"
                    );
                }
            }
            self.connected.store(false, Ordering::SeqCst);

            let delay = backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        info!(channel = %self.channel, "Broadcast listener stopped");
    }

    async fn listen_once(
        &self,
        cancel: &CancellationToken,
        subscribed_before: &mut bool,
    ) -> ListenerExit {
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(e) => return ListenerExit::ConnectFailed(e),
        };
        if let Err(e) = listener.listen(&self.channel).await {
            return ListenerExit::ConnectFailed(e);
        }

        self.connected.store(true, Ordering::SeqCst);
        if *subscribed_before {
            info!(channel = %self.channel, "Broadcast listener re-subscribed");
            let _ = self.events.send(BusEvent::Reconnected);
        } else {
            info!(channel = %self.channel, "Broadcast listener subscribed");
        }
        *subscribed_before = true;

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = listener.unlisten(&self.channel).await;
                    return ListenerExit::Cancelled;
                }
                received = listener.try_recv() => received,
            };

            match received {
                Ok(Some(notification)) => {
                    match serde_json::from_str::<BusMessage>(notification.payload()) {
                        Ok(message) => {
                            let _ = self.events.send(BusEvent::Message(message));
                        }
                        Err(e) => {
                            warn!(error = %e, "Ignoring malformed bus notification");
                        }
                    }
                }
                Ok(None) => return ListenerExit::Disconnected,
                Err(e) => {
                    warn!(error = %e, "Broadcast listener receive failed");
                    return ListenerExit::Disconnected;
                }
            }
        }
    }
}

impl BroadcastBus for PgNotifyBus {
    fn notify(&self, message: BusMessage) -> AppResult<()> {
        self.outgoing.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::overflow("Broadcast publish buffer is full")
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::service_unavailable("Broadcast publisher is not running")
            }
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.events.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
