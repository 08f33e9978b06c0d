//! Completion notification channel.
//!
//! Publishers announce finished tickets; subscribers receive every ticket
//! published after they subscribed. There is no replay: a subscriber that
//! joins late must consult the job store, which the coordinator does on
//! its behalf. Closing is idempotent and ends all subscriptions cleanly;
//! publishing after close is a loud error, never a silent drop.

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("notification channel is closed")]
    Closed,

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// What a subscriber wakes up to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A ticket was announced.
    Ticket(String),
    /// The subscriber fell behind and announcements were dropped. The
    /// skipped tickets are recoverable through the job store, so waiters
    /// must re-check it on this signal.
    Lagged,
}

/// A stream of completed-ticket announcements.
pub struct TicketSubscription {
    rx: Option<broadcast::Receiver<String>>,
}

impl TicketSubscription {
    pub(crate) fn live(rx: broadcast::Receiver<String>) -> Self {
        Self { rx: Some(rx) }
    }

    /// A subscription on an already-closed channel: completes immediately.
    pub(crate) fn finished() -> Self {
        Self { rx: None }
    }

    /// Next notice, or `None` once the channel closes. Lag is surfaced
    /// rather than swallowed so the caller can fall back to the store.
    pub async fn recv(&mut self) -> Option<Notice> {
        let rx = self.rx.as_mut()?;
        match rx.recv().await {
            Ok(ticket) => Some(Notice::Ticket(ticket)),
            Err(broadcast::error::RecvError::Closed) => None,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: "jobs", skipped, "subscriber lagged behind notifications");
                Some(Notice::Lagged)
            }
        }
    }

    /// Next announced ticket, skipping lag signals. For consumers that
    /// only care about live announcements.
    pub async fn next_ticket(&mut self) -> Option<String> {
        loop {
            match self.recv().await? {
                Notice::Ticket(ticket) => return Some(ticket),
                Notice::Lagged => continue,
            }
        }
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Announce a completed ticket to all current subscribers.
    async fn publish(&self, ticket: &str) -> Result<(), ChannelError>;

    async fn subscribe(&self) -> TicketSubscription;

    /// Close the channel. Idempotent; all subscriptions end cleanly.
    async fn close(&self);
}

/// Single-process channel over a tokio broadcast.
pub struct InMemoryNotificationChannel {
    sender: Mutex<Option<broadcast::Sender<String>>>,
}

impl InMemoryNotificationChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            sender: Mutex::new(Some(tx)),
        }
    }
}

impl Default for InMemoryNotificationChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotificationChannel {
    async fn publish(&self, ticket: &str) -> Result<(), ChannelError> {
        let guard = self.sender.lock().await;
        match guard.as_ref() {
            None => Err(ChannelError::Closed),
            Some(tx) => {
                // A send error only means no subscriber is currently
                // listening; the job store still has the result.
                let receivers = tx.send(ticket.to_string()).unwrap_or(0);
                debug!(target: "jobs", ticket, receivers, "published completion");
                Ok(())
            }
        }
    }

    async fn subscribe(&self) -> TicketSubscription {
        let guard = self.sender.lock().await;
        match guard.as_ref() {
            Some(tx) => TicketSubscription::live(tx.subscribe()),
            None => TicketSubscription::finished(),
        }
    }

    async fn close(&self) {
        let mut guard = self.sender.lock().await;
        if guard.take().is_some() {
            debug!(target: "jobs", "notification channel closed");
        }
    }
}
