//! Fan-out of live notifications to connected subscribers.
//!
//! Each subscriber owns a bounded queue registered in the hub under a unique
//! id. Dropping the [`Subscription`] (for SSE, when the client disconnects
//! and axum drops the response stream) removes the registration. A
//! broadcast that cannot be queued for a subscriber, because its queue is
//! closed or full, removes that subscriber and carries on with the rest.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use rulewatch_core::{ActionLogEntry, Rule};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;

/// Notification pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    RuleAdded { rule: Rule },
    ActionLogged { action: ActionLogEntry },
}

struct Inner {
    next_id: AtomicU64,
    buffer: usize,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<HubEvent>>>,
}

impl Inner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<HubEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

impl EventHub {
    /// `buffer` is the per-subscriber queue depth (minimum 1).
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        self.inner.subscribers().insert(id, tx);
        tracing::debug!(subscriber = id, "subscriber connected");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Queue `event` for every live subscriber. Returns how many accepted it.
    pub fn broadcast(&self, event: HubEvent) -> usize {
        let mut subscribers = self.inner.subscribers();
        let mut delivered = 0;
        subscribers.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscriber = *id, "subscriber queue full; disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = *id, "subscriber gone");
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// A live registration. Yields events broadcast after it was created.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<HubEvent>,
    hub: Weak<Inner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = HubEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<HubEvent>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.subscribers().remove(&self.id);
            tracing::debug!(subscriber = self.id, "subscriber disconnected");
        }
    }
}
