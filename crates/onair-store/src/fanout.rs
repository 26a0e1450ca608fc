//! Per-session publish/subscribe.
//!
//! The subscriber set is copy-on-write: `publish` clones the current
//! `Arc<Vec<_>>` and delivers from that snapshot, so subscribing or
//! unsubscribing during a delivery pass never disturbs it. Listeners are held
//! weakly; the owning [`Subscription`] keeps them alive.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use onair_core::ids::{SessionId, SubscriberId};
use onair_core::messages::Message;

/// Why a listener could not take a message.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The listener is gone for good; it will be pruned.
    #[error("listener closed")]
    Closed,
    #[error("subscriber delivery failed: {0}")]
    Failed(String),
}

/// Receives live messages for one session.
///
/// Called while the session's append lock is held: implementations must not
/// block and must not call back into the store.
pub trait Listener: Send + Sync {
    fn on_message(&self, message: &Message) -> Result<(), DeliveryError>;

    /// The session ended; no further messages will arrive.
    fn on_end(&self) {}
}

#[derive(Clone)]
struct Entry {
    id: SubscriberId,
    listener: Weak<dyn Listener>,
}

#[derive(Default)]
struct Subscribers {
    entries: Arc<Vec<Entry>>,
    closed: bool,
}

pub struct FanOut {
    session_id: SessionId,
    inner: RwLock<Subscribers>,
}

impl FanOut {
    pub fn new(session_id: SessionId) -> Arc<Self> {
        Arc::new(Self {
            session_id,
            inner: RwLock::new(Subscribers::default()),
        })
    }

    /// Register `listener` for every message published from now on.
    ///
    /// On a closed channel the listener gets `on_end` immediately and the
    /// returned subscription is inert.
    pub fn subscribe(self: &Arc<Self>, listener: Arc<dyn Listener>) -> Subscription {
        let id = SubscriberId::new();
        let registered = {
            let mut inner = self.inner.write();
            if inner.closed {
                false
            } else {
                let mut next = Vec::with_capacity(inner.entries.len() + 1);
                next.extend(inner.entries.iter().cloned());
                next.push(Entry {
                    id: id.clone(),
                    listener: Arc::downgrade(&listener),
                });
                inner.entries = Arc::new(next);
                true
            }
        };

        if registered {
            debug!(session_id = %self.session_id, subscriber_id = %id, "subscriber added");
        } else {
            notify_end(&self.session_id, &id, &listener);
        }

        Subscription {
            id,
            session_id: self.session_id.clone(),
            fanout: Arc::downgrade(self),
            listener,
            active: registered,
        }
    }

    /// Deliver `message` to every live subscriber. Returns how many accepted it.
    pub fn publish(&self, message: &Message) -> usize {
        let snapshot = self.inner.read().entries.clone();
        let mut delivered = 0;
        let mut prune = Vec::new();

        for entry in snapshot.iter() {
            let Some(listener) = entry.listener.upgrade() else {
                prune.push(entry.id.clone());
                continue;
            };
            match catch_unwind(AssertUnwindSafe(|| listener.on_message(message))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(DeliveryError::Closed)) => prune.push(entry.id.clone()),
                Ok(Err(e)) => warn!(
                    session_id = %self.session_id,
                    subscriber_id = %entry.id,
                    idx = message.idx,
                    error = %e,
                    "subscriber delivery failed"
                ),
                Err(_) => warn!(
                    session_id = %self.session_id,
                    subscriber_id = %entry.id,
                    idx = message.idx,
                    "subscriber panicked during delivery"
                ),
            }
        }

        if !prune.is_empty() {
            self.remove(&prune);
        }
        delivered
    }

    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let removed = self.remove(std::slice::from_ref(id));
        if removed {
            debug!(session_id = %self.session_id, subscriber_id = %id, "subscriber removed");
        }
        removed
    }

    /// Release every subscriber and call its `on_end`. Later subscribers are
    /// ended immediately.
    pub fn close(&self) {
        let entries = {
            let mut inner = self.inner.write();
            inner.closed = true;
            std::mem::take(&mut inner.entries)
        };
        for entry in entries.iter() {
            if let Some(listener) = entry.listener.upgrade() {
                notify_end(&self.session_id, &entry.id, &listener);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().closed
    }

    /// Number of subscribers whose listener is still alive.
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.listener.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, ids: &[SubscriberId]) -> bool {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        let next: Vec<Entry> = inner
            .entries
            .iter()
            .filter(|e| !ids.contains(&e.id))
            .cloned()
            .collect();
        let removed = next.len() != before;
        if removed {
            inner.entries = Arc::new(next);
        }
        removed
    }
}

fn notify_end(session_id: &SessionId, id: &SubscriberId, listener: &Arc<dyn Listener>) {
    if catch_unwind(AssertUnwindSafe(|| listener.on_end())).is_err() {
        warn!(%session_id, subscriber_id = %id, "subscriber panicked in on_end");
    }
}

/// Caller-owned handle for one registration. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    session_id: SessionId,
    fanout: Weak<FanOut>,
    listener: Arc<dyn Listener>,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> &SubscriberId {
        &self.id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn listener(&self) -> &Arc<dyn Listener> {
        &self.listener
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if std::mem::take(&mut self.active) {
            if let Some(fanout) = self.fanout.upgrade() {
                fanout.unsubscribe(&self.id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("session_id", &self.session_id)
            .field("active", &self.active)
            .finish()
    }
}

/// Forwards messages into an unbounded tokio channel. Ending the session
/// drops the sender, so the receiving stream terminates.
pub struct ChannelListener {
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl ChannelListener {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

impl Listener for ChannelListener {
    fn on_message(&self, message: &Message) -> Result<(), DeliveryError> {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(message.clone()).map_err(|_| DeliveryError::Closed),
            None => Err(DeliveryError::Closed),
        }
    }

    fn on_end(&self) {
        self.tx.lock().take();
    }
}

/// Closure-backed listener.
pub struct FnListener<F> {
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&Message) -> Result<(), DeliveryError> + Send + Sync,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self { f })
    }
}

impl<F> Listener for FnListener<F>
where
    F: Fn(&Message) -> Result<(), DeliveryError> + Send + Sync,
{
    fn on_message(&self, message: &Message) -> Result<(), DeliveryError> {
        (self.f)(message)
    }
}
