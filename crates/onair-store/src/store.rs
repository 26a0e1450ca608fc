use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use onair_core::ids::SessionId;
use onair_core::messages::{Message, Participant};

use crate::error::StoreError;
use crate::fanout::{Listener, Subscription};
use crate::registry::SessionRegistry;

/// Bounded, ordered message log per session.
///
/// Every successful append hands the message to the session's fan-out
/// before returning, under the same lock that assigns the idx.
#[derive(Clone)]
pub struct MessageStore {
    registry: Arc<SessionRegistry>,
    backlog_cap: usize,
}

impl MessageStore {
    pub fn new(registry: Arc<SessionRegistry>, backlog_cap: usize) -> Self {
        Self {
            registry,
            backlog_cap: backlog_cap.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn backlog_cap(&self) -> usize {
        self.backlog_cap
    }

    #[instrument(skip(self, text), fields(session_id = %session_id, participant = %participant))]
    pub fn append(
        &self,
        session_id: &SessionId,
        participant: Participant,
        text: impl Into<String>,
    ) -> Result<Message, StoreError> {
        let cell = self.registry.ensure_cell(session_id);
        let message = {
            let mut state = cell.state.lock();
            if state.status.is_terminal() {
                debug!("append rejected, session ended");
                return Err(StoreError::SessionEnded(session_id.clone()));
            }

            let message = Message {
                session_id: cell.id.clone(),
                idx: state.next_idx,
                participant,
                text: text.into(),
                timestamp: Utc::now(),
            };
            state.next_idx += 1;
            state.backlog.push_back(message.clone());
            while state.backlog.len() > self.backlog_cap {
                state.backlog.pop_front();
            }

            let delivered = cell.fanout.publish(&message);
            debug!(idx = message.idx, delivered, "message appended");
            message
        };

        if let Some(archive) = self.registry.archive() {
            if let Err(e) = archive.record_message(&message) {
                warn!(idx = message.idx, error = %e, "failed to archive message");
            }
        }
        Ok(message)
    }

    /// Copy of the current backlog, oldest first.
    pub fn snapshot(&self, session_id: &SessionId) -> Vec<Message> {
        self.registry
            .cell(session_id)
            .map(|c| c.state.lock().backlog.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The last `k` messages, oldest first.
    pub fn recent(&self, session_id: &SessionId, k: usize) -> Vec<Message> {
        let Some(cell) = self.registry.cell(session_id) else {
            return Vec::new();
        };
        let state = cell.state.lock();
        let skip = state.backlog.len().saturating_sub(k);
        state.backlog.iter().skip(skip).cloned().collect()
    }

    pub fn last(&self, session_id: &SessionId) -> Option<Message> {
        self.registry
            .cell(session_id)
            .and_then(|c| c.state.lock().backlog.back().cloned())
    }

    pub fn len(&self, session_id: &SessionId) -> usize {
        self.registry
            .cell(session_id)
            .map_or(0, |c| c.state.lock().backlog.len())
    }

    /// Backlog snapshot plus a live subscription, taken atomically: every
    /// message is either in the returned backlog or delivered to `listener`,
    /// never both and never neither.
    #[instrument(skip(self, listener), fields(session_id = %session_id))]
    pub fn read_and_subscribe(
        &self,
        session_id: &SessionId,
        listener: Arc<dyn Listener>,
    ) -> (Vec<Message>, Subscription) {
        let cell = self.registry.ensure_cell(session_id);
        let state = cell.state.lock();
        let backlog: Vec<Message> = state.backlog.iter().cloned().collect();
        let subscription = cell.fanout.subscribe(listener);
        drop(state);
        debug!(backlog = backlog.len(), subscriber_id = %subscription.id(), "viewer attached");
        (backlog, subscription)
    }

    /// Live-only subscription; no backlog replay.
    pub fn subscribe(&self, session_id: &SessionId, listener: Arc<dyn Listener>) -> Subscription {
        self.registry.ensure_cell(session_id).fanout.subscribe(listener)
    }
}
