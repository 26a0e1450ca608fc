use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use onair_core::ids::SessionId;
use onair_core::messages::{Message, Participant, SessionStatus};
use onair_engine::SEED_TEXT;
use onair_store::{Listener, MessageStore, StoreError, Subscription};

use crate::strategy::ProducerStrategy;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("session {0} already has an active producer")]
    AlreadyProducing(SessionId),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Backlog at the moment of subscribing plus the live tail after it.
pub struct LiveFeed {
    pub backlog: Vec<Message>,
    pub subscription: Subscription,
}

/// Diagnostic view of one session.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub is_running: bool,
    pub message_count: usize,
    pub current_turn: i64,
    pub subscriber_count: usize,
    pub last_message: Option<Message>,
}

/// Entry point for everything a viewer or operator does with a session.
pub struct SessionCoordinator {
    store: MessageStore,
    strategy: Arc<dyn ProducerStrategy>,
}

impl SessionCoordinator {
    pub fn new(store: MessageStore, strategy: Arc<dyn ProducerStrategy>) -> Self {
        Self { store, strategy }
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn mode(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn strategy(&self) -> &Arc<dyn ProducerStrategy> {
        &self.strategy
    }

    /// Create a session, seed turn zero and hand it to the producer.
    #[instrument(skip(self), fields(mode = self.strategy.name()))]
    pub fn start(&self) -> Result<SessionId, CoordinatorError> {
        let session_id = SessionId::new();
        let registry = self.store.registry();
        registry.ensure(&session_id);
        self.store.append(&session_id, Participant::DjClaw, SEED_TEXT)?;
        registry.mark_started(&session_id)?;
        self.strategy.launch(&session_id)?;
        info!(session_id = %session_id, "session started");
        Ok(session_id)
    }

    /// Atomic backlog read plus live subscription. Subscribing before a
    /// session starts creates it unstarted.
    pub fn subscribe(&self, session_id: &SessionId, listener: Arc<dyn Listener>) -> LiveFeed {
        let (backlog, subscription) = self.store.read_and_subscribe(session_id, listener);
        LiveFeed {
            backlog,
            subscription,
        }
    }

    pub fn debug_info(&self, session_id: &SessionId) -> DebugInfo {
        let registry = self.store.registry();
        let info = registry.info(session_id);
        DebugInfo {
            session_id: session_id.clone(),
            status: registry.status(session_id),
            is_running: self.strategy.is_active(session_id),
            message_count: info.as_ref().map_or(0, |i| i.message_count),
            current_turn: info.as_ref().map_or(0, |i| i.current_turn),
            subscriber_count: info.as_ref().map_or(0, |i| i.subscriber_count),
            last_message: self.store.last(session_id),
        }
    }

    pub fn session_count(&self) -> usize {
        self.store.registry().len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use onair_engine::{ProducerConfig, RunningSet, TurnProducer};
    use onair_llm::MockProvider;
    use onair_store::{ChannelListener, SessionRegistry};

    use super::*;
    use crate::strategy::{LocalProducer, RemoteSignalProducer};

    fn store() -> MessageStore {
        MessageStore::new(Arc::new(SessionRegistry::new()), 200)
    }

    fn worker_coordinator() -> (SessionCoordinator, Arc<RunningSet>) {
        let running = Arc::new(RunningSet::new());
        let strategy = Arc::new(RemoteSignalProducer::new(running.clone()));
        (SessionCoordinator::new(store(), strategy), running)
    }

    #[test]
    fn start_seeds_turn_zero_and_signals_worker() {
        let (coordinator, running) = worker_coordinator();
        let id = coordinator.start().unwrap();

        let backlog = coordinator.store().snapshot(&id);
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].idx, 0);
        assert_eq!(backlog[0].participant, Participant::DjClaw);
        assert!(backlog[0].text.contains("Welcome to Claw Radio"));
        assert!(backlog[0].text.ends_with("(turn 0)"));

        assert_eq!(
            coordinator.store().registry().status(&id),
            SessionStatus::Running
        );
        assert!(running.contains(&id));
        assert_eq!(coordinator.mode(), "worker");
    }

    #[test]
    fn each_start_is_a_fresh_session() {
        let (coordinator, running) = worker_coordinator();
        let a = coordinator.start().unwrap();
        let b = coordinator.start().unwrap();
        assert_ne!(a, b);
        assert_eq!(running.len(), 2);
        assert_eq!(coordinator.session_count(), 2);
    }

    #[tokio::test]
    async fn early_subscriber_creates_unstarted_session() {
        let (coordinator, _) = worker_coordinator();
        let id = SessionId::new();
        let (listener, _rx) = ChannelListener::channel();

        let feed = coordinator.subscribe(&id, listener);
        assert!(feed.backlog.is_empty());
        assert_eq!(
            coordinator.store().registry().status(&id),
            SessionStatus::Unstarted
        );
        assert_eq!(coordinator.debug_info(&id).subscriber_count, 1);

        drop(feed);
        assert_eq!(coordinator.debug_info(&id).subscriber_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn debug_info_reflects_local_production() {
        let store = store();
        let producer = Arc::new(TurnProducer::new(
            Arc::new(MockProvider::always("and we are live")),
            store.clone(),
            ProducerConfig::default(),
        ));
        let coordinator =
            SessionCoordinator::new(store, Arc::new(LocalProducer::new(producer)));
        let id = coordinator.start().unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        let info = coordinator.debug_info(&id);
        assert!(info.is_running);
        assert_eq!(info.status, SessionStatus::Running);
        assert!(info.current_turn >= 1);
        assert_eq!(info.message_count as i64, info.current_turn + 1);
        let last = info.last_message.unwrap();
        assert!(last.text.ends_with(&format!("(turn {})", info.current_turn)));

        assert_eq!(coordinator.strategy().shutdown(), 1);
    }

    #[test]
    fn debug_info_of_unknown_session_is_empty() {
        let (coordinator, _) = worker_coordinator();
        let info = coordinator.debug_info(&SessionId::from_raw("sess_missing"));
        assert_eq!(info.status, SessionStatus::Unstarted);
        assert!(!info.is_running);
        assert_eq!(info.message_count, 0);
        assert!(info.last_message.is_none());

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["sessionId"], "sess_missing");
        assert_eq!(json["isRunning"], false);
        assert!(json["lastMessage"].is_null());
    }
}
