//! Where turn production runs once a session is started.
//!
//! Exactly one strategy is injected into a coordinator. `LocalProducer`
//! spawns a dedicated loop per session; `RemoteSignalProducer` registers the
//! session with the running set a background `Worker` drains.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use onair_core::ids::SessionId;
use onair_engine::{RunningSet, StepOutcome, TurnProducer};

use crate::coordinator::CoordinatorError;

pub trait ProducerStrategy: Send + Sync {
    /// Mode label reported to clients.
    fn name(&self) -> &'static str;

    /// Begin producing turns for a started session.
    fn launch(&self, session_id: &SessionId) -> Result<(), CoordinatorError>;

    /// Whether a producer currently owns `session_id`.
    fn is_active(&self, session_id: &SessionId) -> bool;

    /// Stop every producer this strategy owns.
    fn shutdown(&self) -> usize;
}

/// One tokio task per session.
pub struct LocalProducer {
    producer: Arc<TurnProducer>,
    active: Arc<DashMap<SessionId, CancellationToken>>,
}

impl LocalProducer {
    pub fn new(producer: Arc<TurnProducer>) -> Self {
        Self {
            producer,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

impl ProducerStrategy for LocalProducer {
    fn name(&self) -> &'static str {
        "local"
    }

    fn launch(&self, session_id: &SessionId) -> Result<(), CoordinatorError> {
        let cancel = match self.active.entry(session_id.clone()) {
            Entry::Occupied(_) => {
                return Err(CoordinatorError::AlreadyProducing(session_id.clone()));
            }
            Entry::Vacant(slot) => {
                let cancel = CancellationToken::new();
                slot.insert(cancel.clone());
                cancel
            }
        };

        let producer = Arc::clone(&self.producer);
        let active = Arc::clone(&self.active);
        let task_session_id = session_id.clone();
        tokio::spawn(async move {
            let session_id = task_session_id;
            let outcome = producer.run(session_id.clone(), cancel).await;
            match &outcome {
                StepOutcome::Failed(e) => {
                    warn!(session_id = %session_id, error = %e, "producer failed");
                }
                other => debug!(session_id = %session_id, outcome = ?other, "producer finished"),
            }
            active.remove(&session_id);
        });
        info!(session_id = %session_id, "local producer launched");
        Ok(())
    }

    fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.contains_key(session_id)
    }

    fn shutdown(&self) -> usize {
        let count = self.active.len();
        for entry in self.active.iter() {
            entry.value().cancel();
        }
        self.active.clear();
        count
    }
}

/// Hands sessions to the background worker by running-set membership.
pub struct RemoteSignalProducer {
    running: Arc<RunningSet>,
}

impl RemoteSignalProducer {
    pub fn new(running: Arc<RunningSet>) -> Self {
        Self { running }
    }

    pub fn running(&self) -> &Arc<RunningSet> {
        &self.running
    }
}

impl ProducerStrategy for RemoteSignalProducer {
    fn name(&self) -> &'static str {
        "worker"
    }

    fn launch(&self, session_id: &SessionId) -> Result<(), CoordinatorError> {
        if !self.running.insert(session_id.clone()) {
            return Err(CoordinatorError::AlreadyProducing(session_id.clone()));
        }
        info!(session_id = %session_id, "session signalled to worker");
        Ok(())
    }

    fn is_active(&self, session_id: &SessionId) -> bool {
        self.running.contains(session_id)
    }

    fn shutdown(&self) -> usize {
        let members = self.running.snapshot();
        for id in &members {
            self.running.remove(id);
        }
        members.len()
    }
}
