//! Single background worker servicing every running session round-robin.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use onair_core::ids::SessionId;

use crate::producer::{StepOutcome, TurnProducer};

/// Sessions the worker should advance, in registration order.
#[derive(Default)]
pub struct RunningSet {
    members: Mutex<Vec<SessionId>>,
}

impl RunningSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the session was already a member.
    pub fn insert(&self, id: SessionId) -> bool {
        let mut members = self.members.lock();
        if members.contains(&id) {
            return false;
        }
        members.push(id);
        true
    }

    pub fn remove(&self, id: &SessionId) -> bool {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|m| m != id);
        members.len() != before
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.members.lock().contains(id)
    }

    pub fn snapshot(&self) -> Vec<SessionId> {
        self.members.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Pause after each pass over the running set.
    pub pass_delay: Duration,
    /// Pause while the running set is empty.
    pub idle_delay: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pass_delay: Duration::from_millis(750),
            idle_delay: Duration::from_secs(1),
        }
    }
}

/// What one pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub advanced: usize,
    pub finished: Vec<SessionId>,
}

pub struct Worker {
    producer: Arc<TurnProducer>,
    running: Arc<RunningSet>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(producer: Arc<TurnProducer>, running: Arc<RunningSet>, config: WorkerConfig) -> Self {
        Self {
            producer,
            running,
            config,
        }
    }

    pub fn running(&self) -> &Arc<RunningSet> {
        &self.running
    }

    /// Advance every member by exactly one turn. Sessions whose step was
    /// terminal leave the set.
    pub async fn run_pass(&self) -> PassReport {
        let mut report = PassReport::default();
        for id in self.running.snapshot() {
            let outcome = self.producer.step_guarded(&id).await;
            if matches!(outcome, StepOutcome::Produced(_) | StepOutcome::Completed(_)) {
                report.advanced += 1;
            }
            if outcome.is_terminal() {
                self.running.remove(&id);
                debug!(session_id = %id, "session left running set");
                report.finished.push(id);
            }
        }
        report
    }

    /// Loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!("worker started");
        loop {
            let delay = if self.running.is_empty() {
                self.config.idle_delay
            } else {
                let report = self.run_pass().await;
                debug!(
                    advanced = report.advanced,
                    finished = report.finished.len(),
                    "worker pass complete"
                );
                self.config.pass_delay
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("worker stopped");
    }
}
