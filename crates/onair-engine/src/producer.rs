use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use onair_core::errors::CompletionError;
use onair_core::ids::SessionId;
use onair_core::messages::{Message, Participant};
use onair_core::provider::{CompletionOptions, CompletionProvider};
use onair_store::MessageStore;

use crate::error::EngineError;
use crate::normalize::normalize_line;
use crate::prompt::{build_prompt, render_context, system_notice};
use crate::roster::{speaker_for_turn, EpisodeMeta};

/// Tuning for turn production.
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    pub total_turns: u32,
    pub context_window: usize,
    pub inter_turn_delay: Duration,
    /// Hard bound on one completion call, on top of the client's own timeout.
    pub completion_timeout: Duration,
    pub options: CompletionOptions,
    pub max_line_chars: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            total_turns: 32,
            context_window: 12,
            inter_turn_delay: Duration::from_millis(750),
            completion_timeout: Duration::from_secs(25),
            options: CompletionOptions::default(),
            max_line_chars: 320,
        }
    }
}

/// Result of advancing a session by one step.
#[derive(Debug)]
pub enum StepOutcome {
    /// A turn was appended and more remain.
    Produced(Message),
    /// The last budgeted turn was appended; the session is ended.
    Completed(Message),
    /// The turn failed; a SYSTEM notice was appended and the session ended.
    Failed(EngineError),
    /// The session was already ended elsewhere; nothing was appended.
    Stopped,
}

impl StepOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Produced(_))
    }
}

/// Generates turns for running sessions.
///
/// Holds no per-session state: the last produced turn lives in the session
/// registry, so one producer serves any number of sessions, either as a
/// dedicated loop per session (`run`) or one step at a time (`step`).
pub struct TurnProducer {
    provider: Arc<dyn CompletionProvider>,
    store: MessageStore,
    config: ProducerConfig,
    episode: EpisodeMeta,
}

impl TurnProducer {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        store: MessageStore,
        config: ProducerConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
            episode: EpisodeMeta::default(),
        }
    }

    pub fn with_episode(mut self, episode: EpisodeMeta) -> Self {
        self.episode = episode;
        self
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Generate turn `turn` for `session_id` and append it.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn produce_turn(
        &self,
        session_id: &SessionId,
        turn: u32,
    ) -> Result<Message, EngineError> {
        let speaker = speaker_for_turn(turn);
        let recent = self.store.recent(session_id, self.config.context_window);
        let context = render_context(&recent);
        let prompt = build_prompt(&self.episode, speaker, &context, turn);

        let raw = tokio::time::timeout(
            self.config.completion_timeout,
            self.provider.complete(&prompt, &self.config.options),
        )
        .await
        .map_err(|_| CompletionError::Timeout(self.config.completion_timeout))??;

        let text = normalize_line(&raw, i64::from(turn), self.config.max_line_chars);
        let message = self.store.append(session_id, speaker.participant, text)?;
        self.store.registry().set_turn(session_id, i64::from(turn))?;

        debug!(
            idx = message.idx,
            participant = %message.participant,
            "turn produced"
        );
        Ok(message)
    }

    /// Advance `session_id` by exactly one turn. The turn number follows the
    /// registry's current turn.
    pub async fn step(&self, session_id: &SessionId) -> StepOutcome {
        let registry = self.store.registry();
        if registry.is_ended(session_id) {
            return StepOutcome::Stopped;
        }

        let last = registry.current_turn(session_id).unwrap_or(0).max(0);
        let turn = u32::try_from(last).unwrap_or(u32::MAX).saturating_add(1);
        if turn > self.config.total_turns {
            registry.mark_ended(session_id);
            return StepOutcome::Stopped;
        }

        match self.produce_turn(session_id, turn).await {
            Ok(message) if turn >= self.config.total_turns => {
                registry.mark_ended(session_id);
                info!(session_id = %session_id, turn, "session completed");
                StepOutcome::Completed(message)
            }
            Ok(message) => StepOutcome::Produced(message),
            Err(e) if e.is_session_ended() => {
                debug!(session_id = %session_id, turn, "session ended during turn");
                StepOutcome::Stopped
            }
            Err(e) => {
                self.fail(session_id, &e.reason());
                StepOutcome::Failed(e)
            }
        }
    }

    /// `step`, with a panic converted into a failed session.
    pub async fn step_guarded(&self, session_id: &SessionId) -> StepOutcome {
        match AssertUnwindSafe(self.step(session_id)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => {
                let msg = panic_message(&panic);
                error!(session_id = %session_id, panic = %msg, "producer panicked");
                let err = EngineError::Panicked(msg);
                self.fail(session_id, &err.reason());
                StepOutcome::Failed(err)
            }
        }
    }

    /// Append the SYSTEM notice for `reason` and end the session.
    pub fn fail(&self, session_id: &SessionId, reason: &str) {
        warn!(session_id = %session_id, reason, "turn failed, ending session");
        let text = normalize_line(&system_notice(reason), -1, self.config.max_line_chars);
        if let Err(e) = self.store.append(session_id, Participant::System, text) {
            debug!(session_id = %session_id, error = %e, "failure notice not recorded");
        }
        self.store.registry().mark_ended(session_id);
    }

    /// Produce turns with the fixed inter-turn delay until the session
    /// completes, fails, is ended elsewhere, or `cancel` fires.
    #[instrument(skip(self, cancel), fields(session_id = %session_id))]
    pub async fn run(&self, session_id: SessionId, cancel: CancellationToken) -> StepOutcome {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepOutcome::Stopped,
                outcome = self.step_guarded(&session_id) => outcome,
            };
            if outcome.is_terminal() {
                return outcome;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StepOutcome::Stopped,
                _ = tokio::time::sleep(self.config.inter_turn_delay) => {}
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
