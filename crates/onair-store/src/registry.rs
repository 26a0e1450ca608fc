use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use onair_core::ids::SessionId;
use onair_core::messages::{Message, SessionStatus};

use crate::archive::TranscriptArchive;
use crate::error::StoreError;
use crate::fanout::FanOut;

/// Mutable per-session state. Guarded by the session lock, which is also
/// the append lock.
pub(crate) struct SessionState {
    pub status: SessionStatus,
    pub backlog: VecDeque<Message>,
    pub next_idx: u64,
    pub current_turn: i64,
}

pub(crate) struct SessionCell {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub state: Mutex<SessionState>,
    pub fanout: Arc<FanOut>,
}

impl SessionCell {
    fn new(id: SessionId) -> Self {
        Self {
            fanout: FanOut::new(id.clone()),
            id,
            created_at: Utc::now(),
            state: Mutex::new(SessionState {
                status: SessionStatus::Unstarted,
                backlog: VecDeque::new(),
                next_idx: 0,
                current_turn: 0,
            }),
        }
    }

    pub fn info_locked(&self, state: &SessionState) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            created_at: self.created_at,
            status: state.status,
            message_count: state.backlog.len(),
            last_idx: state.next_idx.checked_sub(1),
            current_turn: state.current_turn,
            subscriber_count: self.fanout.len(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state.lock();
        self.info_locked(&state)
    }
}

/// Point-in-time view of a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    /// Messages currently held in the backlog.
    pub message_count: usize,
    /// Highest idx ever assigned, even if since evicted.
    pub last_idx: Option<u64>,
    pub current_turn: i64,
    pub subscriber_count: usize,
}

/// Owns every session's lifecycle state, backlog and subscriber set.
///
/// Sessions are created on first reference. An attached archive receives a
/// copy of each state change; archive failures are logged and never fail
/// the in-memory operation.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionCell>>,
    archive: Option<TranscriptArchive>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(archive: TranscriptArchive) -> Self {
        Self {
            sessions: DashMap::new(),
            archive: Some(archive),
        }
    }

    pub fn archive(&self) -> Option<&TranscriptArchive> {
        self.archive.as_ref()
    }

    pub(crate) fn cell(&self, id: &SessionId) -> Option<Arc<SessionCell>> {
        self.sessions.get(id).map(|c| c.value().clone())
    }

    pub(crate) fn ensure_cell(&self, id: &SessionId) -> Arc<SessionCell> {
        if let Some(cell) = self.cell(id) {
            return cell;
        }
        let mut created = false;
        let cell = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(SessionCell::new(id.clone()))
            })
            .value()
            .clone();
        if created {
            debug!(session_id = %id, "session created");
            self.mirror_state(&cell.info());
        }
        cell
    }

    /// Get-or-create. Idempotent.
    pub fn ensure(&self, id: &SessionId) -> SessionInfo {
        self.ensure_cell(id).info()
    }

    /// `Unstarted → Running`. Already running is a no-op; an ended session
    /// stays ended.
    pub fn mark_started(&self, id: &SessionId) -> Result<(), StoreError> {
        let cell = self.ensure_cell(id);
        let info = {
            let mut state = cell.state.lock();
            match state.status {
                SessionStatus::Ended => {
                    debug!(session_id = %id, "start rejected, session ended");
                    return Err(StoreError::SessionEnded(id.clone()));
                }
                SessionStatus::Running => return Ok(()),
                SessionStatus::Unstarted => {
                    state.status = SessionStatus::Running;
                    cell.info_locked(&state)
                }
            }
        };
        info!(session_id = %id, "session started");
        self.mirror_state(&info);
        Ok(())
    }

    /// Transition to `Ended` and release every subscriber. Returns whether
    /// this call performed the transition.
    pub fn mark_ended(&self, id: &SessionId) -> bool {
        let cell = self.ensure_cell(id);
        let info = {
            let mut state = cell.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            state.status = SessionStatus::Ended;
            cell.fanout.close();
            cell.info_locked(&state)
        };
        info!(
            session_id = %id,
            messages = info.last_idx.map_or(0, |i| i + 1),
            turn = info.current_turn,
            "session ended"
        );
        self.mirror_state(&info);
        true
    }

    /// Unknown sessions read as `Unstarted` and are not created.
    pub fn status(&self, id: &SessionId) -> SessionStatus {
        self.cell(id)
            .map(|c| c.state.lock().status)
            .unwrap_or_default()
    }

    pub fn is_ended(&self, id: &SessionId) -> bool {
        self.status(id).is_terminal()
    }

    /// True once production has begun, including after it ended.
    pub fn is_started(&self, id: &SessionId) -> bool {
        self.status(id) != SessionStatus::Unstarted
    }

    pub fn info(&self, id: &SessionId) -> Option<SessionInfo> {
        self.cell(id).map(|c| c.info())
    }

    pub fn current_turn(&self, id: &SessionId) -> Option<i64> {
        self.cell(id).map(|c| c.state.lock().current_turn)
    }

    /// Record the last produced turn. Rejected once the session has ended.
    pub fn set_turn(&self, id: &SessionId, turn: i64) -> Result<(), StoreError> {
        let cell = self.ensure_cell(id);
        let info = {
            let mut state = cell.state.lock();
            if state.status.is_terminal() {
                return Err(StoreError::SessionEnded(id.clone()));
            }
            state.current_turn = turn;
            cell.info_locked(&state)
        };
        self.mirror_state(&info);
        Ok(())
    }

    pub fn subscriber_count(&self, id: &SessionId) -> usize {
        self.cell(id).map_or(0, |c| c.fanout.len())
    }

    /// All known sessions, ordered by id.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let cells: Vec<Arc<SessionCell>> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        let mut infos: Vec<SessionInfo> = cells.iter().map(|c| c.info()).collect();
        infos.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Forget a session entirely. Its subscribers are ended.
    pub fn drop_session(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, cell)) => {
                cell.fanout.close();
                debug!(session_id = %id, "session dropped");
                true
            }
            None => false,
        }
    }

    fn mirror_state(&self, info: &SessionInfo) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.record_state(info) {
                warn!(session_id = %info.session_id, error = %e, "failed to archive session state");
            }
        }
    }
}
