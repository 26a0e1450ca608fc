use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use onair_core::ids::SessionId;
use onair_core::messages::{Message, SessionStatus};

use crate::database::Database;
use crate::error::StoreError;
use crate::registry::SessionInfo;
use crate::row_helpers;

/// Archived lifecycle record of one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedState {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub current_idx: Option<u64>,
    pub current_turn: i64,
}

/// Write-through SQLite copy of transcripts and session state.
///
/// Keeps at most `retain_per_session` messages per session, mirroring the
/// in-memory backlog cap.
#[derive(Clone)]
pub struct TranscriptArchive {
    db: Database,
    retain_per_session: usize,
}

impl TranscriptArchive {
    pub fn open(path: &Path, retain_per_session: usize) -> Result<Self, StoreError> {
        Ok(Self::new(Database::open(path)?, retain_per_session))
    }

    pub fn in_memory(retain_per_session: usize) -> Result<Self, StoreError> {
        Ok(Self::new(Database::in_memory()?, retain_per_session))
    }

    pub fn new(db: Database, retain_per_session: usize) -> Self {
        Self {
            db,
            retain_per_session: retain_per_session.max(1),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    #[instrument(skip_all, fields(session_id = %message.session_id, idx = message.idx))]
    pub fn record_message(&self, message: &Message) -> Result<(), StoreError> {
        let idx = message.idx as i64;
        let floor = idx - self.retain_per_session as i64;

        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT OR REPLACE INTO messages (session_id, idx, participant, text, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.session_id.as_str(),
                    idx,
                    message.participant.as_str(),
                    message.text,
                    message.timestamp.to_rfc3339(),
                ],
            )?;
            if floor >= 0 {
                tx.execute(
                    "DELETE FROM messages WHERE session_id = ?1 AND idx <= ?2",
                    rusqlite::params![message.session_id.as_str(), floor],
                )?;
            }
            Ok(())
        })
    }

    #[instrument(skip_all, fields(session_id = %info.session_id, status = %info.status))]
    pub fn record_state(&self, info: &SessionInfo) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_state (session_id, created_at, status, current_idx, current_turn, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(session_id) DO UPDATE SET
                    status = excluded.status,
                    current_idx = excluded.current_idx,
                    current_turn = excluded.current_turn,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    info.session_id.as_str(),
                    info.created_at.to_rfc3339(),
                    info.status.to_string(),
                    info.last_idx.map(|i| i as i64),
                    info.current_turn,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Archived messages of a session in idx order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn messages(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, idx, participant, text, timestamp
                 FROM messages WHERE session_id = ?1 ORDER BY idx ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                out.push(row_to_message(row)?);
            }
            Ok(out)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn state(&self, session_id: &SessionId) -> Result<Option<ArchivedState>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, created_at, status, current_idx, current_turn
                 FROM session_state WHERE session_id = ?1",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_state(row).map(Some),
                None => Ok(None),
            }
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    let session_id: String = row_helpers::get(row, 0, "messages", "session_id")?;
    let idx: i64 = row_helpers::get(row, 1, "messages", "idx")?;
    let participant: String = row_helpers::get(row, 2, "messages", "participant")?;
    let text: String = row_helpers::get(row, 3, "messages", "text")?;
    let timestamp: String = row_helpers::get(row, 4, "messages", "timestamp")?;

    Ok(Message {
        session_id: SessionId::from_raw(session_id),
        idx: row_helpers::to_u64(idx, "messages", "idx")?,
        participant: row_helpers::parse_enum(&participant, "messages", "participant")?,
        text,
        timestamp: row_helpers::parse_timestamp(&timestamp, "messages", "timestamp")?,
    })
}

fn row_to_state(row: &rusqlite::Row<'_>) -> Result<ArchivedState, StoreError> {
    let session_id: String = row_helpers::get(row, 0, "session_state", "session_id")?;
    let created_at: String = row_helpers::get(row, 1, "session_state", "created_at")?;
    let status: String = row_helpers::get(row, 2, "session_state", "status")?;
    let current_idx: Option<i64> = row_helpers::get(row, 3, "session_state", "current_idx")?;
    let current_turn: i64 = row_helpers::get(row, 4, "session_state", "current_turn")?;

    Ok(ArchivedState {
        session_id: SessionId::from_raw(session_id),
        created_at: row_helpers::parse_timestamp(&created_at, "session_state", "created_at")?,
        status: row_helpers::parse_enum(&status, "session_state", "status")?,
        current_idx: current_idx
            .map(|i| row_helpers::to_u64(i, "session_state", "current_idx"))
            .transpose()?,
        current_turn,
    })
}
