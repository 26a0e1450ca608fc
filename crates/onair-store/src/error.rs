use onair_core::ids::SessionId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The session is terminal; the write was rejected and nothing changed.
    #[error("session {0} has ended")]
    SessionEnded(SessionId),

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
