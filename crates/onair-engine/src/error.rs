use onair_core::errors::CompletionError;
use onair_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("upstream call failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("producer panicked: {0}")]
    Panicked(String),
}

impl EngineError {
    /// The session was ended by someone else; not a failure of this producer.
    pub fn is_session_ended(&self) -> bool {
        matches!(self, Self::Store(StoreError::SessionEnded(_)))
    }

    /// Human-readable cause, as shown to viewers in the SYSTEM line.
    pub fn reason(&self) -> String {
        match self {
            Self::Completion(e) => e.to_string(),
            Self::Store(e) => e.to_string(),
            Self::Panicked(msg) => format!("producer crashed: {msg}"),
        }
    }
}
