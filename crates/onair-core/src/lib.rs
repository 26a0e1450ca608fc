pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;

pub use errors::CompletionError;
pub use ids::{SessionId, SubscriberId};
pub use messages::{Message, Participant, SessionStatus};
pub use provider::{ChatMessage, ChatRole, CompletionOptions, CompletionProvider};
