pub mod archive;
pub mod database;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod row_helpers;
pub mod schema;
pub mod store;

pub use archive::{ArchivedState, TranscriptArchive};
pub use database::Database;
pub use error::StoreError;
pub use fanout::{ChannelListener, DeliveryError, FanOut, FnListener, Listener, Subscription};
pub use registry::{SessionInfo, SessionRegistry};
pub use store::MessageStore;
