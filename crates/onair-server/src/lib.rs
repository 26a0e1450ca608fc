pub mod coordinator;
pub mod server;
pub mod strategy;

pub use coordinator::{CoordinatorError, DebugInfo, LiveFeed, SessionCoordinator};
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use strategy::{LocalProducer, ProducerStrategy, RemoteSignalProducer};
