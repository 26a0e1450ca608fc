//! Turn production: who speaks next, what they are asked, how the answer
//! is cleaned up, and the loops that drive sessions forward.

pub mod error;
pub mod normalize;
pub mod producer;
pub mod prompt;
pub mod roster;
pub mod worker;

pub use error::EngineError;
pub use producer::{ProducerConfig, StepOutcome, TurnProducer};
pub use roster::{EpisodeMeta, SEED_TEXT};
pub use worker::{PassReport, RunningSet, Worker, WorkerConfig};
