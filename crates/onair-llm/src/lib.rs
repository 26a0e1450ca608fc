pub mod mock;
pub mod provider;

pub use mock::{MockProvider, MockResponse};
pub use provider::{ChatCompletionsProvider, ProviderConfig};
