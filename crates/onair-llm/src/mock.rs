use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use onair_core::errors::CompletionError;
use onair_core::provider::{ChatMessage, CompletionOptions, CompletionProvider};

/// Pre-programmed responses for deterministic testing without API calls.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Return this text as the completion.
    Text(String),
    /// Fail the call.
    Error(CompletionError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Panic inside `complete`. Exercises panic isolation in callers.
    Panic(String),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Convenience: wrap any response with a delay.
    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence.
///
/// Once the script is exhausted, calls get the fallback response if one is
/// set, otherwise an `InvalidRequest` error.
pub struct MockProvider {
    script: Mutex<VecDeque<MockResponse>>,
    fallback: Option<MockResponse>,
    call_count: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            fallback: None,
            call_count: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every call with `text`.
    pub fn always(text: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(MockResponse::text(text))
    }

    pub fn with_fallback(mut self, response: MockResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().clone()
    }

    fn next_response(&self, idx: usize) -> Result<MockResponse, CompletionError> {
        if let Some(r) = self.script.lock().pop_front() {
            return Ok(r);
        }
        self.fallback.clone().ok_or_else(|| {
            CompletionError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            ))
        })
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(messages.to_vec());
        let response = self.next_response(idx)?;
        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<String, CompletionError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Text(text) => return Ok(text),
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
            MockResponse::Panic(reason) => panic!("{reason}"),
        }
    }
}
