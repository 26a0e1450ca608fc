use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use onair_core::errors::CompletionError;
use onair_core::provider::{ChatMessage, CompletionOptions, CompletionProvider};

const COMPLETIONS_PATH: &str = "/v1/chat/completions";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Upstream error bodies are cut to this many chars before they reach logs
/// and transcript lines.
pub const ERROR_BODY_LIMIT: usize = 400;

/// Connection details for an OpenAI-compatible completion endpoint.
pub struct ProviderConfig {
    pub base_url: String,
    pub token: SecretString,
    pub model: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Non-streaming chat-completions client.
pub struct ChatCompletionsProvider {
    client: Client,
    endpoint: String,
    token: SecretString,
    model: String,
    timeout: Duration,
}

impl ChatCompletionsProvider {
    pub fn new(config: ProviderConfig) -> Result<Self, CompletionError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CompletionError::NetworkError(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}{}",
                config.base_url.trim_end_matches('/'),
                COMPLETIONS_PATH
            ),
            token: config.token,
            model: config.model,
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, messages: &[ChatMessage], options: &CompletionOptions) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        })
    }

    fn classify_send_error(&self, e: reqwest::Error) -> CompletionError {
        if e.is_timeout() {
            CompletionError::Timeout(self.timeout)
        } else {
            CompletionError::NetworkError(e.to_string())
        }
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "openclaw"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, messages = messages.len()))]
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, CompletionError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.token.expose_secret())
            .header("accept", "application/json")
            .timeout(self.timeout)
            .json(&self.request_body(messages, options))
            .send()
            .await
            .map_err(|e| self.classify_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::from_status(
                status.as_u16(),
                truncate_chars(&body, ERROR_BODY_LIMIT),
            ));
        }

        let payload: Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                CompletionError::Timeout(self.timeout)
            } else {
                CompletionError::InvalidResponse(e.to_string())
            }
        })?;

        let content = extract_content(&payload)?;
        debug!(chars = content.chars().count(), "completion received");
        Ok(content)
    }
}

/// Pull the generated text out of a chat-completions response:
/// `choices[0].message.content`, falling back to `choices[0].text`.
pub fn extract_content(payload: &Value) -> Result<String, CompletionError> {
    let choice = payload
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| CompletionError::InvalidResponse("response has no choices".into()))?;

    let content = choice
        .pointer("/message/content")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| choice.get("text").and_then(Value::as_str))
        .map(str::trim)
        .unwrap_or_default();

    if content.is_empty() {
        return Err(CompletionError::EmptyCompletion);
    }
    Ok(content.to_string())
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;

    use super::*;

    #[derive(Clone)]
    struct Stub {
        status: StatusCode,
        body: String,
        delay: Duration,
        seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn handle(
        State(stub): State<Stub>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, String) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        stub.seen.lock().push((auth, body));
        tokio::time::sleep(stub.delay).await;
        (stub.status, stub.body.clone())
    }

    async fn spawn_stub(stub: Stub) -> String {
        let app = Router::new()
            .route("/v1/chat/completions", post(handle))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn stub(status: StatusCode, body: impl Into<String>) -> Stub {
        Stub {
            status,
            body: body.into(),
            delay: Duration::ZERO,
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn provider_for(base_url: String, timeout: Duration) -> ChatCompletionsProvider {
        ChatCompletionsProvider::new(ProviderConfig {
            base_url,
            token: SecretString::from("tok-123"),
            model: "openai/gpt-4o-mini".into(),
            timeout,
        })
        .unwrap()
    }

    fn prompt() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are generating a live multi-agent radio show."),
            ChatMessage::user("Write the next line as AGENT_B."),
        ]
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let p = provider_for("https://claw.example/".into(), Duration::from_secs(1));
        assert_eq!(p.endpoint(), "https://claw.example/v1/chat/completions");
        assert_eq!(p.model(), "openai/gpt-4o-mini");
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = ProviderConfig {
            base_url: "https://claw.example".into(),
            token: SecretString::from("tok-123"),
            model: "m".into(),
            timeout: Duration::from_secs(1),
        };
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("tok-123"));
    }

    #[test]
    fn extract_prefers_message_content() {
        let payload = json!({"choices": [{"message": {"content": "  On air! (turn 1) "}, "text": "other"}]});
        assert_eq!(extract_content(&payload).unwrap(), "On air! (turn 1)");
    }

    #[test]
    fn extract_falls_back_to_text() {
        let payload = json!({"choices": [{"text": "legacy line"}]});
        assert_eq!(extract_content(&payload).unwrap(), "legacy line");
    }

    #[test]
    fn extract_empty_and_missing() {
        assert!(matches!(
            extract_content(&json!({"choices": [{"message": {"content": "   "}}]})),
            Err(CompletionError::EmptyCompletion)
        ));
        assert!(matches!(
            extract_content(&json!({"choices": []})),
            Err(CompletionError::InvalidResponse(_))
        ));
    }

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 400), "hi");
    }

    #[tokio::test]
    async fn sends_bearer_and_body() {
        let s = stub(
            StatusCode::OK,
            json!({"choices": [{"message": {"content": "Coming up next. (turn 2)"}}]}).to_string(),
        );
        let seen = s.seen.clone();
        let p = provider_for(spawn_stub(s).await, Duration::from_secs(5));

        let out = p
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "Coming up next. (turn 2)");

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer tok-123"));
        assert_eq!(body["model"], "openai/gpt-4o-mini");
        assert_eq!(body["max_tokens"], 140);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn non_success_is_classified_and_truncated() {
        let long_body = "x".repeat(1000);
        let p = provider_for(
            spawn_stub(stub(StatusCode::BAD_GATEWAY, long_body)).await,
            Duration::from_secs(5),
        );
        let err = p
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap_err();
        match err {
            CompletionError::ServerError { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), ERROR_BODY_LIMIT);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_failure() {
        let p = provider_for(
            spawn_stub(stub(StatusCode::UNAUTHORIZED, "bad token")).await,
            Duration::from_secs(5),
        );
        let err = p
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn empty_completion_is_an_error() {
        let p = provider_for(
            spawn_stub(stub(
                StatusCode::OK,
                json!({"choices": [{"message": {"content": ""}}]}).to_string(),
            ))
            .await,
            Duration::from_secs(5),
        );
        let err = p
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::EmptyCompletion));
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let mut s = stub(StatusCode::OK, "{}");
        s.delay = Duration::from_secs(2);
        let p = provider_for(spawn_stub(s).await, Duration::from_millis(100));
        let err = p
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Timeout(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_host_is_network_error() {
        let p = provider_for("http://127.0.0.1:1".into(), Duration::from_secs(2));
        let err = p
            .complete(&prompt(), &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::NetworkError(_)), "got {err:?}");
    }
}
