use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://router.huggingface.co/v1";
pub const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CompletionError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client (Hugging Face router by default).
#[derive(Debug, Clone)]
pub struct HttpCompletionService {
    http: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl HttpCompletionService {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.into())
    }

    /// Point the client at another endpoint (self-hosted gateways, mock servers).
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, CompletionError> {
        self.http = Client::builder().timeout(timeout).build()?;
        Ok(self)
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    #[tracing::instrument(skip(self, prompt), fields(model = %self.model, prompt_len = prompt.len()))]
    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            max_tokens,
            temperature,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(CompletionError::RateLimited { retry_after });
        }

        if status >= 400 {
            let body = response.text().await.unwrap_or_else(|_| "(no body)".into());
            return Err(CompletionError::Api {
                status,
                message: body,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::InvalidResponse(format!("failed to parse response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| CompletionError::InvalidResponse("response has no message content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn reply(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn client_creation() {
        let client = HttpCompletionService::new("token".into(), DEFAULT_MODEL.into());
        assert_eq!(client.base_url, DEFAULT_BASE_URL);

        let client = HttpCompletionService::with_base_url(
            "token".into(),
            "m".into(),
            "http://localhost:8080/v1/".into(),
        );
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn sends_chat_request_and_returns_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-token")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "test-model",
                "max_tokens": 200,
                "messages": [{ "role": "user", "content": "Say FOOD" }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(reply("FOOD"))
            .create_async()
            .await;

        let client =
            HttpCompletionService::with_base_url("test-token".into(), "test-model".into(), server.url());
        let text = client.generate("Say FOOD", 200, 0.1).await.unwrap();

        assert_eq!(text, "FOOD");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_is_reported() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("retry-after", "30")
            .create_async()
            .await;

        let client = HttpCompletionService::with_base_url("t".into(), "m".into(), server.url());
        let err = client.generate("hi", 10, 0.1).await.unwrap_err();
        assert!(matches!(err, CompletionError::RateLimited { retry_after: Some(30) }));
    }

    #[tokio::test]
    async fn error_status_carries_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid token")
            .create_async()
            .await;

        let client = HttpCompletionService::with_base_url("t".into(), "m".into(), server.url());
        let err = client.generate("hi", 10, 0.1).await.unwrap_err();
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().contains("invalid token"));
    }

    #[tokio::test]
    async fn empty_choices_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let client = HttpCompletionService::with_base_url("t".into(), "m".into(), server.url());
        let err = client.generate("hi", 10, 0.1).await.unwrap_err();
        assert!(matches!(err, CompletionError::InvalidResponse(_)));
    }
}
