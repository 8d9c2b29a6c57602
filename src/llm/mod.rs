//! Reasoning backend interface and OpenAI-compatible client
//!
//! The backend is an opaque prompt-in/text-out collaborator. One call per
//! decision cycle, no automatic retry: a failed call ends the cycle and the
//! next wake tries again, which bounds spend against the external service.

use crate::config::LlmSettings;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    /// Single completion round trip; errors propagate to the caller
    async fn complete(
        &self,
        system_instruction: &str,
        context_text: &str,
        temperature: f32,
    ) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// Chat-completions client for any OpenAI-compatible endpoint
pub struct OpenAiBackend {
    api_key: String,
    client: reqwest::Client,
    settings: LlmSettings,
}

impl OpenAiBackend {
    pub fn new(api_key: String, settings: LlmSettings) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
            settings,
        }
    }
}

#[async_trait]
impl ReasoningBackend for OpenAiBackend {
    async fn complete(
        &self,
        system_instruction: &str,
        context_text: &str,
        temperature: f32,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.settings.model.clone(),
            max_tokens: self.settings.max_tokens,
            temperature,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: system_instruction.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: context_text.to_string(),
                },
            ],
        };

        let response = self
            .client
            .post(&self.settings.api_url)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("Reasoning API error {}: {}", status, body).into());
        }

        let chat: ChatResponse = response.json().await?;
        let text = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or("Reasoning API returned no choices")?;

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_for(url: String) -> OpenAiBackend {
        let settings = LlmSettings {
            api_url: url,
            ..LlmSettings::default()
        };
        OpenAiBackend::new("test-key".to_string(), settings)
    }

    #[tokio::test]
    async fn test_complete_extracts_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"content":"{\"action\":{\"type\":\"WAIT\"}}"}}]}"#,
            )
            .create_async()
            .await;

        let backend = backend_for(server.url() + "/");
        let text = backend.complete("system", "context", 0.1).await.unwrap();

        assert!(text.contains("WAIT"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_propagates_without_retry() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/")
            .with_status(429)
            .with_body("rate limited")
            .expect(1) // exactly one attempt, never retried
            .create_async()
            .await;

        let backend = backend_for(server.url() + "/");
        let err = backend.complete("system", "context", 0.1).await.unwrap_err();

        assert!(err.to_string().contains("429"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let backend = backend_for(server.url() + "/");
        assert!(backend.complete("system", "context", 0.1).await.is_err());
    }
}
