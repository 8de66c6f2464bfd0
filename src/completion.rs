//! Chat completion client for OpenAI-compatible endpoints

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::credential::Credential;
use crate::{Error, Result};

/// Produces one assistant reply for a conversation history
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Send the full history and return the assistant's reply text
    ///
    /// # Errors
    ///
    /// Returns error on network failure, non-2xx status, or a body without
    /// a usable first choice
    async fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// Client for `POST {base_url}/chat/completions`
pub struct OpenAiChatClient {
    client: Client,
    credential: Credential,
    endpoint: String,
    model: String,
}

impl OpenAiChatClient {
    /// Create a client against `base_url` (e.g. `https://api.openai.com/v1`)
    #[must_use]
    pub fn new(base_url: &str, model: String, credential: Credential) -> Self {
        Self {
            client: Client::new(),
            credential,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
        }
    }

    /// Model identifier sent with each request
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatCompletion for OpenAiChatClient {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        let authorization = self.credential.bearer()?;

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
        };

        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", authorization)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "chat completion request failed");
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat completion API error");
            return Err(Error::Completion(format!("API error {status}: {body}")));
        }

        let body = response.text().await?;
        let reply = parse_reply(&body)?;

        tracing::info!(reply_chars = reply.len(), "chat completion received");
        Ok(reply)
    }
}

/// Extract the first choice's message content from a response body
fn parse_reply(body: &str) -> Result<String> {
    let result: ChatCompletionResponse = serde_json::from_str(body).map_err(|e| {
        tracing::error!(error = %e, "failed to parse chat completion response");
        Error::Completion(format!("malformed response: {e}"))
    })?;

    result
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::Completion("response contained no message content".to_string()))
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
