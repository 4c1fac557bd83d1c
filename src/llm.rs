use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::LlmConfig;

/// Why a completion produced no answer. The `Display` text is what the user sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("Error: {status} - {body}")]
    Status { status: u16, body: String },
    #[error("An error occurred: {0}")]
    Transport(String),
}

pub type Completion = Result<String, CompletionError>;

/// Collapse a completion into the text delivered to the user.
pub fn render_completion(completion: Completion) -> String {
    match completion {
        Ok(text) => text,
        Err(e) => e.to_string(),
    }
}

/// Anything that can turn a single prompt into a completion.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, prompt: &str, model: &str) -> Completion;

    async fn get_completion(&self, prompt: &str, model: &str) -> String {
        render_completion(self.complete(prompt, model).await)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    async fn request(&self, prompt: &str, model: &str) -> Completion {
        let request = ChatRequest {
            model,
            messages: vec![ChatMessage::user(prompt)],
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        debug!("Sending request to OpenRouter: {} (model {})", url, model);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Transport(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CompletionError::Transport("No choices in OpenRouter response".into()))?
            .message
            .content
            .ok_or_else(|| CompletionError::Transport("No content in OpenRouter response".into()))
    }
}

#[async_trait]
impl Completer for LlmClient {
    async fn complete(&self, prompt: &str, model: &str) -> Completion {
        let completion = self.request(prompt, model).await;
        if let Err(e) = &completion {
            warn!("Completion with model {} failed: {}", model, e);
        }
        completion
    }
}
