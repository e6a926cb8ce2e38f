mod client;
pub(crate) mod types;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::AiError;
use crate::traits::{ChatAgent, Message};
use client::OpenAiClient;
use types::{ChatRequest, WireMessage};

// =============================================================================
// OpenAi Agent
// =============================================================================

/// Agent for any OpenAI-compatible `/chat/completions` endpoint (OpenAI,
/// DashScope compatible-mode, vLLM...).
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    base_url: Option<String>,
    /// Cleared the first time the endpoint rejects `response_format`; shared
    /// between clones so the downgrade sticks for the whole run.
    json_mode_supported: Arc<AtomicBool>,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
            json_mode_supported: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Start with JSON mode disabled (prompt-only JSON constraint).
    pub fn without_json_mode(self) -> Self {
        self.json_mode_supported.store(false, Ordering::Relaxed);
        self
    }

    /// Get the model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Get the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn json_mode_supported(&self) -> bool {
        self.json_mode_supported.load(Ordering::Relaxed)
    }

    pub(crate) fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    fn request(&self, messages: &[Message], json_mode: bool) -> ChatRequest {
        let mut request = ChatRequest::new(&self.model)
            .messages(messages.iter().cloned().map(WireMessage::from));
        if json_mode {
            request = request.json_object();
        }
        request
    }
}

// =============================================================================
// ChatAgent Implementation
// =============================================================================

#[async_trait]
impl ChatAgent for OpenAi {
    async fn chat(&self, messages: Vec<Message>, json_mode: bool) -> Result<String, AiError> {
        let client = self.client();
        let use_json = json_mode && self.json_mode_supported();

        let response = match client.chat(&self.request(&messages, use_json)).await {
            Err(e) if use_json && e.rejects_response_format() => {
                warn!(
                    model = %self.model,
                    "Endpoint rejected response_format, falling back to prompt-only JSON"
                );
                self.json_mode_supported.store(false, Ordering::Relaxed);
                client.chat(&self.request(&messages, false)).await?
            }
            other => other?,
        };

        response.first_text().ok_or(AiError::EmptyResponse)
    }
}
