use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::CompletionClient;
use crate::error::{DeframeError, Result};

/// Completion client for an OpenAI-compatible chat endpoint (OpenAI, LM Studio, Ollama...)
pub struct RemoteCompletionClient {
    api_url: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
    client: reqwest::Client,
}

impl RemoteCompletionClient {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            model: model.into(),
            timeout: Duration::from_secs(60),
            max_tokens: None,
            temperature: None,
            client: reqwest::Client::new(),
        }
    }

    /// Bearer token; local servers usually run without one.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_defaults(
        mut self,
        timeout_secs: u64,
        max_tokens: Option<usize>,
        temperature: Option<f32>,
    ) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionClient for RemoteCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let req_body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let mut request = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .json(&req_body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        // The timeout covers the whole exchange: a model that stalls mid-body counts too.
        let exchange = async {
            let response = request
                .send()
                .await
                .map_err(|e| DeframeError::Completion(format!("HTTP request failed: {}", e)))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(DeframeError::Completion(format!("API error {}: {}", status, body)));
            }

            response
                .json::<ChatResponse>()
                .await
                .map_err(|e| DeframeError::Completion(format!("failed to parse response: {}", e)))
        };

        let resp_body = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| DeframeError::Completion(format!("request timed out after {:?}", self.timeout)))??;

        let choice = resp_body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DeframeError::Completion("response has no choices".to_string()))?;

        if let Some(usage) = resp_body.usage {
            tracing::debug!(
                model = resp_body.model.as_deref().unwrap_or(&self.model),
                prompt_tokens = usage.prompt_tokens.unwrap_or(0),
                completion_tokens = usage.completion_tokens.unwrap_or(0),
                "completion received"
            );
        }

        choice
            .message
            .content
            .ok_or_else(|| DeframeError::Completion("response message has no content".to_string()))
    }
}

// OpenAI API request/response structures
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    /// null on refusals and tool calls
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
}
