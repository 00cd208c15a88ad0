//! Translation through an OpenAI-compatible chat completions endpoint.

use super::{ContextTag, PromptTemplate, Translator};
use crate::config::Config;
use crate::error::{DocError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);

const SYSTEM_PROMPT: &str =
    "You are a professional technical translator. You preserve Markdown structure exactly.";

/// Gateway to the external AI translation service.
pub struct AiGateway {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f64,
    max_prompt_length: usize,
    retry_attempts: u32,
    retry_delay: Duration,
    timeout: Duration,
    prompt: PromptTemplate,
}

impl AiGateway {
    /// Create a gateway, reading the API key from the configured environment variable.
    pub fn from_env(config: &Config) -> Result<Self> {
        let var = &config.integration.api_key_env;
        let api_key = std::env::var(var).map_err(|_| {
            DocError::Config(format!(
                "{} not set. Export the translation API key with: export {}=...",
                var, var
            ))
        })?;
        Self::new(config, api_key)
    }

    pub fn new(config: &Config, api_key: impl Into<String>) -> Result<Self> {
        let timeout = config.translation_timeout();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.integration.endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.integration.model.clone(),
            temperature: config.integration.temperature,
            max_prompt_length: config.integration.max_prompt_length,
            retry_attempts: config
                .performance
                .retry_attempts
                .clamp(1, crate::config::MAX_RETRY_ATTEMPTS),
            retry_delay: config.retry_delay(),
            timeout,
            prompt: PromptTemplate::from_config(config),
        })
    }

    /// Point at a different base URL (e.g. a local proxy).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn check_length(&self, content: &str) -> Result<()> {
        let length = content.chars().count();
        if length > self.max_prompt_length {
            return Err(DocError::InputTooLarge {
                length,
                limit: self.max_prompt_length,
            });
        }
        Ok(())
    }

    async fn call_api(&self, prompt: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DocError::Transport(format!(
                        "request timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    DocError::Transport(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        debug!("Translation API response status: {}", status);
        let body = response
            .text()
            .await
            .map_err(|e| DocError::Transport(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| DocError::InvalidResponse(format!("unparseable response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(DocError::InvalidResponse(error.message));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(DocError::InvalidResponse("empty translation".to_string()));
        }
        Ok(content)
    }

    /// Bounded exponential backoff on retryable kinds only.
    async fn call_with_retry(&self, prompt: &str) -> Result<String> {
        let mut last_error = None;

        for attempt in 0..self.retry_attempts {
            if attempt > 0 {
                let delay = backoff_delay(self.retry_delay, attempt);
                debug!("Retry attempt {} after {:?}", attempt, delay);
                tokio::time::sleep(delay).await;
            }

            match self.call_api(prompt).await {
                Ok(content) => return Ok(content),
                Err(e) if e.is_retryable() => {
                    warn!("Attempt {} failed: {}", attempt + 1, e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| DocError::Transport("no attempts made".to_string())))
    }
}

/// Delay before retry `attempt` (1-based): base doubled per attempt, capped.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}

fn classify_status(status: StatusCode, body: &str) -> DocError {
    let detail = serde_json::from_str::<ChatResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .map(|e| e.message)
        .unwrap_or_else(|| body.chars().take(200).collect());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DocError::Unauthorized(format!("{}: {}", status, detail))
        }
        StatusCode::TOO_MANY_REQUESTS => DocError::RateLimited(format!("{}: {}", status, detail)),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            DocError::Transport(format!("{}: {}", status, detail))
        }
        s if s.is_server_error() => DocError::Transport(format!("{}: {}", status, detail)),
        _ => DocError::InvalidResponse(format!("{}: {}", status, detail)),
    }
}

#[async_trait]
impl Translator for AiGateway {
    async fn translate(&self, content: &str, context: Option<ContextTag>) -> Result<String> {
        self.check_length(content)?;
        let prompt = self.prompt.render(content, context);
        debug!(
            "Translating {} chars (context: {:?})",
            content.chars().count(),
            context
        );
        self.call_with_retry(&prompt).await
    }

    async fn translate_reverse(&self, content: &str) -> Result<String> {
        self.check_length(content)?;
        let prompt = self.prompt.render_reverse(content);
        self.call_with_retry(&prompt).await
    }

    fn supports_reverse(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "openai-compatible"
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f64,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Option<Vec<ChatChoice>>,
    error: Option<ApiError>,
}

#[derive(Deserialize, Debug)]
struct ChatChoice {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize, Debug)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiError {
    message: String,
}
