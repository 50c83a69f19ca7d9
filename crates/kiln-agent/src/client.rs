//! Generative service clients
//!
//! Every agent talks to a [`GenerativeClient`]. The shipped implementations
//! are the Anthropic Messages API client, a router that picks a client per
//! agent, and an offline client that always errors so every agent falls back.

use async_trait::async_trait;
use kiln_core::{AgentKind, KilnError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{AnthropicMessage, AnthropicRequest, AnthropicResponse, GenerateRequest, Model};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

// Retry configuration for 429 and 5xx responses
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_BACKOFF_SECS: u64 = 30;

/// A service that turns a prompt into text
#[async_trait]
pub trait GenerativeClient: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Short name for logs
    fn name(&self) -> &str {
        "generative"
    }
}

/// Anthropic Messages API client
///
/// Clones share the HTTP connection pool and the circuit breaker.
#[derive(Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: Model::resolve(model),
            base_url: ANTHROPIC_API_URL.to_string(),
            breaker: Arc::new(CircuitBreaker::default()),
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_secs(INITIAL_BACKOFF_SECS),
        }
    }

    /// Client keyed from the environment variable `key_env`
    pub fn from_env(key_env: &str, model: &str) -> Result<Self> {
        Ok(Self::new(auth::get_auth_token(key_env)?, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Arc::new(breaker);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("breaker", &self.breaker.state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GenerativeClient for AnthropicClient {
    #[instrument(skip(self, request), fields(agent = %request.agent))]
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        if request.agent == AgentKind::Image {
            return Err(KilnError::Unsupported(
                "the Messages API does not generate images".to_string(),
            ));
        }

        if !self.breaker.can_execute() {
            return Err(KilnError::ApiLimit(format!(
                "Circuit breaker is open after repeated failures. Retry in {}s",
                self.breaker.time_until_retry().as_secs()
            )));
        }

        let body = AnthropicRequest {
            model: request
                .model
                .as_deref()
                .map(Model::resolve)
                .unwrap_or_else(|| self.model.clone()),
            max_tokens: request.max_tokens,
            system: (!request.system.is_empty()).then(|| request.system.clone()),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
        };

        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            debug!("Sending request to Anthropic API (attempt {})", retries + 1);

            let response = self
                .http
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    self.breaker.record_failure();
                    KilnError::Generative(format!("Failed to send request: {}", e))
                })?;

            let status = response.status();
            let retryable = status.as_u16() == 429 || status.is_server_error();

            if retryable && retries < self.max_retries {
                retries += 1;
                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                warn!(
                    "Anthropic API returned {}. Waiting {:?} before retry {}/{}",
                    status, wait, retries, self.max_retries
                );
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(Duration::from_secs(MAX_BACKOFF_SECS));
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());

                self.breaker.record_failure();
                error!(
                    failures = self.breaker.failure_count(),
                    "Anthropic API error {}", status
                );

                return Err(if status.as_u16() == 429 {
                    KilnError::ApiLimit(format!(
                        "Rate limit exceeded after {} retries: {}",
                        self.max_retries, error_text
                    ))
                } else if status.as_u16() == 401 || status.as_u16() == 403 {
                    KilnError::Auth(format!("Anthropic API rejected credentials: {}", error_text))
                } else {
                    KilnError::Generative(format!("Anthropic API error {}: {}", status, error_text))
                });
            }

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| KilnError::Generative(format!("Failed to parse response: {}", e)))?;

            let output: String = parsed
                .content
                .iter()
                .filter(|block| block.content_type == "text")
                .map(|block| block.text.as_str())
                .collect();
            if output.is_empty() {
                return Err(KilnError::Generative("No text content in response".to_string()));
            }

            self.breaker.record_success();

            match parsed.usage {
                Some(usage) => info!(
                    chars = output.len(),
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "generation complete"
                ),
                None => info!(chars = output.len(), "generation complete"),
            }
            return Ok(output);
        }
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

/// Client that always errors, forcing every agent onto its fallback
#[derive(Debug, Clone, Default)]
pub struct OfflineClient;

#[async_trait]
impl GenerativeClient for OfflineClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        Err(KilnError::Generative(format!(
            "offline mode: no generative service for {}",
            request.agent
        )))
    }

    fn name(&self) -> &str {
        "offline"
    }
}

/// Routes each request to a client chosen by agent kind
#[derive(Clone)]
pub struct ModelRouter {
    default: Arc<dyn GenerativeClient>,
    routes: HashMap<AgentKind, Arc<dyn GenerativeClient>>,
}

impl ModelRouter {
    pub fn new(default: Arc<dyn GenerativeClient>) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    pub fn route(mut self, agent: AgentKind, client: Arc<dyn GenerativeClient>) -> Self {
        self.routes.insert(agent, client);
        self
    }

    fn client_for(&self, agent: AgentKind) -> &Arc<dyn GenerativeClient> {
        self.routes.get(&agent).unwrap_or(&self.default)
    }
}

#[async_trait]
impl GenerativeClient for ModelRouter {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let client = self.client_for(request.agent);
        debug!(agent = %request.agent, client = client.name(), "routing request");
        client.generate(request).await
    }

    fn name(&self) -> &str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGenerativeClient;

    #[tokio::test]
    async fn test_offline_always_errors() {
        let client = OfflineClient;
        let result = client
            .generate(GenerateRequest::new(AgentKind::Plan, "", "hello"))
            .await;
        assert!(matches!(result, Err(KilnError::Generative(_))));
    }

    #[tokio::test]
    async fn test_anthropic_rejects_image_requests() {
        let client = AnthropicClient::new("key", "sonnet");
        let result = client
            .generate(GenerateRequest::new(AgentKind::Image, "", "a sunrise"))
            .await;
        assert!(matches!(result, Err(KilnError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_open_breaker_short_circuits() {
        let client = AnthropicClient::new("key", "sonnet")
            .with_base_url("http://127.0.0.1:9")
            .with_breaker(CircuitBreaker::new(1, 60));
        client.breaker().record_failure();

        let result = client
            .generate(GenerateRequest::new(AgentKind::Plan, "", "hello"))
            .await;
        assert!(matches!(result, Err(KilnError::ApiLimit(_))));
    }

    #[test]
    fn test_model_hint_is_resolved() {
        let client = AnthropicClient::new("key", "haiku");
        assert_eq!(client.model(), Model::Haiku.api_name());
    }

    #[tokio::test]
    async fn test_router_dispatches_by_agent() {
        let default = Arc::new(MockGenerativeClient::new().with_default_response("default"));
        let images = Arc::new(
            MockGenerativeClient::new().with_response(AgentKind::Image, "https://img.example/1.png"),
        );
        let router = ModelRouter::new(default.clone()).route(AgentKind::Image, images.clone());

        let out = router
            .generate(GenerateRequest::new(AgentKind::Image, "", "hero"))
            .await
            .unwrap();
        assert_eq!(out, "https://img.example/1.png");

        let out = router
            .generate(GenerateRequest::new(AgentKind::Plan, "", "plan"))
            .await
            .unwrap();
        assert_eq!(out, "default");
        assert_eq!(default.call_count(), 1);
        assert_eq!(images.call_count(), 1);
    }
}
