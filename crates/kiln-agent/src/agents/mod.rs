//! The five generation agents
//!
//! Agents share one contract: take a typed input, report progress through an
//! [`AgentTracker`], and return an [`AgentResult`] before the context's
//! deadline. Recoverable errors become fallback output; only a missing
//! fallback makes an agent `Failed`.

mod backend;
mod frontend;
mod image;
mod plan;
mod test;

pub use backend::{BackendAgent, BackendOutput, BACKEND_ENTRYPOINT};
pub use frontend::{FrontendAgent, FrontendInput};
pub use image::{determine_image_needs, ImageAgent, ImageFeed, ImageInput, ImagePublisher};
pub use plan::PlanAgent;
pub use test::{TestAgent, TestInput};

use async_trait::async_trait;
use kiln_core::{AgentKind, AgentRun, Context, KilnConfig, Result};
use std::time::Duration;

use crate::client::GenerativeClient;
use crate::tracker::AgentTracker;
use crate::types::GenerateRequest;

/// Output of one agent invocation
#[derive(Debug, Clone)]
pub struct AgentResult<T> {
    /// `None` only when the agent Failed
    pub output: Option<T>,
    pub run: AgentRun,
}

impl<T> AgentResult<T> {
    pub fn new(output: Option<T>, tracker: AgentTracker) -> Self {
        Self {
            output,
            run: tracker.finish(),
        }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    type Input: Send;
    type Output: Send;

    fn kind(&self) -> AgentKind;

    async fn run(&self, ctx: &Context, input: Self::Input, tracker: AgentTracker) -> AgentResult<Self::Output>;
}

/// Timeouts and limits shared by the agents
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub agent_timeout: Duration,
    pub generate_timeout: Duration,
    pub image_join: Duration,
    pub max_images: usize,
    pub image_concurrency: usize,
    pub planner_model: Option<String>,
    pub code_model: Option<String>,
    pub image_model: Option<String>,
}

impl AgentSettings {
    pub fn from_config(config: &KilnConfig) -> Self {
        Self {
            agent_timeout: config.timeouts.agent(),
            generate_timeout: config.timeouts.generate(),
            image_join: config.timeouts.image_join(),
            max_images: config.images.max_images,
            image_concurrency: config.images.max_concurrency.max(1),
            planner_model: Some(config.models.planner.clone()),
            code_model: Some(config.models.code.clone()),
            image_model: config.models.image.clone(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&KilnConfig::default())
    }
}

/// One generative call bounded by the context and a per-call timeout
pub(crate) async fn generate(
    client: &dyn GenerativeClient,
    ctx: &Context,
    timeout: Duration,
    request: GenerateRequest,
) -> Result<String> {
    ctx.with_timeout(timeout).run(client.generate(request)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGenerativeClient;
    use kiln_core::KilnError;

    #[tokio::test]
    async fn test_generate_honours_timeout() {
        let client = MockGenerativeClient::new()
            .with_response(AgentKind::Plan, "{}")
            .with_delay(Duration::from_secs(5));
        let result = generate(
            &client,
            &Context::background(),
            Duration::from_millis(20),
            GenerateRequest::new(AgentKind::Plan, "", "x"),
        )
        .await;
        assert!(matches!(result, Err(KilnError::DeadlineExceeded)));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = AgentSettings::default();
        assert_eq!(settings.agent_timeout, Duration::from_secs(180));
        assert_eq!(settings.image_join, Duration::from_millis(500));
        assert_eq!(settings.max_images, 3);
    }
}
