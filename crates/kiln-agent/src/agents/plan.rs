//! Prompt to project plan

use async_trait::async_trait;
use kiln_core::{AgentKind, Context, Plan};
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{generate, Agent, AgentResult, AgentSettings};
use crate::client::GenerativeClient;
use crate::parser;
use crate::tracker::AgentTracker;
use crate::types::GenerateRequest;

const SYSTEM_PROMPT: &str = r##"You are a senior software architect and UX designer.
Analyze the website request and return a project plan as a single JSON object:
{
  "project_name": "Descriptive name",
  "tagline": "One-line summary",
  "description": "Two or three sentences on purpose and value",
  "type": "landing_page|webapp|ecommerce|blog|portfolio|saas",
  "pages": [{"name": "home", "purpose": "...", "sections": ["hero", "features", "cta"]}],
  "features": [{"name": "...", "description": "...", "priority": "critical|high|medium"}],
  "needs_backend": true,
  "backend_requirements": {"endpoints": ["POST /api/contact"], "database_collections": [], "authentication": false},
  "color_scheme": {"primary": "#hex", "secondary": "#hex", "accent": "#hex", "background": "#hex", "text": "#hex", "theme": "modern"},
  "image_requirements": [{"type": "hero", "description": "...", "dimensions": "1920x1080", "style": "..."}]
}
Return only the JSON."##;

/// Turns the user's prompt into a [`Plan`]
///
/// Always yields a plan: unparseable or failed generation produces
/// [`Plan::fallback`].
pub struct PlanAgent {
    client: Arc<dyn GenerativeClient>,
    settings: AgentSettings,
}

impl PlanAgent {
    pub fn new(client: Arc<dyn GenerativeClient>, settings: AgentSettings) -> Self {
        Self { client, settings }
    }
}

#[async_trait]
impl Agent for PlanAgent {
    type Input = String;
    type Output = Plan;

    fn kind(&self) -> AgentKind {
        AgentKind::Plan
    }

    #[instrument(skip_all, fields(agent = "plan"))]
    async fn run(&self, ctx: &Context, prompt: String, mut tracker: AgentTracker) -> AgentResult<Plan> {
        let ctx = ctx.with_timeout(self.settings.agent_timeout);
        tracker.thinking(15, "Analyzing requirements and creating architecture");

        let request = GenerateRequest::new(AgentKind::Plan, SYSTEM_PROMPT, format!("Website request: {}", prompt))
            .with_model(self.settings.planner_model.clone());

        tracker.working(40, "Drafting project plan");
        let outcome = generate(self.client.as_ref(), &ctx, self.settings.generate_timeout, request).await;

        let reason = match outcome {
            Ok(raw) => match parser::parse::<Plan>(&raw) {
                Some(plan) => {
                    tracker.working(90, format!("Planned {} page(s)", plan.pages.len().max(1)));
                    info!(project = %plan.project_name, kind = %plan.project_type, "plan ready");
                    tracker.complete(format!("Plan ready: {}", plan.project_name));
                    return AgentResult::new(Some(plan), tracker);
                }
                None => {
                    warn!("plan response was not valid JSON, using fallback");
                    "response was not a valid plan".to_string()
                }
            },
            Err(e) => {
                warn!("plan generation failed, using fallback: {}", e);
                e.to_string()
            }
        };

        tracker.mark_fallback();
        let fallback = Plan::fallback(&prompt);
        tracker.complete(format!("Using basic plan ({})", reason));
        AgentResult::new(Some(fallback), tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGenerativeClient;
    use kiln_core::plan::ProjectType;
    use kiln_core::{AgentStatus, BuildId, EventBus};
    use std::time::Duration;

    fn tracker() -> AgentTracker {
        AgentTracker::new(BuildId::new(), AgentKind::Plan, Arc::new(EventBus::default()))
    }

    #[tokio::test]
    async fn test_parses_generated_plan() {
        let client = Arc::new(MockGenerativeClient::new().with_response(
            AgentKind::Plan,
            "Here you go:\n{\"project_name\": \"Sunrise Bakery\", \"type\": \"landing_page\", \"needs_backend\": false}",
        ));
        let agent = PlanAgent::new(client, AgentSettings::default());

        let result = agent
            .run(&Context::background(), "bakery site".to_string(), tracker())
            .await;
        let plan = result.output.unwrap();
        assert_eq!(plan.project_name, "Sunrise Bakery");
        assert_eq!(plan.project_type, ProjectType::LandingPage);
        assert!(!result.run.used_fallback);
        assert_eq!(result.run.status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn test_falls_back_on_error() {
        let agent = PlanAgent::new(Arc::new(MockGenerativeClient::failing()), AgentSettings::default());
        let result = agent
            .run(&Context::background(), "simple landing page".to_string(), tracker())
            .await;

        let plan = result.output.unwrap();
        assert_eq!(plan.pages.len(), 1);
        assert!(result.run.used_fallback);
        assert_eq!(result.run.status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn test_falls_back_on_garbage() {
        let client = Arc::new(MockGenerativeClient::new().with_response(AgentKind::Plan, "{\"project_name\": "));
        let agent = PlanAgent::new(client, AgentSettings::default());
        let result = agent
            .run(&Context::background(), "portfolio".to_string(), tracker())
            .await;
        assert!(result.run.used_fallback);
        assert!(result.output.is_some());
    }

    #[tokio::test]
    async fn test_truncated_plan_falls_back() {
        let raw = r##"{"project_name": "Acme Store", "type": "ecommerce", "needs_backend": true, "color_scheme": {"primary": "#112233"}, "pages": [{"name": "home"}"##;
        let client = Arc::new(MockGenerativeClient::new().with_response(AgentKind::Plan, raw));
        let agent = PlanAgent::new(client, AgentSettings::default());
        let result = agent
            .run(&Context::background(), "acme store".to_string(), tracker())
            .await;

        assert!(result.run.used_fallback);
        let plan = result.output.unwrap();
        assert_eq!(plan.project_name, "Acme Store");
    }

    #[tokio::test]
    async fn test_returns_within_deadline() {
        let client = Arc::new(
            MockGenerativeClient::new()
                .with_response(AgentKind::Plan, "{}")
                .with_delay(Duration::from_secs(30)),
        );
        let settings = AgentSettings {
            agent_timeout: Duration::from_millis(50),
            ..AgentSettings::default()
        };
        let agent = PlanAgent::new(client, settings);

        let started = std::time::Instant::now();
        let result = agent
            .run(&Context::background(), "blog".to_string(), tracker())
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(result.output.is_some());
        assert!(result.run.used_fallback);
    }
}
