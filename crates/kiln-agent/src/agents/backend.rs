//! Plan to backend service files

use async_trait::async_trait;
use kiln_core::{AgentKind, Context, Plan};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::{generate, Agent, AgentResult, AgentSettings};
use crate::client::GenerativeClient;
use crate::parser;
use crate::templates::{render, TemplateKind, TemplateLibrary};
use crate::tracker::AgentTracker;
use crate::types::GenerateRequest;

pub const BACKEND_ENTRYPOINT: &str = "backend/server.py";
const REQUIREMENTS_PATH: &str = "backend/requirements.txt";
const REQUIREMENTS: &str = "fastapi\nuvicorn[standard]\npydantic\n";

const SYSTEM_PROMPT: &str = "You are an expert backend developer. Generate a complete FastAPI \
backend with async handlers, CORS middleware, Pydantic models, input validation and a health \
check endpoint. Return only the Python code.";

/// Files produced by the backend agent; empty when no backend is needed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackendOutput {
    pub files: BTreeMap<String, String>,
}

impl BackendOutput {
    fn with_entrypoint(code: String) -> Self {
        let mut files = BTreeMap::new();
        files.insert(BACKEND_ENTRYPOINT.to_string(), code);
        files.insert(REQUIREMENTS_PATH.to_string(), REQUIREMENTS.to_string());
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Generates the backend service when the plan asks for one
pub struct BackendAgent {
    client: Arc<dyn GenerativeClient>,
    templates: Arc<dyn TemplateLibrary>,
    settings: AgentSettings,
}

impl BackendAgent {
    pub fn new(
        client: Arc<dyn GenerativeClient>,
        templates: Arc<dyn TemplateLibrary>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            client,
            templates,
            settings,
        }
    }

    fn prompt(plan: &Plan) -> String {
        let requirements = plan
            .backend_requirements
            .as_ref()
            .and_then(|r| serde_json::to_string_pretty(r).ok())
            .unwrap_or_else(|| "{}".to_string());
        format!(
            "Project: {}\nDescription: {}\nBackend requirements:\n{}\n\nGenerate the complete backend with all endpoints and models.",
            plan.project_name, plan.description, requirements
        )
    }
}

#[async_trait]
impl Agent for BackendAgent {
    type Input = Arc<Plan>;
    type Output = BackendOutput;

    fn kind(&self) -> AgentKind {
        AgentKind::Backend
    }

    #[instrument(skip_all, fields(agent = "backend"))]
    async fn run(&self, ctx: &Context, plan: Arc<Plan>, mut tracker: AgentTracker) -> AgentResult<BackendOutput> {
        tracker.thinking(10, "Checking backend requirements");

        if !plan.needs_backend {
            tracker.mark_skipped();
            tracker.complete("No backend required for this project");
            return AgentResult::new(Some(BackendOutput::default()), tracker);
        }

        let ctx = ctx.with_timeout(self.settings.agent_timeout);
        tracker.working(40, "Designing API endpoints");

        let request = GenerateRequest::new(AgentKind::Backend, SYSTEM_PROMPT, Self::prompt(&plan))
            .with_model(self.settings.code_model.clone());

        let reason = match generate(self.client.as_ref(), &ctx, self.settings.generate_timeout, request).await {
            Ok(raw) => {
                let code = parser::extract_code(&raw, "python");
                if !code.is_empty() {
                    info!(chars = code.len(), "backend generated");
                    tracker.complete("Backend API generated");
                    return AgentResult::new(Some(BackendOutput::with_entrypoint(code)), tracker);
                }
                "response contained no code".to_string()
            }
            Err(e) => e.to_string(),
        };

        warn!("backend generation unusable: {}", reason);
        match self.templates.lookup(TemplateKind::BackendStub) {
            Some(template) => {
                let code = render(&template, &[("project_name", plan.project_name.as_str())]);
                tracker.mark_fallback();
                tracker.complete(format!("Using backend stub ({})", reason));
                AgentResult::new(Some(BackendOutput::with_entrypoint(code)), tracker)
            }
            None => {
                tracker.fail(format!("no backend template available after: {}", reason));
                AgentResult::new(None, tracker)
            }
        }
    }
}
