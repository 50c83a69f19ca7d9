//! Plan and images to a single HTML document

use async_trait::async_trait;
use kiln_core::{AgentKind, Context, ImageRef, Plan};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use super::image::ImageFeed;
use super::{generate, Agent, AgentResult, AgentSettings};
use crate::client::GenerativeClient;
use crate::parser;
use crate::templates::{render, TemplateKind, TemplateLibrary};
use crate::tracker::AgentTracker;
use crate::types::GenerateRequest;

const SYSTEM_PROMPT: &str = "You are an expert frontend developer. Build a complete, responsive, \
accessible single-file website with embedded CSS and JavaScript. Use semantic HTML5, a viewport \
meta tag, a lang attribute and alt text on every image. Return only the HTML document in a \
```html fenced block.";

pub struct FrontendInput {
    pub plan: Arc<Plan>,
    pub images: ImageFeed,
    pub uploaded_images: Vec<String>,
}

/// Generates the site's `index.html`
///
/// Reads the image feed once, just before generating. Falls back to the
/// `Landing` template; fails only when that template is unavailable.
pub struct FrontendAgent {
    client: Arc<dyn GenerativeClient>,
    templates: Arc<dyn TemplateLibrary>,
    settings: AgentSettings,
}

/// Generation brief handed to the code model
struct Brief<'a> {
    plan: &'a Plan,
    images: &'a [ImageRef],
    uploaded: &'a [String],
}

impl fmt::Display for Brief<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan;
        writeln!(f, "Project: {} ({})", plan.project_name, plan.project_type)?;
        writeln!(f, "Tagline: {}", plan.tagline)?;
        writeln!(f, "Description: {}", plan.description)?;

        let colors = &plan.color_scheme;
        writeln!(
            f,
            "Colors: primary {}, secondary {}, accent {}, background {}, text {} ({} theme)",
            colors.primary, colors.secondary, colors.accent, colors.background, colors.text, colors.theme
        )?;

        if !plan.pages.is_empty() {
            writeln!(f, "\nPages:")?;
            for page in &plan.pages {
                writeln!(f, "- {}: {} [{}]", page.name, page.purpose, page.sections.join(", "))?;
            }
        }
        if !plan.features.is_empty() {
            writeln!(f, "\nFeatures:")?;
            for feature in &plan.features {
                writeln!(f, "- {}: {}", feature.name, feature.description)?;
            }
        }

        writeln!(f, "\nImages available:")?;
        for (idx, image) in self.images.iter().enumerate() {
            writeln!(f, "{}. {}: {} ({})", idx + 1, image.kind.to_uppercase(), image.url, image.description)?;
        }
        for url in self.uploaded {
            writeln!(f, "- uploaded: {}", url)?;
        }
        if self.images.is_empty() && self.uploaded.is_empty() {
            writeln!(f, "None. Use CSS gradients and patterns instead of images.")
        } else {
            writeln!(f, "Use these exact URLs in <img> tags. Do not use placeholder services.")
        }
    }
}

impl FrontendAgent {
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

    fn fallback(&self, plan: &Plan) -> Option<String> {
        let template = self.templates.lookup(TemplateKind::Landing)?;
        Some(render(
            &template,
            &[
                ("project_name", plan.project_name.as_str()),
                ("tagline", plan.tagline.as_str()),
                ("primary", plan.color_scheme.primary.as_str()),
                ("secondary", plan.color_scheme.secondary.as_str()),
            ],
        ))
    }
}

fn looks_like_html(doc: &str) -> bool {
    let lower = doc.to_lowercase();
    lower.contains("<html") && lower.contains("</html>")
}

#[async_trait]
impl Agent for FrontendAgent {
    type Input = FrontendInput;
    type Output = String;

    fn kind(&self) -> AgentKind {
        AgentKind::Frontend
    }

    #[instrument(skip_all, fields(agent = "frontend"))]
    async fn run(&self, ctx: &Context, input: FrontendInput, mut tracker: AgentTracker) -> AgentResult<String> {
        let ctx = ctx.with_timeout(self.settings.agent_timeout);
        let FrontendInput {
            plan,
            images,
            uploaded_images,
        } = input;
        tracker.thinking(10, "Designing layout and visual hierarchy");

        let images = images.snapshot(self.settings.image_join).await;
        tracker.working(
            30,
            format!("Building page with {} image(s)", images.len() + uploaded_images.len()),
        );

        let request = GenerateRequest::new(
            AgentKind::Frontend,
            SYSTEM_PROMPT,
            Brief {
                plan: &plan,
                images: &images,
                uploaded: &uploaded_images,
            }
            .to_string(),
        )
        .with_model(self.settings.code_model.clone())
        .with_max_tokens(16000);

        let reason = match generate(self.client.as_ref(), &ctx, self.settings.generate_timeout, request).await {
            Ok(raw) => {
                let html = parser::extract_code(&raw, "html");
                if looks_like_html(&html) {
                    tracker.working(90, "Polishing markup");
                    info!(chars = html.len(), "frontend generated");
                    tracker.complete(format!("Frontend generated ({} chars)", html.len()));
                    return AgentResult::new(Some(html), tracker);
                }
                "response did not contain an HTML document".to_string()
            }
            Err(e) => e.to_string(),
        };

        warn!("frontend generation unusable: {}", reason);
        match self.fallback(&plan) {
            Some(html) => {
                tracker.mark_fallback();
                tracker.complete(format!("Using landing template ({})", reason));
                AgentResult::new(Some(html), tracker)
            }
            None => {
                tracker.fail(format!("no landing template available after: {}", reason));
                AgentResult::new(None, tracker)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGenerativeClient;
    use crate::templates::BuiltinTemplates;
    use kiln_core::{AgentStatus, BuildId, EventBus};
    use std::time::Duration;

    fn tracker() -> AgentTracker {
        AgentTracker::new(BuildId::new(), AgentKind::Frontend, Arc::new(EventBus::default()))
    }

    fn input(images: ImageFeed) -> FrontendInput {
        FrontendInput {
            plan: Arc::new(Plan::fallback("sunrise bakery")),
            images,
            uploaded_images: Vec::new(),
        }
    }

    #[test]
    fn test_brief_lists_uploaded_images() {
        let plan = Plan::fallback("sunrise bakery");
        let uploaded = vec!["https://uploads/logo.png".to_string()];
        let brief = Brief {
            plan: &plan,
            images: &[],
            uploaded: &uploaded,
        }
        .to_string();

        assert!(brief.starts_with("Project: Sunrise Bakery"));
        assert!(brief.contains("- uploaded: https://uploads/logo.png"));
        assert!(brief.contains("Use these exact URLs"));
        assert!(!brief.contains("CSS gradients"));
    }

    #[tokio::test]
    async fn test_uses_generated_html() {
        let client = Arc::new(MockGenerativeClient::new().with_response(
            AgentKind::Frontend,
            "```html\n<!DOCTYPE html><html lang=\"en\"><body>Hi</body></html>\n```",
        ));
        let agent = FrontendAgent::new(client, Arc::new(BuiltinTemplates::new()), AgentSettings::default());

        let result = agent
            .run(&Context::background(), input(ImageFeed::ready(Vec::new())), tracker())
            .await;
        assert!(result.output.unwrap().starts_with("<!DOCTYPE html>"));
        assert!(!result.run.used_fallback);
    }

    #[tokio::test]
    async fn test_prompt_includes_published_images() {
        let client = Arc::new(MockGenerativeClient::failing());
        let agent = FrontendAgent::new(client.clone(), Arc::new(BuiltinTemplates::new()), AgentSettings::default());
        let feed = ImageFeed::ready(vec![ImageRef {
            url: "https://img/hero.png".to_string(),
            kind: "hero".to_string(),
            description: "bread".to_string(),
        }]);

        agent.run(&Context::background(), input(feed), tracker()).await;
        assert!(client.calls()[0].prompt.contains("https://img/hero.png"));
    }

    #[tokio::test]
    async fn test_does_not_wait_past_image_join() {
        let client = Arc::new(MockGenerativeClient::failing());
        let settings = AgentSettings {
            image_join: Duration::from_millis(20),
            ..AgentSettings::default()
        };
        let agent = FrontendAgent::new(client.clone(), Arc::new(BuiltinTemplates::new()), settings);
        let (_publisher, feed) = ImageFeed::channel();

        let started = std::time::Instant::now();
        let result = agent.run(&Context::background(), input(feed), tracker()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.output.is_some());
        assert!(client.calls()[0].prompt.contains("CSS gradients"));
    }

    #[tokio::test]
    async fn test_fallback_renders_landing_template() {
        let agent = FrontendAgent::new(
            Arc::new(MockGenerativeClient::failing()),
            Arc::new(BuiltinTemplates::new()),
            AgentSettings::default(),
        );
        let result = agent
            .run(&Context::background(), input(ImageFeed::ready(Vec::new())), tracker())
            .await;

        let html = result.output.unwrap();
        assert!(html.contains("<title>Sunrise Bakery</title>"));
        assert!(result.run.used_fallback);
        assert_eq!(result.run.status, AgentStatus::Completed);
    }

    #[tokio::test]
    async fn test_non_html_response_uses_fallback() {
        let client = Arc::new(MockGenerativeClient::new().with_response(AgentKind::Frontend, "Sorry, I can't."));
        let agent = FrontendAgent::new(client, Arc::new(BuiltinTemplates::new()), AgentSettings::default());
        let result = agent
            .run(&Context::background(), input(ImageFeed::ready(Vec::new())), tracker())
            .await;
        assert!(result.run.used_fallback);
    }

    #[tokio::test]
    async fn test_fails_without_template() {
        let agent = FrontendAgent::new(
            Arc::new(MockGenerativeClient::failing()),
            Arc::new(BuiltinTemplates::new().without(TemplateKind::Landing)),
            AgentSettings::default(),
        );
        let result = agent
            .run(&Context::background(), input(ImageFeed::ready(Vec::new())), tracker())
            .await;

        assert!(result.output.is_none());
        assert_eq!(result.run.status, AgentStatus::Failed);
        assert!(result.run.failure.unwrap().contains("no landing template"));
    }
}
