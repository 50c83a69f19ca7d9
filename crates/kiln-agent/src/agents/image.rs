//! Plan to generated images, published through a watch channel

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use kiln_core::plan::{ImageRequirement, ProjectType};
use kiln_core::{AgentKind, Context, ImageRef, Plan};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument};

use super::{generate, Agent, AgentResult, AgentSettings};
use crate::client::GenerativeClient;
use crate::tracker::AgentTracker;
use crate::types::GenerateRequest;

/// Heuristic cap when the plan names no images
const HEURISTIC_MAX: usize = 2;

type Snapshot = Option<Arc<Vec<ImageRef>>>;

/// Write side of the image feed, held by the image agent
#[derive(Debug)]
pub struct ImagePublisher {
    tx: watch::Sender<Snapshot>,
}

impl ImagePublisher {
    pub fn publish(&self, images: Vec<ImageRef>) {
        self.tx.send_replace(Some(Arc::new(images)));
    }
}

/// Read side of the image feed
///
/// Cloned freely; every reader sees the single published list.
#[derive(Debug, Clone)]
pub struct ImageFeed {
    rx: watch::Receiver<Snapshot>,
}

impl ImageFeed {
    pub fn channel() -> (ImagePublisher, ImageFeed) {
        let (tx, rx) = watch::channel(None);
        (ImagePublisher { tx }, ImageFeed { rx })
    }

    /// A feed that already holds `images`
    pub fn ready(images: Vec<ImageRef>) -> Self {
        let (publisher, feed) = Self::channel();
        publisher.publish(images);
        feed
    }

    /// The published images, waiting at most `wait` for them
    ///
    /// Empty when nothing is published in time or the publisher is dropped.
    pub async fn snapshot(&self, wait: Duration) -> Vec<ImageRef> {
        let mut rx = self.rx.clone();
        let published = tokio::time::timeout(wait, rx.wait_for(Option::is_some)).await;
        match published {
            Ok(Ok(value)) => value.as_deref().cloned().unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}

pub struct ImageInput {
    pub plan: Arc<Plan>,
    pub publisher: ImagePublisher,
}

/// Images to request when the plan lists none
pub fn determine_image_needs(plan: &Plan) -> Vec<ImageRequirement> {
    let mut needs = vec![ImageRequirement {
        kind: "hero".to_string(),
        description: format!(
            "Professional hero image for {}, a {}. {} Modern, engaging, high-impact visual.",
            plan.project_name, plan.project_type, plan.description
        ),
        dimensions: Some("1920x1080".to_string()),
        style: Some("modern, professional, high-quality".to_string()),
    }];

    if matches!(
        plan.project_type,
        ProjectType::Ecommerce | ProjectType::Saas | ProjectType::Webapp
    ) {
        needs.push(ImageRequirement {
            kind: "feature".to_string(),
            description: format!(
                "Feature showcase image for {}, highlighting key functionality. Clean interface, modern design.",
                plan.project_name
            ),
            dimensions: Some("1200x800".to_string()),
            style: Some("UI focused, clean, modern".to_string()),
        });
    }

    if plan.project_type == ProjectType::Ecommerce {
        needs.push(ImageRequirement {
            kind: "product".to_string(),
            description: format!(
                "Product presentation image for the {} store. Product photography style, clean background.",
                plan.project_name
            ),
            dimensions: Some("1000x1000".to_string()),
            style: Some("product photography, clean".to_string()),
        });
    }

    needs.truncate(HEURISTIC_MAX);
    needs
}

fn mood(project_type: ProjectType) -> &'static str {
    match project_type {
        ProjectType::Ecommerce => "inviting, trustworthy, professional",
        ProjectType::Saas => "innovative, tech-forward, modern",
        ProjectType::Portfolio => "creative, artistic, inspiring",
        ProjectType::Blog => "engaging, authentic, relatable",
        ProjectType::LandingPage => "compelling, dynamic, action-oriented",
        ProjectType::Webapp => "clean, functional, user-friendly",
        ProjectType::Other => "professional, modern, engaging",
    }
}

fn image_prompt(requirement: &ImageRequirement, plan: &Plan) -> String {
    format!(
        "{}\n\nStyle: {}, clean, high-quality\nTheme: {}\nContext: for {} - {}\nMood: {}",
        requirement.description,
        requirement.style.as_deref().unwrap_or("modern, professional"),
        plan.color_scheme.theme,
        plan.project_name,
        plan.tagline,
        mood(plan.project_type)
    )
}

fn is_image_url(output: &str) -> bool {
    output.starts_with("https://") || output.starts_with("http://") || output.starts_with("data:image/")
}

/// Generates images concurrently and publishes the ordered result
///
/// Individual failures are dropped; an empty list is a valid outcome.
pub struct ImageAgent {
    client: Arc<dyn GenerativeClient>,
    settings: AgentSettings,
}

impl ImageAgent {
    pub fn new(client: Arc<dyn GenerativeClient>, settings: AgentSettings) -> Self {
        Self { client, settings }
    }

    async fn generate_one(&self, ctx: &Context, plan: &Plan, requirement: ImageRequirement) -> Option<ImageRef> {
        let request = GenerateRequest::new(AgentKind::Image, "", image_prompt(&requirement, plan))
            .with_model(self.settings.image_model.clone())
            .with_max_tokens(1024);

        match generate(self.client.as_ref(), ctx, self.settings.generate_timeout, request).await {
            Ok(raw) => {
                let url = raw.trim();
                if is_image_url(url) {
                    Some(ImageRef {
                        url: url.to_string(),
                        kind: requirement.kind,
                        description: requirement.description,
                    })
                } else {
                    debug!(kind = %requirement.kind, "discarding non-URL image output");
                    None
                }
            }
            Err(e) => {
                debug!(kind = %requirement.kind, "image generation failed: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Agent for ImageAgent {
    type Input = ImageInput;
    type Output = Vec<ImageRef>;

    fn kind(&self) -> AgentKind {
        AgentKind::Image
    }

    #[instrument(skip_all, fields(agent = "image"))]
    async fn run(&self, ctx: &Context, input: ImageInput, mut tracker: AgentTracker) -> AgentResult<Vec<ImageRef>> {
        let ctx = ctx.with_timeout(self.settings.agent_timeout);
        let ImageInput { plan, publisher } = input;
        tracker.thinking(10, "Analyzing image requirements");

        let mut requirements = if plan.image_requirements.is_empty() {
            determine_image_needs(&plan)
        } else {
            plan.image_requirements.clone()
        };
        requirements.truncate(self.settings.max_images);

        let total = requirements.len();
        if total == 0 {
            publisher.publish(Vec::new());
            tracker.complete("No images required");
            return AgentResult::new(Some(Vec::new()), tracker);
        }

        tracker.working(25, format!("Generating {} image(s)", total));

        let mut results = stream::iter(requirements)
            .map(|requirement| self.generate_one(&ctx, &plan, requirement))
            .buffered(self.settings.image_concurrency.max(1));

        let mut images = Vec::with_capacity(total);
        let mut finished = 0;
        while let Some(result) = results.next().await {
            finished += 1;
            let progress = 25 + (70 * finished / total) as u8;
            match result {
                Some(image) => {
                    tracker.working(progress, format!("Created image {}/{} ({})", finished, total, image.kind));
                    images.push(image);
                }
                None => tracker.working(progress, format!("Skipped image {}/{}", finished, total)),
            }
        }
        drop(results);

        info!(generated = images.len(), requested = total, "image generation finished");
        publisher.publish(images.clone());

        if images.is_empty() {
            tracker.mark_fallback();
            tracker.complete("No images generated, using CSS visuals");
        } else {
            tracker.complete(format!("Generated {} image(s)", images.len()));
        }
        AgentResult::new(Some(images), tracker)
    }
}
