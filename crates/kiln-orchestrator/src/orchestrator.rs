//! Core orchestrator implementation

use kiln_agent::{
    Agent, AgentResult, AgentSettings, AgentTracker, BackendAgent, BasicValidator, BuiltinTemplates,
    FrontendAgent, FrontendInput, GenerativeClient, ImageAgent, ImageFeed, ImageInput, PlanAgent,
    TemplateLibrary, TestAgent, TestInput, Validator, FRONTEND_PATH,
};
use kiln_core::{
    AgentKind, AgentRun, AgentStatus, ArtifactDraft, BuildArtifact, BuildFailure, BuildId, BuildRequest,
    BuildStatus, Context, Event, EventBus, KilnConfig, Plan, Result,
};
use kiln_ledger::Ledger;
use kiln_metrics::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::assembly::{generate_readme, inject_images, README_PATH};

const ABANDONED: &str = "abandoned";
const PANICKED: &str = "agent panicked";

/// Runs builds end to end
///
/// One orchestrator serves many concurrent builds. The ledger is the only
/// state shared between them.
pub struct Orchestrator {
    ledger: Arc<dyn Ledger>,
    client: Arc<dyn GenerativeClient>,
    bus: Arc<EventBus>,
    templates: Arc<dyn TemplateLibrary>,
    validator: Arc<dyn Validator>,
    metrics: Arc<MetricsCollector>,
    config: KilnConfig,
}

/// Collaborators for an [`Orchestrator`]; anything not set gets a default
pub struct OrchestratorBuilder {
    ledger: Arc<dyn Ledger>,
    client: Arc<dyn GenerativeClient>,
    bus: Option<Arc<EventBus>>,
    templates: Option<Arc<dyn TemplateLibrary>>,
    validator: Option<Arc<dyn Validator>>,
    metrics: Option<Arc<MetricsCollector>>,
    config: KilnConfig,
}

impl OrchestratorBuilder {
    pub fn with_config(mut self, config: KilnConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateLibrary>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Orchestrator {
        let buffer = self.config.events.buffer;
        Orchestrator {
            ledger: self.ledger,
            client: self.client,
            bus: self.bus.unwrap_or_else(|| Arc::new(EventBus::new(buffer))),
            templates: self.templates.unwrap_or_else(|| Arc::new(BuiltinTemplates::new())),
            validator: self.validator.unwrap_or_else(|| Arc::new(BasicValidator::new())),
            metrics: self.metrics.unwrap_or_default(),
            config: self.config,
        }
    }
}

/// A spawned agent task plus what is needed to recover its run
struct Launched<T> {
    kind: AgentKind,
    build_id: BuildId,
    handle: JoinHandle<AgentResult<T>>,
    observer: watch::Receiver<AgentRun>,
    bus: Arc<EventBus>,
}

struct Settled<T> {
    result: AgentResult<T>,
    /// Aborted after the drain grace period
    abandoned: bool,
}

impl<T> Launched<T> {
    /// Wait for the agent, or once `ctx` is done, for at most `grace`
    async fn settle(self, ctx: &Context, grace: Duration) -> Settled<T> {
        let Launched {
            kind,
            build_id,
            mut handle,
            observer,
            bus,
        } = self;

        let joined = tokio::select! {
            biased;
            joined = &mut handle => Some(joined),
            _ = ctx.done() => None,
        };
        let joined = match joined {
            Some(joined) => Some(joined),
            None => match tokio::time::timeout(grace, &mut handle).await {
                Ok(joined) => Some(joined),
                Err(_) => {
                    handle.abort();
                    None
                }
            },
        };

        let reason = match joined {
            Some(Ok(result)) => {
                return Settled {
                    result,
                    abandoned: false,
                }
            }
            Some(Err(e)) if e.is_panic() => PANICKED,
            _ => ABANDONED,
        };

        warn!(agent = %kind, "{}", reason);
        let mut run = observer.borrow().clone();
        if !run.status.is_terminal() {
            // Never reached Thinking: nothing to charge
            if !run.started() {
                run.skipped = true;
            }
            let progress = run.progress;
            if run.advance(AgentStatus::Failed, progress, reason).is_ok() {
                run.failure = Some(reason.to_string());
                bus.publish(Event::agent(build_id, kind, AgentStatus::Failed, progress, reason));
            }
        }
        Settled {
            result: AgentResult { output: None, run },
            abandoned: reason == ABANDONED,
        }
    }
}

impl Orchestrator {
    pub fn builder(ledger: Arc<dyn Ledger>, client: Arc<dyn GenerativeClient>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            ledger,
            client,
            bus: None,
            templates: None,
            validator: None,
            metrics: None,
            config: KilnConfig::default(),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    /// Run one build
    ///
    /// Returns `Err` only when credits cannot be reserved or settled. Agent
    /// failures and cancellation are reported through the artifact's status.
    #[instrument(name = "kiln.build", skip_all, fields(build_id = %request.id, account = %request.account))]
    pub async fn build(&self, ctx: &Context, request: BuildRequest) -> Result<BuildArtifact> {
        let build_id = request.id;
        let ceiling = self.config.pricing.ceiling();
        let reservation = self
            .ledger
            .reserve(&request.account, ceiling, &format!("build {}", build_id))
            .await?;
        info!(reserved = ceiling, "credits reserved");

        self.metrics.start_build(build_id).await;
        self.publish_build(
            build_id,
            BuildStatus::Running,
            0,
            format!("Build started ({} credits reserved)", ceiling),
        );

        let ctx = ctx.with_timeout(self.config.timeouts.build());
        let mut draft = ArtifactDraft::new(build_id);
        draft.credits_reserved = ceiling;

        let interrupted = self.run_pipeline(&ctx, &request, &mut draft).await;

        let billable: Vec<AgentKind> = draft
            .agent_runs
            .iter()
            .filter(|run| run.is_billable())
            .map(|run| run.kind)
            .collect();
        let actual = self.config.pricing.cost_of(billable.iter());
        let settled = if draft.agent_runs.iter().any(AgentRun::started) {
            self.ledger.commit(reservation, actual).await
        } else {
            self.ledger.refund(reservation).await
        };
        let settlement = match settled {
            Ok(settlement) => settlement,
            Err(e) => {
                error!("credit settlement failed: {}", e);
                self.publish_build(build_id, BuildStatus::Failed, 100, format!("Credit settlement failed: {}", e));
                self.bus.close(build_id);
                return Err(e);
            }
        };
        draft.credits_used = settlement.committed;
        debug!(committed = settlement.committed, refunded = settlement.refunded, "credits settled");

        if let Some(plan) = draft.plan.clone() {
            let readme = generate_readme(build_id, &plan, &draft.files);
            draft.add_file(README_PATH, readme);
        }

        let (status, failure) = if interrupted {
            let reason = ctx.err().map(|e| e.to_string()).unwrap_or_else(|| "cancelled".to_string());
            (BuildStatus::Cancelled, Some(BuildFailure { agent: None, reason }))
        } else {
            match draft.first_failure() {
                Some(failure) => (BuildStatus::Failed, Some(failure)),
                None => (BuildStatus::Completed, None),
            }
        };

        let artifact = draft.freeze(status, failure);
        self.publish_build(build_id, status, 100, summary(&artifact));
        self.bus.close(build_id);

        let metrics = self.metrics.complete_build(&artifact).await;
        info!(
            status = ?status,
            credits_used = artifact.credits_used(),
            duration_ms = metrics.duration_ms(),
            "build finished"
        );
        Ok(artifact)
    }

    /// Run the agents in dependency order; true when the build was cut short
    async fn run_pipeline(&self, ctx: &Context, request: &BuildRequest, draft: &mut ArtifactDraft) -> bool {
        let build_id = request.id;
        let settings = self.settings_for(request);
        let grace = self.config.timeouts.drain_grace();

        if ctx.is_done() {
            warn!("context done before planning, nothing launched");
            return true;
        }

        let plan = self
            .launch(ctx, build_id, PlanAgent::new(Arc::clone(&self.client), settings.clone()), request.prompt.clone())
            .settle(ctx, grace)
            .await;
        let mut interrupted = plan.abandoned;
        let plan_output = plan.result.output;
        self.record(draft, plan.result.run).await;
        let plan = Arc::new(plan_output.unwrap_or_else(|| Plan::fallback(&request.prompt)));
        draft.plan = Some(Arc::clone(&plan));

        if interrupted || ctx.is_done() {
            warn!("context done after planning, remaining agents not launched");
            return true;
        }

        let (publisher, feed) = ImageFeed::channel();
        let image = self.launch(
            ctx,
            build_id,
            ImageAgent::new(Arc::clone(&self.client), settings.clone()),
            ImageInput {
                plan: Arc::clone(&plan),
                publisher,
            },
        );
        let frontend = self.launch(
            ctx,
            build_id,
            FrontendAgent::new(Arc::clone(&self.client), Arc::clone(&self.templates), settings.clone()),
            FrontendInput {
                plan: Arc::clone(&plan),
                images: feed,
                uploaded_images: request.uploaded_images.clone(),
            },
        );
        let backend = self.launch(
            ctx,
            build_id,
            BackendAgent::new(Arc::clone(&self.client), Arc::clone(&self.templates), settings.clone()),
            Arc::clone(&plan),
        );

        let (frontend, backend, image) = tokio::join!(
            frontend.settle(ctx, grace),
            backend.settle(ctx, grace),
            image.settle(ctx, grace)
        );
        interrupted = frontend.abandoned || backend.abandoned || image.abandoned;

        draft.images = image.result.output.unwrap_or_default();
        if let Some(html) = frontend.result.output {
            let html = inject_images(&html, &draft.images);
            draft.add_file(FRONTEND_PATH, html);
        }
        if let Some(backend) = backend.result.output {
            draft.files.extend(backend.files);
        }
        for run in [image.result.run, frontend.result.run, backend.result.run] {
            self.record(draft, run).await;
        }

        if interrupted || ctx.is_done() {
            warn!("context done before testing, test agent not launched");
            return true;
        }

        let test = self
            .launch(
                ctx,
                build_id,
                TestAgent::new(Arc::clone(&self.client), Arc::clone(&self.validator), settings),
                TestInput {
                    files: draft.files.clone(),
                },
            )
            .settle(ctx, grace)
            .await;
        draft.test_report = test.result.output;
        self.record(draft, test.result.run).await;
        test.abandoned
    }

    fn launch<A>(&self, ctx: &Context, build_id: BuildId, agent: A, input: A::Input) -> Launched<A::Output>
    where
        A: Agent + 'static,
        A::Input: 'static,
        A::Output: 'static,
    {
        let kind = agent.kind();
        let tracker = AgentTracker::new(build_id, kind, Arc::clone(&self.bus));
        let observer = tracker.observe();
        let ctx = ctx.clone();
        let handle = tokio::spawn(async move { agent.run(&ctx, input, tracker).await }.in_current_span());
        debug!(agent = %kind, "agent launched");
        Launched {
            kind,
            build_id,
            handle,
            observer,
            bus: Arc::clone(&self.bus),
        }
    }

    async fn record(&self, draft: &mut ArtifactDraft, run: AgentRun) {
        self.metrics.record_agent(draft.build_id, &run).await;
        draft.record_run(run);
    }

    fn settings_for(&self, request: &BuildRequest) -> AgentSettings {
        let mut settings = AgentSettings::from_config(&self.config);
        if let Some(model) = &request.requested_model {
            settings.planner_model = Some(model.clone());
            settings.code_model = Some(model.clone());
        }
        settings
    }

    fn publish_build(&self, build_id: BuildId, status: BuildStatus, progress: u8, message: impl Into<String>) {
        self.bus.publish(Event::build(build_id, status, progress, message));
    }
}

fn summary(artifact: &BuildArtifact) -> String {
    match (artifact.status(), artifact.failure()) {
        (BuildStatus::Cancelled, Some(failure)) => format!("Build cancelled: {}", failure.reason),
        (BuildStatus::Failed, Some(BuildFailure { agent: Some(agent), reason })) => {
            format!("Build failed in {} agent: {}", agent, reason)
        }
        (BuildStatus::Failed, Some(failure)) => format!("Build failed: {}", failure.reason),
        _ => {
            let score = artifact
                .test_report()
                .map(|r| format!(", score {}/100", r.score))
                .unwrap_or_default();
            format!(
                "Build completed: {} file(s), {} credits used{}",
                artifact.files().len(),
                artifact.credits_used(),
                score
            )
        }
    }
}
