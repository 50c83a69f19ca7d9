//! Per-agent status tracking and event publishing

use kiln_core::{AgentKind, AgentRun, AgentStatus, BuildId, Event, EventBus};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Owns one agent's [`AgentRun`] while the agent executes
///
/// Every accepted transition is published to the bus. Rejected transitions
/// are logged and ignored so a misbehaving agent cannot corrupt its record.
#[derive(Debug)]
pub struct AgentTracker {
    build_id: BuildId,
    run: AgentRun,
    bus: Arc<EventBus>,
    mirror: watch::Sender<AgentRun>,
}

impl AgentTracker {
    pub fn new(build_id: BuildId, kind: AgentKind, bus: Arc<EventBus>) -> Self {
        let run = AgentRun::new(kind);
        let (mirror, _) = watch::channel(run.clone());
        Self {
            build_id,
            run,
            bus,
            mirror,
        }
    }

    /// Live view of the run that outlives the tracker
    ///
    /// Lets the owner recover the last known state of an agent whose task was
    /// aborted or panicked.
    pub fn observe(&self) -> watch::Receiver<AgentRun> {
        self.mirror.subscribe()
    }

    pub fn kind(&self) -> AgentKind {
        self.run.kind
    }

    pub fn status(&self) -> AgentStatus {
        self.run.status
    }

    pub fn run(&self) -> &AgentRun {
        &self.run
    }

    pub fn thinking(&mut self, progress: u8, message: impl Into<String>) {
        self.advance(AgentStatus::Thinking, progress, message.into());
    }

    pub fn working(&mut self, progress: u8, message: impl Into<String>) {
        self.advance(AgentStatus::Working, progress, message.into());
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.advance(AgentStatus::Completed, 100, message.into());
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.advance(AgentStatus::Failed, self.run.progress, reason.clone()) {
            self.run.failure = Some(reason);
            self.mirror.send_replace(self.run.clone());
        }
    }

    /// Output will come from the deterministic fallback
    pub fn mark_fallback(&mut self) {
        self.run.used_fallback = true;
        self.mirror.send_replace(self.run.clone());
    }

    /// Agent short-circuits without billable work
    pub fn mark_skipped(&mut self) {
        self.run.skipped = true;
        self.mirror.send_replace(self.run.clone());
    }

    /// Hand the finished record back to the orchestrator
    pub fn finish(self) -> AgentRun {
        self.run
    }

    fn advance(&mut self, to: AgentStatus, progress: u8, message: String) -> bool {
        if let Err(e) = self.run.advance(to, progress, message.clone()) {
            warn!(agent = %self.run.kind, "ignored status change: {}", e);
            return false;
        }
        self.mirror.send_replace(self.run.clone());
        debug!(
            agent = %self.run.kind,
            status = %self.run.status,
            progress = self.run.progress,
            "{}", message
        );
        self.bus.publish(Event::agent(
            self.build_id,
            self.run.kind,
            self.run.status,
            self.run.progress,
            message,
        ));
        true
    }
}
