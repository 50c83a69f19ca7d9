//! Telemetry collection for builds and agents

use chrono::{DateTime, Utc};
use kiln_core::{AgentKind, AgentRun, AgentStatus, BuildArtifact, BuildId, BuildStatus, Credits};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Telemetry for one agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMetrics {
    pub agent: AgentKind,
    pub status: AgentStatus,
    /// Wall time between first and terminal transition
    pub duration_ms: u64,
    pub used_fallback: bool,
    pub skipped: bool,
    /// Number of progress messages emitted
    pub messages: usize,
    pub failure: Option<String>,
}

impl From<&AgentRun> for AgentMetrics {
    fn from(run: &AgentRun) -> Self {
        Self {
            agent: run.kind,
            status: run.status,
            duration_ms: run.duration_ms().unwrap_or(0).max(0) as u64,
            used_fallback: run.used_fallback,
            skipped: run.skipped,
            messages: run.messages.len(),
            failure: run.failure.clone(),
        }
    }
}

/// Collected telemetry for a build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildMetrics {
    pub build_id: BuildId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// `None` while the build is running
    pub status: Option<BuildStatus>,
    pub credits_reserved: Credits,
    pub credits_used: Credits,
    pub agents: Vec<AgentMetrics>,
}

impl BuildMetrics {
    pub fn new(build_id: BuildId) -> Self {
        Self {
            build_id,
            started_at: Utc::now(),
            ended_at: None,
            status: None,
            credits_reserved: 0,
            credits_used: 0,
            agents: Vec::new(),
        }
    }

    /// Record or replace the telemetry of one agent
    pub fn record_agent(&mut self, run: &AgentRun) {
        let metrics = AgentMetrics::from(run);
        match self.agents.iter_mut().find(|m| m.agent == run.kind) {
            Some(existing) => *existing = metrics,
            None => self.agents.push(metrics),
        }
    }

    pub fn complete(&mut self, artifact: &BuildArtifact) {
        for run in artifact.agent_runs() {
            self.record_agent(run);
        }
        self.ended_at = Some(Utc::now());
        self.status = Some(artifact.status());
        self.credits_reserved = artifact.credits_reserved();
        self.credits_used = artifact.credits_used();
    }

    pub fn duration_ms(&self) -> u64 {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    pub fn fallback_count(&self) -> usize {
        self.agents.iter().filter(|a| a.used_fallback).count()
    }

    pub fn agent(&self, kind: AgentKind) -> Option<&AgentMetrics> {
        self.agents.iter().find(|a| a.agent == kind)
    }
}

/// Metrics collector shared by every build of an orchestrator
pub struct MetricsCollector {
    /// Metrics by build
    builds: Arc<RwLock<HashMap<BuildId, BuildMetrics>>>,
    /// Global counters
    total_builds: AtomicU32,
    failed_builds: AtomicU32,
    cancelled_builds: AtomicU32,
    fallbacks: AtomicU32,
    credits_charged: AtomicU64,
    total_time_ms: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            builds: Arc::new(RwLock::new(HashMap::new())),
            total_builds: AtomicU32::new(0),
            failed_builds: AtomicU32::new(0),
            cancelled_builds: AtomicU32::new(0),
            fallbacks: AtomicU32::new(0),
            credits_charged: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
        }
    }

    /// Start tracking a build
    pub async fn start_build(&self, build_id: BuildId) {
        let mut builds = self.builds.write().await;
        builds.insert(build_id, BuildMetrics::new(build_id));
        debug!("Started tracking build {}", build_id);
    }

    /// Record a terminal agent run for a build
    pub async fn record_agent(&self, build_id: BuildId, run: &AgentRun) {
        let mut builds = self.builds.write().await;
        if let Some(metrics) = builds.get_mut(&build_id) {
            metrics.record_agent(run);
        }
    }

    /// Complete tracking for a build from its frozen artifact
    ///
    /// A build that was never started is tracked from this point.
    pub async fn complete_build(&self, artifact: &BuildArtifact) -> BuildMetrics {
        let mut builds = self.builds.write().await;
        let metrics = builds
            .entry(artifact.build_id())
            .or_insert_with(|| BuildMetrics::new(artifact.build_id()));
        metrics.complete(artifact);

        self.total_builds.fetch_add(1, Ordering::Relaxed);
        match artifact.status() {
            BuildStatus::Failed => {
                self.failed_builds.fetch_add(1, Ordering::Relaxed);
            }
            BuildStatus::Cancelled => {
                self.cancelled_builds.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        self.fallbacks
            .fetch_add(metrics.fallback_count() as u32, Ordering::Relaxed);
        self.credits_charged
            .fetch_add(metrics.credits_used, Ordering::Relaxed);
        self.total_time_ms
            .fetch_add(metrics.duration_ms(), Ordering::Relaxed);

        debug!(build_id = %artifact.build_id(), status = ?artifact.status(), "Completed tracking build");
        metrics.clone()
    }

    /// Get metrics for a build
    pub async fn build_metrics(&self, build_id: BuildId) -> Option<BuildMetrics> {
        let builds = self.builds.read().await;
        builds.get(&build_id).cloned()
    }

    /// Get all build metrics
    pub async fn all_builds(&self) -> HashMap<BuildId, BuildMetrics> {
        let builds = self.builds.read().await;
        builds.clone()
    }

    /// Get global summary
    pub fn global_summary(&self) -> GlobalMetrics {
        GlobalMetrics {
            total_builds: self.total_builds.load(Ordering::Relaxed),
            failed_builds: self.failed_builds.load(Ordering::Relaxed),
            cancelled_builds: self.cancelled_builds.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            credits_charged: self.credits_charged.load(Ordering::Relaxed),
            total_time_ms: self.total_time_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_builds: u32,
    pub failed_builds: u32,
    pub cancelled_builds: u32,
    pub fallbacks: u32,
    pub credits_charged: Credits,
    pub total_time_ms: u64,
}

impl GlobalMetrics {
    pub fn success_rate(&self) -> f32 {
        if self.total_builds == 0 {
            return 1.0;
        }
        let unsuccessful = self.failed_builds + self.cancelled_builds;
        (self.total_builds - unsuccessful) as f32 / self.total_builds as f32
    }
}
