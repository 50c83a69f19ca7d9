//! Build artifacts
//!
//! The orchestrator fills an [`ArtifactDraft`] while agents finish, then
//! freezes it into a [`BuildArtifact`] whose fields are read-only.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::plan::Plan;
use crate::run::AgentRun;
use crate::types::{AgentKind, AgentStatus, BuildId, BuildStatus, Credits};
use crate::{KilnError, Result};

/// A generated or uploaded image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
    /// hero, feature, product, uploaded, ...
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    /// Score deduction for one issue of this severity
    pub fn deduction(&self) -> u8 {
        match self {
            Self::Critical => 20,
            Self::High => 10,
            Self::Medium => 5,
            Self::Low => 2,
            Self::Info => 0,
        }
    }
}

impl std::str::FromStr for IssueSeverity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "low" | "minor" => Ok(Self::Low),
            "medium" | "warning" => Ok(Self::Medium),
            "high" | "major" => Ok(Self::High),
            "critical" | "error" => Ok(Self::Critical),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestIssue {
    pub severity: IssueSeverity,
    pub category: String,
    pub message: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl TestIssue {
    pub fn new(severity: IssueSeverity, category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            category: category.into(),
            message: message.into(),
            file: None,
        }
    }

    pub fn in_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }
}

/// Outcome of the test stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    /// 0..=100
    pub score: u8,
    pub passed: bool,
    pub issues: Vec<TestIssue>,
    /// Whether the generative review was merged in
    #[serde(default)]
    pub reviewed: bool,
}

impl TestReport {
    pub const PASS_THRESHOLD: u8 = 70;

    /// Score 100 minus the deductions of every issue
    pub fn from_issues(issues: Vec<TestIssue>) -> Self {
        let deducted: u32 = issues.iter().map(|i| i.severity.deduction() as u32).sum();
        let score = 100u32.saturating_sub(deducted) as u8;
        Self {
            score,
            passed: score >= Self::PASS_THRESHOLD,
            issues,
            reviewed: false,
        }
    }

    /// Report for a build with nothing to test
    pub fn missing_frontend() -> Self {
        Self {
            score: 0,
            passed: false,
            issues: vec![TestIssue::new(
                IssueSeverity::Critical,
                "structure",
                "No frontend document was produced",
            )],
            reviewed: false,
        }
    }

    pub fn count(&self, severity: IssueSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

/// Why a build ended Failed or Cancelled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildFailure {
    pub agent: Option<AgentKind>,
    pub reason: String,
}

/// Mutable artifact owned by the orchestrator during a build
#[derive(Debug, Clone)]
pub struct ArtifactDraft {
    pub build_id: BuildId,
    pub plan: Option<Arc<Plan>>,
    pub files: BTreeMap<String, String>,
    pub images: Vec<ImageRef>,
    pub test_report: Option<TestReport>,
    pub credits_reserved: Credits,
    pub credits_used: Credits,
    pub agent_runs: Vec<AgentRun>,
}

impl ArtifactDraft {
    pub fn new(build_id: BuildId) -> Self {
        Self {
            build_id,
            plan: None,
            files: BTreeMap::new(),
            images: Vec::new(),
            test_report: None,
            credits_reserved: 0,
            credits_used: 0,
            agent_runs: Vec::new(),
        }
    }

    pub fn add_file(&mut self, path: impl Into<String>, content: impl Into<String>) {
        self.files.insert(path.into(), content.into());
    }

    /// Record a run, replacing any earlier record for the same agent
    pub fn record_run(&mut self, run: AgentRun) {
        self.agent_runs.retain(|r| r.kind != run.kind);
        self.agent_runs.push(run);
        self.agent_runs.sort_by_key(|r| r.kind);
    }

    pub fn run(&self, kind: AgentKind) -> Option<&AgentRun> {
        self.agent_runs.iter().find(|r| r.kind == kind)
    }

    /// First failed agent in pipeline order
    pub fn first_failure(&self) -> Option<BuildFailure> {
        self.agent_runs
            .iter()
            .find(|r| r.status == AgentStatus::Failed)
            .map(|r| BuildFailure {
                agent: Some(r.kind),
                reason: r.failure.clone().unwrap_or_else(|| "unknown".to_string()),
            })
    }

    /// Freeze into the immutable artifact
    pub fn freeze(self, status: BuildStatus, failure: Option<BuildFailure>) -> BuildArtifact {
        BuildArtifact {
            build_id: self.build_id,
            plan: self
                .plan
                .map(|plan| Arc::try_unwrap(plan).unwrap_or_else(|shared| (*shared).clone())),
            files: self.files,
            images: self.images,
            test_report: self.test_report,
            status,
            failure,
            credits_reserved: self.credits_reserved,
            credits_used: self.credits_used,
            agent_runs: self.agent_runs,
        }
    }
}

/// Final output of a build
#[derive(Debug, Clone, Serialize)]
pub struct BuildArtifact {
    build_id: BuildId,
    plan: Option<Plan>,
    files: BTreeMap<String, String>,
    images: Vec<ImageRef>,
    test_report: Option<TestReport>,
    status: BuildStatus,
    failure: Option<BuildFailure>,
    credits_reserved: Credits,
    credits_used: Credits,
    agent_runs: Vec<AgentRun>,
}

impl BuildArtifact {
    pub fn build_id(&self) -> BuildId {
        self.build_id
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn test_report(&self) -> Option<&TestReport> {
        self.test_report.as_ref()
    }

    pub fn status(&self) -> BuildStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&BuildFailure> {
        self.failure.as_ref()
    }

    pub fn credits_reserved(&self) -> Credits {
        self.credits_reserved
    }

    pub fn credits_used(&self) -> Credits {
        self.credits_used
    }

    pub fn credits_refunded(&self) -> Credits {
        self.credits_reserved.saturating_sub(self.credits_used)
    }

    pub fn agent_runs(&self) -> &[AgentRun] {
        &self.agent_runs
    }

    pub fn run(&self, kind: AgentKind) -> Option<&AgentRun> {
        self.agent_runs.iter().find(|r| r.kind == kind)
    }

    /// Convert a Failed or Cancelled artifact into an error
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            BuildStatus::Failed => {
                let failure = self.failure.unwrap_or(BuildFailure {
                    agent: None,
                    reason: "build failed".to_string(),
                });
                match failure.agent {
                    Some(agent) => Err(KilnError::AgentFailed {
                        agent,
                        reason: failure.reason,
                    }),
                    None => Err(KilnError::Other(failure.reason)),
                }
            }
            BuildStatus::Cancelled => Err(KilnError::Cancelled),
            _ => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_scoring() {
        let report = TestReport::from_issues(vec![
            TestIssue::new(IssueSeverity::Critical, "structure", "missing doctype"),
            TestIssue::new(IssueSeverity::Medium, "seo", "missing title"),
        ]);
        assert_eq!(report.score, 75);
        assert!(report.passed);

        let report = TestReport::from_issues(vec![
            TestIssue::new(IssueSeverity::Critical, "a", "x"),
            TestIssue::new(IssueSeverity::Critical, "b", "y"),
        ]);
        assert_eq!(report.score, 60);
        assert!(!report.passed);
    }

    #[test]
    fn test_score_saturates_at_zero() {
        let issues = (0..10)
            .map(|i| TestIssue::new(IssueSeverity::Critical, "x", format!("issue {}", i)))
            .collect();
        assert_eq!(TestReport::from_issues(issues).score, 0);
    }

    #[test]
    fn test_draft_records_one_run_per_agent() {
        let mut draft = ArtifactDraft::new(BuildId::new());
        draft.record_run(AgentRun::new(AgentKind::Test));
        draft.record_run(AgentRun::new(AgentKind::Plan));
        draft.record_run(AgentRun::new(AgentKind::Plan));
        assert_eq!(draft.agent_runs.len(), 2);
        assert_eq!(draft.agent_runs[0].kind, AgentKind::Plan);
    }

    #[test]
    fn test_into_result_for_failed_build() {
        let mut draft = ArtifactDraft::new(BuildId::new());
        let mut run = AgentRun::new(AgentKind::Frontend);
        run.advance(AgentStatus::Failed, 0, "no template").unwrap();
        run.failure = Some("no template".to_string());
        draft.record_run(run);

        let failure = draft.first_failure();
        let artifact = draft.freeze(BuildStatus::Failed, failure);
        assert!(matches!(
            artifact.into_result(),
            Err(KilnError::AgentFailed { agent: AgentKind::Frontend, .. })
        ));
    }

    #[test]
    fn test_refunded_is_derived() {
        let mut draft = ArtifactDraft::new(BuildId::new());
        draft.credits_reserved = 15;
        draft.credits_used = 11;
        let artifact = draft.freeze(BuildStatus::Completed, None);
        assert_eq!(artifact.credits_refunded(), 4);
        assert!(artifact.into_result().is_ok());
    }
}
