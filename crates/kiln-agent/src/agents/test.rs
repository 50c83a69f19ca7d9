//! Static and generative review of the generated files

use async_trait::async_trait;
use kiln_core::{AgentKind, Context, IssueSeverity, TestIssue, TestReport};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::{generate, Agent, AgentResult, AgentSettings};
use crate::client::GenerativeClient;
use crate::parser;
use crate::tracker::AgentTracker;
use crate::types::GenerateRequest;
use crate::validator::{Validator, FRONTEND_PATH};

const SYSTEM_PROMPT: &str = r#"You are a QA engineer reviewing a generated website.
Check HTML validity, responsive design, accessibility and best practices.
Return a single JSON object:
{"score": 0-100, "issues": [{"severity": "critical|high|medium|low|info", "category": "...", "message": "..."}]}
Return only the JSON."#;

const REVIEW_EXCERPT_CHARS: usize = 12_000;

pub struct TestInput {
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Review {
    score: f64,
    #[serde(default)]
    issues: Vec<ReviewIssue>,
}

#[derive(Debug, Deserialize)]
struct ReviewIssue {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    message: String,
}

impl Review {
    fn merge_into(self, report: TestReport) -> TestReport {
        let review_score = if self.score.is_finite() {
            self.score.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let score = ((f64::from(report.score) + review_score) / 2.0).round() as u8;

        let mut issues = report.issues;
        issues.extend(self.issues.into_iter().map(|issue| {
            let severity = issue.severity.parse().unwrap_or(IssueSeverity::Medium);
            TestIssue::new(severity, issue.category, issue.message)
        }));

        TestReport {
            score,
            passed: score >= TestReport::PASS_THRESHOLD,
            issues,
            reviewed: true,
        }
    }
}

/// Scores the build; never ends `Failed`
///
/// The static validator always runs. A parseable generative review is
/// averaged in; anything else leaves the static report as-is.
pub struct TestAgent {
    client: Arc<dyn GenerativeClient>,
    validator: Arc<dyn Validator>,
    settings: AgentSettings,
}

impl TestAgent {
    pub fn new(client: Arc<dyn GenerativeClient>, validator: Arc<dyn Validator>, settings: AgentSettings) -> Self {
        Self {
            client,
            validator,
            settings,
        }
    }

    fn prompt(html: &str) -> String {
        let excerpt: String = html.chars().take(REVIEW_EXCERPT_CHARS).collect();
        format!("Review this website:\n\n```html\n{}\n```", excerpt)
    }
}

#[async_trait]
impl Agent for TestAgent {
    type Input = TestInput;
    type Output = TestReport;

    fn kind(&self) -> AgentKind {
        AgentKind::Test
    }

    #[instrument(skip_all, fields(agent = "test", files = input.files.len()))]
    async fn run(&self, ctx: &Context, input: TestInput, mut tracker: AgentTracker) -> AgentResult<TestReport> {
        tracker.thinking(10, "Preparing test suite");

        let html = match input.files.get(FRONTEND_PATH) {
            Some(html) if !html.trim().is_empty() => html,
            _ => {
                tracker.complete("No frontend to test");
                return AgentResult::new(Some(TestReport::missing_frontend()), tracker);
            }
        };

        tracker.working(30, "Running static checks");
        let report = self.validator.validate(&input.files);
        debug!(score = report.score, issues = report.issues.len(), "static checks done");

        let ctx = ctx.with_timeout(self.settings.agent_timeout);
        tracker.working(60, "Reviewing accessibility and responsiveness");
        let request = GenerateRequest::new(AgentKind::Test, SYSTEM_PROMPT, Self::prompt(html))
            .with_model(self.settings.code_model.clone())
            .with_max_tokens(2000);

        let review = match generate(self.client.as_ref(), &ctx, self.settings.generate_timeout, request).await {
            Ok(raw) => parser::parse::<Review>(&raw),
            Err(e) => {
                warn!("test review failed: {}", e);
                None
            }
        };

        let report = match review {
            Some(review) => review.merge_into(report),
            None => {
                tracker.mark_fallback();
                report
            }
        };

        tracker.complete(format!(
            "Score {}/100 ({})",
            report.score,
            if report.passed { "passed" } else { "needs work" }
        ));
        AgentResult::new(Some(report), tracker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockGenerativeClient;
    use crate::validator::BasicValidator;
    use kiln_core::{AgentStatus, BuildId, EventBus};

    const GOOD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en"><head><meta name="viewport" content="width=device-width"><title>T</title></head>
<body><img src="https://x/a.png" alt="a"></body></html>"#;

    fn tracker() -> AgentTracker {
        AgentTracker::new(BuildId::new(), AgentKind::Test, Arc::new(EventBus::default()))
    }

    fn files(html: &str) -> TestInput {
        let mut files = BTreeMap::new();
        files.insert(FRONTEND_PATH.to_string(), html.to_string());
        TestInput { files }
    }

    fn agent(client: MockGenerativeClient) -> (TestAgent, Arc<MockGenerativeClient>) {
        let client = Arc::new(client);
        let agent = TestAgent::new(client.clone(), Arc::new(BasicValidator::new()), AgentSettings::default());
        (agent, client)
    }

    #[tokio::test]
    async fn test_missing_frontend_scores_zero() {
        let (agent, client) = agent(MockGenerativeClient::new());
        let result = agent
            .run(&Context::background(), TestInput { files: BTreeMap::new() }, tracker())
            .await;

        let report = result.output.unwrap();
        assert_eq!(report.score, 0);
        assert!(!report.passed);
        assert_eq!(report.count(IssueSeverity::Critical), 1);
        assert_eq!(result.run.status, AgentStatus::Completed);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_merges_review() {
        let (agent, _) = agent(MockGenerativeClient::new().with_response(
            AgentKind::Test,
            r#"{"score": 80, "issues": [{"severity": "low", "category": "style", "message": "tight spacing"}, {"severity": "bogus", "category": "x", "message": "y"}]}"#,
        ));
        let result = agent.run(&Context::background(), files(GOOD_HTML), tracker()).await;

        let report = result.output.unwrap();
        assert_eq!(report.score, 90);
        assert!(report.passed);
        assert!(report.reviewed);
        assert_eq!(report.count(IssueSeverity::Low), 1);
        assert_eq!(report.count(IssueSeverity::Medium), 1);
        assert!(!result.run.used_fallback);
    }

    #[tokio::test]
    async fn test_clamps_review_score() {
        let (agent, _) = agent(MockGenerativeClient::new().with_response(AgentKind::Test, r#"{"score": 250}"#));
        let result = agent.run(&Context::background(), files(GOOD_HTML), tracker()).await;
        assert_eq!(result.output.unwrap().score, 100);
    }

    #[tokio::test]
    async fn test_keeps_static_report_when_review_fails() {
        let (agent, _) = agent(MockGenerativeClient::failing());
        let result = agent
            .run(&Context::background(), files("<html><body>hi</body></html>"), tracker())
            .await;

        let report = result.output.unwrap();
        assert!(!report.reviewed);
        assert!(report.score < 100);
        assert!(result.run.used_fallback);
        assert_eq!(result.run.status, AgentStatus::Completed);
    }
}
