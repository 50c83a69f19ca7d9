//! Scripted generative client for tests

use async_trait::async_trait;
use kiln_core::{AgentKind, KilnError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use crate::client::GenerativeClient;
use crate::types::GenerateRequest;

/// Mock generative client
///
/// Responses are scripted per agent. An agent with several responses cycles
/// through them in call order.
#[derive(Debug, Default)]
pub struct MockGenerativeClient {
    responses: HashMap<AgentKind, Vec<String>>,
    default_response: Option<String>,
    failures: HashSet<AgentKind>,
    fail_all: bool,
    delays: HashMap<AgentKind, Duration>,
    default_delay: Option<Duration>,
    calls: Mutex<Vec<GenerateRequest>>,
}

impl MockGenerativeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose every call errors
    pub fn failing() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    pub fn with_response(mut self, agent: AgentKind, response: impl Into<String>) -> Self {
        self.responses.entry(agent).or_default().push(response.into());
        self
    }

    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    pub fn with_failure(mut self, agent: AgentKind) -> Self {
        self.failures.insert(agent);
        self
    }

    /// Delay every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.default_delay = Some(delay);
        self
    }

    pub fn with_agent_delay(mut self, agent: AgentKind, delay: Duration) -> Self {
        self.delays.insert(agent, delay);
        self
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<GenerateRequest>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn call_count(&self) -> usize {
        self.log().len()
    }

    pub fn calls_for(&self, agent: AgentKind) -> usize {
        self.log().iter().filter(|r| r.agent == agent).count()
    }

    /// Every request received, in arrival order
    pub fn calls(&self) -> Vec<GenerateRequest> {
        self.log().clone()
    }
}

#[async_trait]
impl GenerativeClient for MockGenerativeClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        let agent = request.agent;
        let nth = {
            let mut log = self.log();
            let nth = log.iter().filter(|r| r.agent == agent).count();
            log.push(request);
            nth
        };

        if let Some(delay) = self.delays.get(&agent).copied().or(self.default_delay) {
            tokio::time::sleep(delay).await;
        }

        if self.fail_all || self.failures.contains(&agent) {
            return Err(KilnError::Generative(format!("mock failure for {}", agent)));
        }

        match self.responses.get(&agent) {
            Some(scripted) if !scripted.is_empty() => Ok(scripted[nth % scripted.len()].clone()),
            _ => self
                .default_response
                .clone()
                .ok_or_else(|| KilnError::Generative(format!("No mock response for: {}", agent))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_responses_cycle() {
        let client = MockGenerativeClient::new()
            .with_response(AgentKind::Image, "https://img/1.png")
            .with_response(AgentKind::Image, "https://img/2.png");

        let mut outputs = Vec::new();
        for _ in 0..3 {
            outputs.push(
                client
                    .generate(GenerateRequest::new(AgentKind::Image, "", "x"))
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(outputs, vec!["https://img/1.png", "https://img/2.png", "https://img/1.png"]);
        assert_eq!(client.calls_for(AgentKind::Image), 3);
    }

    #[tokio::test]
    async fn test_missing_script_errors() {
        let client = MockGenerativeClient::new();
        assert!(client
            .generate(GenerateRequest::new(AgentKind::Plan, "", "x"))
            .await
            .is_err());
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_failing_client_records_calls() {
        let client = MockGenerativeClient::failing().with_response(AgentKind::Plan, "{}");
        assert!(client
            .generate(GenerateRequest::new(AgentKind::Plan, "", "x"))
            .await
            .is_err());
        assert_eq!(client.calls()[0].prompt, "x");
    }
}
