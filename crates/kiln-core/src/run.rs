//! Agent run records and the status transition rules
//!
//! [`transition`] is pure and never panics: invalid moves come back as
//! [`KilnError::InvalidTransition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentKind, AgentStatus};
use crate::{KilnError, Result};

/// Validate a status change
///
/// Status only moves forward through Idle, Thinking, Working and a terminal
/// state. Forward skips are allowed, `Working -> Working` reports progress,
/// and nothing leaves a terminal state.
pub fn transition(from: AgentStatus, to: AgentStatus) -> Result<()> {
    let valid = if from.is_terminal() {
        false
    } else if from == AgentStatus::Working && to == AgentStatus::Working {
        true
    } else {
        to.rank() > from.rank()
    };

    if valid {
        Ok(())
    } else {
        Err(KilnError::InvalidTransition { from, to })
    }
}

/// Record of one agent invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub kind: AgentKind,
    pub status: AgentStatus,
    /// 0..=100, non-decreasing
    pub progress: u8,
    pub messages: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Output came from the deterministic fallback
    pub used_fallback: bool,
    /// Agent short-circuited without doing billable work
    pub skipped: bool,
    /// Reason for a Failed status
    pub failure: Option<String>,
}

impl AgentRun {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            status: AgentStatus::Idle,
            progress: 0,
            messages: Vec::new(),
            started_at: None,
            ended_at: None,
            used_fallback: false,
            skipped: false,
            failure: None,
        }
    }

    /// Apply a status change with progress and a message
    ///
    /// Progress lower than the current value is clamped up.
    pub fn advance(&mut self, to: AgentStatus, progress: u8, message: impl Into<String>) -> Result<()> {
        transition(self.status, to)?;

        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.ended_at = Some(now);
        }

        self.status = to;
        self.progress = progress.min(100).max(self.progress);
        self.messages.push(message.into());
        Ok(())
    }

    /// Whether the agent left Idle (billing uses this)
    pub fn started(&self) -> bool {
        self.status != AgentStatus::Idle
    }

    /// Started and did billable work
    pub fn is_billable(&self) -> bool {
        self.started() && !self.skipped
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn last_message(&self) -> Option<&str> {
        self.messages.last().map(String::as_str)
    }
}
