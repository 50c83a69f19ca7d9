//! Progress events streamed to a build's observer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentKind, AgentStatus, BuildId, BuildStatus};

/// What changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum EventKind {
    Agent { agent: AgentKind, status: AgentStatus },
    Build { status: BuildStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub build_id: BuildId,
    pub kind: EventKind,
    pub progress: u8,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn agent(
        build_id: BuildId,
        agent: AgentKind,
        status: AgentStatus,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            build_id,
            kind: EventKind::Agent { agent, status },
            progress,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn build(build_id: BuildId, status: BuildStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            build_id,
            kind: EventKind::Build { status },
            progress,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// Agent this event belongs to, if any
    pub fn agent_kind(&self) -> Option<AgentKind> {
        match self.kind {
            EventKind::Agent { agent, .. } => Some(agent),
            EventKind::Build { .. } => None,
        }
    }

    /// Terminal build status event
    pub fn is_final(&self) -> bool {
        matches!(self.kind, EventKind::Build { status } if status.is_terminal())
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            EventKind::Agent { agent, status } => write!(
                f,
                "[{:>8}] {:<9} {:>3}% {}",
                agent, status, self.progress, self.message
            ),
            EventKind::Build { status } => {
                write!(f, "[   build] {:<9} {:>3}% {}", status, self.progress, self.message)
            }
        }
    }
}
