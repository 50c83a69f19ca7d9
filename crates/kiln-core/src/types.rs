//! Core type definitions for Kiln orchestration

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Credit amounts are whole units
pub type Credits = u64;

/// Identifier of a single build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(pub Uuid);

impl BuildId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex characters, for log lines
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a credit-holding account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a credit reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationId(pub Uuid);

impl ReservationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ReservationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rsv-{}", self.0)
    }
}

/// The five generation agents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Plan,
    Image,
    Frontend,
    Backend,
    Test,
}

impl AgentKind {
    /// All agents in pipeline order
    pub const ALL: [AgentKind; 5] = [
        AgentKind::Plan,
        AgentKind::Image,
        AgentKind::Frontend,
        AgentKind::Backend,
        AgentKind::Test,
    ];
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::Image => write!(f, "image"),
            Self::Frontend => write!(f, "frontend"),
            Self::Backend => write!(f, "backend"),
            Self::Test => write!(f, "test"),
        }
    }
}

impl std::str::FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plan" | "planner" => Ok(Self::Plan),
            "image" => Ok(Self::Image),
            "frontend" => Ok(Self::Frontend),
            "backend" => Ok(Self::Backend),
            "test" | "testing" => Ok(Self::Test),
            _ => Err(format!("Invalid agent kind: {}", s)),
        }
    }
}

/// Status of one agent invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Thinking,
    Working,
    Completed,
    Failed,
}

impl AgentStatus {
    /// Position in the forward-only lifecycle; both terminal states share a rank
    pub fn rank(&self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Thinking => 1,
            Self::Working => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Thinking => write!(f, "thinking"),
            Self::Working => write!(f, "working"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a whole build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A request to build one site
///
/// The build ID is assigned at construction so an observer can subscribe
/// to the event bus before the request is submitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: BuildId,
    pub account: AccountId,
    pub prompt: String,
    /// URLs of images the user uploaded alongside the prompt
    #[serde(default)]
    pub uploaded_images: Vec<String>,
    /// Model hint for the code-generating agents
    #[serde(default)]
    pub requested_model: Option<String>,
}

impl BuildRequest {
    pub fn new(account: impl Into<AccountId>, prompt: impl Into<String>) -> Self {
        Self {
            id: BuildId::new(),
            account: account.into(),
            prompt: prompt.into(),
            uploaded_images: Vec::new(),
            requested_model: None,
        }
    }

    pub fn with_uploaded_images(mut self, images: Vec<String>) -> Self {
        self.uploaded_images = images;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.requested_model = Some(model.into());
        self
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
