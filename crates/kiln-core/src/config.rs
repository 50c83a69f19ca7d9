//! Configuration management for Kiln
//!
//! Agent prices, timeouts, image generation limits, event buffering and model
//! selection. Loaded from `.kiln/config.toml`; every field has a default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::types::{AgentKind, Credits};
use crate::{KilnError, Result};

/// Workspace-level Kiln configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KilnConfig {
    /// Credit cost of each agent
    #[serde(default)]
    pub pricing: Pricing,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub images: ImageLimits,

    #[serde(default)]
    pub events: EventSettings,

    #[serde(default)]
    pub models: ModelConfig,
}

/// Credit cost per agent invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default = "default_plan_price")]
    pub plan: Credits,
    #[serde(default = "default_image_price")]
    pub image: Credits,
    #[serde(default = "default_frontend_price")]
    pub frontend: Credits,
    #[serde(default = "default_backend_price")]
    pub backend: Credits,
    #[serde(default = "default_test_price")]
    pub test: Credits,
}

impl Pricing {
    pub fn price(&self, agent: AgentKind) -> Credits {
        match agent {
            AgentKind::Plan => self.plan,
            AgentKind::Image => self.image,
            AgentKind::Frontend => self.frontend,
            AgentKind::Backend => self.backend,
            AgentKind::Test => self.test,
        }
    }

    /// Upper bound of a build's cost: every agent runs
    pub fn ceiling(&self) -> Credits {
        AgentKind::ALL.iter().map(|a| self.price(*a)).sum()
    }

    /// Cost of the given set of agents
    pub fn cost_of<'a>(&self, agents: impl IntoIterator<Item = &'a AgentKind>) -> Credits {
        agents.into_iter().map(|a| self.price(*a)).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeouts {
    /// Whole-build deadline
    #[serde(default = "default_build_secs")]
    pub build_secs: u64,
    /// Per-agent deadline, nested inside the build deadline
    #[serde(default = "default_agent_secs")]
    pub agent_secs: u64,
    /// Per generative call
    #[serde(default = "default_generate_secs")]
    pub generate_secs: u64,
    /// How long Frontend waits for images at its sync point
    #[serde(default = "default_image_join_ms")]
    pub image_join_ms: u64,
    /// How long in-flight agents get to finish after cancellation
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

impl Timeouts {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn agent(&self) -> Duration {
        Duration::from_secs(self.agent_secs)
    }

    pub fn generate(&self) -> Duration {
        Duration::from_secs(self.generate_secs)
    }

    pub fn image_join(&self) -> Duration {
        Duration::from_millis(self.image_join_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageLimits {
    /// Concurrent image generations per build
    #[serde(default = "default_image_concurrency")]
    pub max_concurrency: usize,
    /// Images generated per build
    #[serde(default = "default_max_images")]
    pub max_images: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSettings {
    /// Per-build channel capacity; events beyond it are dropped
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
}

/// Model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used by the plan and test agents
    #[serde(default = "default_planner_model")]
    pub planner: String,

    /// Model used by the frontend and backend agents
    #[serde(default = "default_code_model")]
    pub code: String,

    /// Image model hint, when an image-capable client is configured
    #[serde(default)]
    pub image: Option<String>,

    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

// Default value providers
fn default_plan_price() -> Credits {
    2
}

fn default_image_price() -> Credits {
    3
}

fn default_frontend_price() -> Credits {
    5
}

fn default_backend_price() -> Credits {
    4
}

fn default_test_price() -> Credits {
    1
}

fn default_build_secs() -> u64 {
    600
}

fn default_agent_secs() -> u64 {
    180
}

fn default_generate_secs() -> u64 {
    120
}

fn default_image_join_ms() -> u64 {
    500
}

fn default_drain_grace_ms() -> u64 {
    2000
}

fn default_image_concurrency() -> usize {
    3
}

fn default_max_images() -> usize {
    3
}

fn default_event_buffer() -> usize {
    256
}

fn default_planner_model() -> String {
    "claude-sonnet-4".to_string()
}

fn default_code_model() -> String {
    "claude-sonnet-4".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

impl KilnConfig {
    /// Load configuration from `.kiln/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".kiln/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| KilnError::Config(format!("Failed to parse config file: {}", e)))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.kiln/config.toml`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".kiln");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| KilnError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Reject values that would stall a build
    pub fn validate(&self) -> Result<()> {
        if self.images.max_concurrency == 0 {
            return Err(KilnError::Config(
                "images.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.events.buffer == 0 {
            return Err(KilnError::Config("events.buffer must be at least 1".to_string()));
        }
        if self.timeouts.agent_secs == 0 || self.timeouts.generate_secs == 0 {
            return Err(KilnError::Config(
                "agent and generate timeouts must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            plan: default_plan_price(),
            image: default_image_price(),
            frontend: default_frontend_price(),
            backend: default_backend_price(),
            test: default_test_price(),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            build_secs: default_build_secs(),
            agent_secs: default_agent_secs(),
            generate_secs: default_generate_secs(),
            image_join_ms: default_image_join_ms(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            max_concurrency: default_image_concurrency(),
            max_images: default_max_images(),
        }
    }
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            buffer: default_event_buffer(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            planner: default_planner_model(),
            code: default_code_model(),
            image: None,
            api_key_env: default_api_key_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_pricing_ceiling() {
        let pricing = Pricing::default();
        assert_eq!(pricing.price(AgentKind::Frontend), 5);
        assert_eq!(pricing.ceiling(), 15);
        assert_eq!(
            pricing.cost_of(&[AgentKind::Plan, AgentKind::Test]),
            3
        );
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = KilnConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.events.buffer, 256);
        assert_eq!(config.timeouts.image_join(), Duration::from_millis(500));
    }

    #[test]
    fn test_write_then_load_default() {
        let dir = TempDir::new().unwrap();
        KilnConfig::write_default(dir.path()).unwrap();
        assert!(dir.path().join(".kiln/config.toml").exists());

        let config = KilnConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.pricing, Pricing::default());
        assert_eq!(config.images.max_images, 3);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".kiln")).unwrap();
        std::fs::write(
            dir.path().join(".kiln/config.toml"),
            "[pricing]\nbackend = 0\n\n[images]\nmax_images = 1\n",
        )
        .unwrap();

        let config = KilnConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config.pricing.backend, 0);
        assert_eq!(config.pricing.frontend, 5);
        assert_eq!(config.images.max_images, 1);
        assert_eq!(config.images.max_concurrency, 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".kiln")).unwrap();
        std::fs::write(
            dir.path().join(".kiln/config.toml"),
            "[events]\nbuffer = 0\n",
        )
        .unwrap();

        let err = KilnConfig::load_or_default(dir.path()).unwrap_err();
        assert!(matches!(err, KilnError::Config(_)));
    }
}
