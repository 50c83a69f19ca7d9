//! Type definitions for generative calls

use kiln_core::AgentKind;
use serde::{Deserialize, Serialize};

/// Claude model variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    Opus,
    #[default]
    Sonnet,
    Haiku,
}

impl Model {
    /// Get the API model name
    pub fn api_name(&self) -> &'static str {
        match self {
            Model::Opus => "claude-opus-4-20250514",
            Model::Sonnet => "claude-sonnet-4-5-20250929",
            Model::Haiku => "claude-haiku-3-5-20250929",
        }
    }

    /// Resolve a configured model hint to an API model name
    ///
    /// Short names (`sonnet`, `claude-sonnet-4`) map to the pinned version;
    /// anything else is passed through as a literal model id.
    pub fn resolve(hint: &str) -> String {
        let lower = hint.to_lowercase();
        let family = ["opus", "sonnet", "haiku"]
            .into_iter()
            .find(|f| lower == *f || lower == format!("claude-{}-4", f));
        match family.and_then(|f| f.parse::<Model>().ok()) {
            Some(model) => model.api_name().to_string(),
            None => hint.to_string(),
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Model::Opus => write!(f, "opus"),
            Model::Sonnet => write!(f, "sonnet"),
            Model::Haiku => write!(f, "haiku"),
        }
    }
}

impl std::str::FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "opus" => Ok(Model::Opus),
            "sonnet" => Ok(Model::Sonnet),
            "haiku" => Ok(Model::Haiku),
            _ => Err(format!("Invalid model: {}. Use opus, sonnet, or haiku.", s)),
        }
    }
}

/// One call to a generative service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Agent issuing the call; routers and mocks key on it
    pub agent: AgentKind,
    pub system: String,
    pub prompt: String,
    /// Model override; the client's default when absent
    pub model: Option<String>,
    pub max_tokens: usize,
}

impl GenerateRequest {
    pub const DEFAULT_MAX_TOKENS: usize = 8000;

    pub fn new(agent: AgentKind, system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent,
            system: system.into(),
            prompt: prompt.into(),
            model: None,
            max_tokens: Self::DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// Anthropic API message format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    pub content: String,
}

/// Anthropic API request format
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<AnthropicMessage>,
}

/// Anthropic API response format
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicResponse {
    #[allow(dead_code)]
    pub id: String,
    pub content: Vec<AnthropicContent>,
    pub usage: Option<Usage>,
}

/// Content block in Anthropic response
#[derive(Debug, Clone, Deserialize)]
pub struct AnthropicContent {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_str() {
        assert_eq!("opus".parse::<Model>().unwrap(), Model::Opus);
        assert_eq!("SONNET".parse::<Model>().unwrap(), Model::Sonnet);
        assert!("gpt".parse::<Model>().is_err());
    }

    #[test]
    fn test_resolve_model_hint() {
        assert_eq!(Model::resolve("sonnet"), Model::Sonnet.api_name());
        assert_eq!(Model::resolve("claude-opus-4"), Model::Opus.api_name());
        assert_eq!(Model::resolve("claude-3-7-sonnet-latest"), "claude-3-7-sonnet-latest");
    }

    #[test]
    fn test_request_skips_empty_system() {
        let request = AnthropicRequest {
            model: "m".to_string(),
            max_tokens: 10,
            system: None,
            messages: vec![],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("system").is_none());
    }
}
