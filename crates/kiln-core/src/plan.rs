//! The structured plan every downstream agent consumes
//!
//! Deserialization is lenient: generative output that omits fields still
//! yields a usable plan, with defaults filled in.

use serde::{Deserialize, Serialize};

/// Kind of site being generated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    #[default]
    LandingPage,
    Webapp,
    Ecommerce,
    Blog,
    Portfolio,
    Saas,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LandingPage => write!(f, "landing_page"),
            Self::Webapp => write!(f, "webapp"),
            Self::Ecommerce => write!(f, "ecommerce"),
            Self::Blog => write!(f, "blog"),
            Self::Portfolio => write!(f, "portfolio"),
            Self::Saas => write!(f, "saas"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub sections: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorScheme {
    #[serde(default = "default_primary")]
    pub primary: String,
    #[serde(default = "default_secondary")]
    pub secondary: String,
    #[serde(default = "default_accent")]
    pub accent: String,
    #[serde(default = "default_background")]
    pub background: String,
    #[serde(default = "default_text")]
    pub text: String,
    #[serde(default = "default_theme")]
    pub theme: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendRequirements {
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub database_collections: Vec<String>,
    #[serde(default)]
    pub authentication: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageRequirement {
    /// hero, feature, product, ...
    #[serde(rename = "type", default = "default_image_kind")]
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dimensions: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

/// Output of the plan agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub project_type: ProjectType,
    #[serde(default)]
    pub pages: Vec<PageSpec>,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub color_scheme: ColorScheme,
    #[serde(default)]
    pub needs_backend: bool,
    #[serde(default)]
    pub backend_requirements: Option<BackendRequirements>,
    #[serde(default)]
    pub image_requirements: Vec<ImageRequirement>,
}

impl Plan {
    /// Minimal single-page landing plan built from the prompt alone
    pub fn fallback(prompt: &str) -> Self {
        let prompt = prompt.trim();
        Self {
            project_name: project_name_from_prompt(prompt),
            tagline: "Build your online presence".to_string(),
            description: prompt.to_string(),
            project_type: ProjectType::LandingPage,
            pages: vec![PageSpec {
                name: "home".to_string(),
                purpose: "Main landing page".to_string(),
                sections: vec![
                    "hero".to_string(),
                    "features".to_string(),
                    "contact".to_string(),
                ],
            }],
            features: vec![Feature {
                name: "Responsive Design".to_string(),
                description: "Works on all devices".to_string(),
                priority: Some("critical".to_string()),
            }],
            color_scheme: ColorScheme::default(),
            needs_backend: false,
            backend_requirements: None,
            image_requirements: Vec::new(),
        }
    }
}

/// Title-case the first few words of the prompt, or a generic name
fn project_name_from_prompt(prompt: &str) -> String {
    let words: Vec<String> = prompt
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .take(4)
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        default_project_name()
    } else {
        words.join(" ")
    }
}

impl Default for ColorScheme {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
            accent: default_accent(),
            background: default_background(),
            text: default_text(),
            theme: default_theme(),
        }
    }
}

// Default value providers
fn default_project_name() -> String {
    "Website Project".to_string()
}

fn default_image_kind() -> String {
    "generic".to_string()
}

fn default_primary() -> String {
    "#6366f1".to_string()
}

fn default_secondary() -> String {
    "#8b5cf6".to_string()
}

fn default_accent() -> String {
    "#ec4899".to_string()
}

fn default_background() -> String {
    "#ffffff".to_string()
}

fn default_text() -> String {
    "#1f2937".to_string()
}

fn default_theme() -> String {
    "modern".to_string()
}
