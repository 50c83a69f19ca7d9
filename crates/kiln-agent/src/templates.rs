//! Template library used for deterministic fallbacks

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Single-page HTML landing document
    Landing,
    /// Minimal backend service
    BackendStub,
}

impl std::fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Landing => write!(f, "landing"),
            Self::BackendStub => write!(f, "backend_stub"),
        }
    }
}

/// Source of fallback documents
pub trait TemplateLibrary: Send + Sync {
    fn lookup(&self, kind: TemplateKind) -> Option<String>;
}

/// Replace every `{{key}}` with its value
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}

const LANDING: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{{project_name}}</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; }
        .hero { min-height: 100vh; display: flex; align-items: center; justify-content: center;
                background: linear-gradient(135deg, {{primary}} 0%, {{secondary}} 100%);
                color: white; text-align: center; padding: 2rem; }
        .hero h1 { font-size: 3rem; margin-bottom: 1rem; }
        .hero p { font-size: 1.25rem; margin-bottom: 2rem; }
        .cta { padding: 1rem 2rem; background: white; color: {{primary}}; border: none;
               border-radius: 8px; font-size: 1.125rem; cursor: pointer; }
    </style>
</head>
<body>
    <main class="hero">
        <div>
            <h1>{{project_name}}</h1>
            <p>{{tagline}}</p>
            <button class="cta">Get Started</button>
        </div>
    </main>
</body>
</html>
"#;

const BACKEND_STUB: &str = r#""""{{project_name}} API"""

from fastapi import FastAPI
from fastapi.middleware.cors import CORSMiddleware

app = FastAPI(title="{{project_name}} API")

app.add_middleware(
    CORSMiddleware,
    allow_origins=["*"],
    allow_methods=["*"],
    allow_headers=["*"],
)


@app.get("/api/health")
async def health():
    return {"status": "ok"}
"#;

/// Templates compiled into the binary
#[derive(Debug, Clone)]
pub struct BuiltinTemplates {
    templates: HashMap<TemplateKind, &'static str>,
}

impl BuiltinTemplates {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(TemplateKind::Landing, LANDING);
        templates.insert(TemplateKind::BackendStub, BACKEND_STUB);
        Self { templates }
    }

    /// Library with one template removed
    pub fn without(mut self, kind: TemplateKind) -> Self {
        self.templates.remove(&kind);
        self
    }
}

impl Default for BuiltinTemplates {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateLibrary for BuiltinTemplates {
    fn lookup(&self, kind: TemplateKind) -> Option<String> {
        self.templates.get(&kind).map(|t| t.to_string())
    }
}
