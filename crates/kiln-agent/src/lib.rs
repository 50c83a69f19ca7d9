//! # kiln-agent
//!
//! The five generation agents and the services they delegate to.
//!
//! Each agent turns a typed input into a typed output by way of a
//! [`GenerativeClient`]. When the client errors, times out or returns
//! something unparseable, the agent produces a deterministic fallback instead
//! of failing. An agent ends `Failed` only when no fallback can be built.
//!
//! Progress is reported through an [`AgentTracker`], which validates status
//! transitions and publishes them to the build's event bus.

pub mod agents;
mod auth;
mod circuit_breaker;
mod client;
mod mock;
pub mod parser;
mod templates;
mod tracker;
mod types;
mod validator;

pub use agents::{
    determine_image_needs, Agent, AgentResult, AgentSettings, BackendAgent, BackendOutput,
    FrontendAgent, FrontendInput, ImageAgent, ImageFeed, ImageInput, ImagePublisher, PlanAgent,
    TestAgent, TestInput, BACKEND_ENTRYPOINT,
};
pub use auth::get_auth_token;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::{AnthropicClient, GenerativeClient, ModelRouter, OfflineClient};
pub use mock::MockGenerativeClient;
pub use templates::{render, BuiltinTemplates, TemplateKind, TemplateLibrary};
pub use tracker::AgentTracker;
pub use types::*;
pub use validator::{BasicValidator, Validator, FRONTEND_PATH, PLACEHOLDER_HOSTS};
