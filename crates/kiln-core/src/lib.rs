//! # kiln-core
//!
//! Core types for the Kiln build orchestration system.
//!
//! A build turns a single prompt into a generated site by running five
//! generation agents (plan, image, frontend, backend, test). This crate holds
//! everything those agents and the orchestrator share:
//!
//! - The data model: [`BuildRequest`], [`Plan`], [`AgentRun`], [`BuildArtifact`], [`Event`]
//! - The [`EventBus`] that streams progress to one observer per build
//! - [`Context`], which carries a deadline and a cancellation signal
//! - [`KilnConfig`], loaded from `.kiln/config.toml`
//!
//! ## Invariants
//!
//! - A plan always exists after the planning stage (parsed or fallback)
//! - Agent status only moves forward and never leaves a terminal state
//! - Artifacts are frozen once the build reaches a terminal status

pub mod artifact;
pub mod bus;
pub mod config;
pub mod context;
mod error;
pub mod event;
pub mod fail_open;
pub mod plan;
pub mod run;
mod types;

pub use artifact::{ArtifactDraft, BuildArtifact, BuildFailure, ImageRef, IssueSeverity, TestIssue, TestReport};
pub use bus::EventBus;
pub use config::{KilnConfig, Pricing};
pub use context::{CancelHandle, Context};
pub use error::{KilnError, Result};
pub use event::{Event, EventKind};
pub use plan::Plan;
pub use run::{transition, AgentRun};
pub use types::*;
