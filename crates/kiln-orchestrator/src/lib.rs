//! # kiln-orchestrator
//!
//! Build orchestration engine for Kiln.
//!
//! This crate provides:
//! - The [`Orchestrator`], which runs the five agents of a build in
//!   dependency order with image, frontend and backend in parallel
//! - Credit reservation up front and settlement once the build ends
//! - Assembly of the final file set

mod assembly;
mod orchestrator;

pub use assembly::{generate_readme, inject_images, README_PATH};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
