//! # kiln-metrics
//!
//! Telemetry for Kiln builds.
//!
//! This crate provides:
//! - Per-agent and per-build metrics collection
//! - Global counters across builds
//! - Append-only JSON lines storage

mod collector;
mod storage;

pub use collector::{AgentMetrics, BuildMetrics, GlobalMetrics, MetricsCollector};
pub use storage::MetricsStorage;
