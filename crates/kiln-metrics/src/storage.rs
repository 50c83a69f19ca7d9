//! Append-only metrics storage

use kiln_core::{BuildId, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::collector::BuildMetrics;

/// Build metrics persisted as JSON lines
pub struct MetricsStorage {
    path: PathBuf,
}

impl MetricsStorage {
    pub fn append_file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store metrics for a build
    pub async fn store(&self, metrics: &BuildMetrics) -> Result<()> {
        let line = serde_json::to_string(metrics)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;

        debug!("Stored metrics for {} to {:?}", metrics.build_id, self.path);
        Ok(())
    }

    /// Load the latest metrics recorded for a build
    pub async fn load(&self, build_id: BuildId) -> Result<Option<BuildMetrics>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .rev()
            .find(|m| m.build_id == build_id))
    }

    /// Load all metrics; unparseable lines are skipped
    pub async fn load_all(&self) -> Result<Vec<BuildMetrics>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let mut all_metrics = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<BuildMetrics>(line) {
                Ok(metrics) => all_metrics.push(metrics),
                Err(e) => debug!("Failed to parse metrics line: {}", e),
            }
        }
        Ok(all_metrics)
    }
}
