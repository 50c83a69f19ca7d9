//! Append-only JSONL mirror of ledger transactions

use kiln_core::{KilnError, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::ledger::Transaction;

/// One JSON object per line, appended in mutation order
#[derive(Debug)]
pub struct TransactionJournal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TransactionJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, txn: &Transaction) -> Result<()> {
        let mut line = serde_json::to_string(txn)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        debug!(kind = %txn.kind, amount = txn.amount, "journaled transaction");
        Ok(())
    }

    /// Read every journaled transaction back
    pub async fn read_all(&self) -> Result<Vec<Transaction>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio::fs::read_to_string(&self.path).await?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(n, line)| {
                serde_json::from_str(line).map_err(|e| {
                    KilnError::Parse(format!("journal line {}: {}", n + 1, e))
                })
            })
            .collect()
    }
}
