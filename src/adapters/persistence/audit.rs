//! Audit Log - Append-only JSONL Record History
//!
//! Every record write is appended to a daily file `audit/YYYY-MM-DD.jsonl`.
//! Each line is a self-contained JSON object; the log is never rewritten.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// One audited write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    /// Record kind: `signal`, `position`, `account`, `agent`.
    pub kind: String,
    /// `create`, `update` or `upsert`.
    pub action: String,
    pub id: String,
    /// Full record after the write.
    pub record: serde_json::Value,
}

/// Daily-rotated JSONL audit log.
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        let dir = data_dir.join("audit");
        fs::create_dir_all(&dir)
            .await
            .context("Failed to create audit directory")?;
        Ok(Self { dir })
    }

    /// Append one entry to the file for the entry's date.
    pub async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let path = self
            .dir
            .join(format!("{}.jsonl", entry.at.format("%Y-%m-%d")));

        let mut line = serde_json::to_string(entry).context("Failed to serialize audit entry")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open audit log file")?;

        file.write_all(line.as_bytes())
            .await
            .context("Failed to write audit entry")?;
        file.flush().await.context("Failed to flush audit log")?;
        Ok(())
    }

    /// Read every entry across all days, oldest first.
    pub async fn load_all(&self) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(file) = dir.next_entry().await? {
            let path = file.path();
            if path.extension().is_none_or(|ext| ext != "jsonl") {
                continue;
            }
            let content = fs::read_to_string(&path).await?;
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<AuditEntry>(line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(
                        file = %path.display(),
                        error = %e,
                        "Skipping malformed audit entry"
                    ),
                }
            }
        }

        entries.sort_by_key(|e| e.at);
        Ok(entries)
    }
}
