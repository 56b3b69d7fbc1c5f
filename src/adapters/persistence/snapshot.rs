//! Snapshot File - Atomic JSON Store Persistence
//!
//! Saves the full record set to `state.json` using atomic writes
//! (write to tmp file, then rename). The file on disk is always either
//! the previous or the new snapshot, never a partial write.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::domain::{Account, Agent, Position, Signal};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Every record the store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub signals: Vec<Signal>,
    #[serde(default)]
    pub positions: Vec<Position>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub agents: Vec<Agent>,
}

/// Atomic `state.json` writer/reader.
pub struct SnapshotFile {
    state_path: PathBuf,
    tmp_path: PathBuf,
}

impl SnapshotFile {
    /// Create the data directory if needed.
    pub async fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .await
            .context("Failed to create data directory")?;

        Ok(Self {
            state_path: dir.join("state.json"),
            tmp_path: dir.join("state.json.tmp"),
        })
    }

    /// Write a snapshot atomically (tmp → rename).
    pub async fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot).context("Failed to serialize state")?;

        fs::write(&self.tmp_path, &json)
            .await
            .context("Failed to write tmp state file")?;

        fs::rename(&self.tmp_path, &self.state_path)
            .await
            .context("Failed to rename state file")?;

        debug!(path = %self.state_path.display(), bytes = json.len(), "State snapshot saved");
        Ok(())
    }

    /// Load the last snapshot. `None` on first startup.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !fs::try_exists(&self.state_path).await.unwrap_or(false) {
            info!("No state file found, starting fresh");
            return Ok(None);
        }

        let json = fs::read(&self.state_path)
            .await
            .context("Failed to read state file")?;

        let snapshot: StoreSnapshot =
            serde_json::from_slice(&json).context("Failed to parse state JSON")?;
        anyhow::ensure!(
            snapshot.version <= SNAPSHOT_VERSION,
            "state.json version {} is newer than supported {}",
            snapshot.version,
            SNAPSHOT_VERSION
        );

        info!(
            signals = snapshot.signals.len(),
            positions = snapshot.positions.len(),
            agents = snapshot.agents.len(),
            "State snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// The data directory is still there and readable.
    pub async fn is_healthy(&self) -> bool {
        match self.state_path.parent() {
            Some(dir) => fs::metadata(dir).await.is_ok(),
            None => false,
        }
    }
}
