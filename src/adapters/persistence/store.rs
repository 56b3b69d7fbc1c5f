//! JSON Store — Concrete Adapter for the Repository Port
//!
//! Holds every record in memory behind a `tokio::sync::RwLock` and, when
//! backed by a directory, persists each write as a full `state.json`
//! snapshot plus one audit line. Writes are serialized by the lock, so
//! the snapshot on disk always reflects a prefix of the write history.
//!
//! `JsonStore::ephemeral()` keeps everything in memory only (tests,
//! throwaway dry runs).
//!
//! Rejected and non-ambiguous failed signals are kept up to a per-agent
//! retention bound, newest first; older ones are dropped from the tables
//! and the snapshot. Their full history stays in the audit log.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use super::audit::{AuditEntry, AuditLog};
use super::snapshot::{SNAPSHOT_VERSION, SnapshotFile, StoreSnapshot};
use crate::domain::error::BotError;
use crate::domain::{
    Account, Agent, AgentStatus, Position, PositionId, PositionStatus, Signal, SignalId,
    SignalStatus,
};
use crate::ports::repository::Repository;

/// Terminal signals kept per agent unless configured otherwise.
pub const DEFAULT_SIGNAL_RETENTION: usize = 500;

#[derive(Default)]
struct Tables {
    signals: HashMap<SignalId, Signal>,
    positions: HashMap<PositionId, Position>,
    accounts: BTreeMap<String, Account>,
    agents: BTreeMap<String, Agent>,
}

impl Tables {
    fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            signals: snapshot.signals.into_iter().map(|s| (s.id, s)).collect(),
            positions: snapshot.positions.into_iter().map(|p| (p.id, p)).collect(),
            accounts: snapshot
                .accounts
                .into_iter()
                .map(|a| (a.id.clone(), a))
                .collect(),
            agents: snapshot
                .agents
                .into_iter()
                .map(|a| (a.id.clone(), a))
                .collect(),
        }
    }

    /// Drop the oldest terminal signals of `agent_id` beyond `retain`.
    fn compact_agent(&mut self, agent_id: &str, retain: usize) -> usize {
        let mut terminal: Vec<_> = self
            .signals
            .values()
            .filter(|s| s.agent_id == agent_id && is_compactable(s))
            .map(|s| (s.detected_at, s.id))
            .collect();
        if terminal.len() <= retain {
            return 0;
        }
        terminal.sort_unstable();
        let excess = terminal.len() - retain;
        for (_, id) in &terminal[..excess] {
            self.signals.remove(id);
        }
        excess
    }

    fn compact(&mut self, retain: usize) -> usize {
        let mut agents: Vec<String> = self.signals.values().map(|s| s.agent_id.clone()).collect();
        agents.sort_unstable();
        agents.dedup();
        agents
            .iter()
            .map(|agent_id| self.compact_agent(agent_id, retain))
            .sum()
    }

    fn snapshot(&self) -> StoreSnapshot {
        let mut signals: Vec<_> = self.signals.values().cloned().collect();
        signals.sort_by_key(|s| (s.detected_at, s.id));
        let mut positions: Vec<_> = self.positions.values().cloned().collect();
        positions.sort_by_key(|p| (p.entered_at, p.id));
        StoreSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: Some(Utc::now()),
            signals,
            positions,
            accounts: self.accounts.values().cloned().collect(),
            agents: self.agents.values().cloned().collect(),
        }
    }
}

/// Rejected, or failed with a known outcome. Only the status report
/// reads these again.
fn is_compactable(signal: &Signal) -> bool {
    match signal.status {
        SignalStatus::Rejected => true,
        SignalStatus::Failed => !signal.is_ambiguous(),
        _ => false,
    }
}

struct Disk {
    snapshot: SnapshotFile,
    audit: AuditLog,
}

/// File-backed (or in-memory) record store.
pub struct JsonStore {
    tables: RwLock<Tables>,
    disk: Option<Disk>,
    signal_retention: usize,
}

impl JsonStore {
    /// Open (or create) a store in `dir`, loading `state.json` if present.
    #[instrument]
    pub async fn open(dir: &Path) -> Result<Self> {
        let snapshot = SnapshotFile::new(dir).await?;
        let audit = AuditLog::new(dir).await?;
        let tables = snapshot
            .load()
            .await?
            .map(Tables::from_snapshot)
            .unwrap_or_default();
        info!(
            dir = %dir.display(),
            signals = tables.signals.len(),
            positions = tables.positions.len(),
            "Record store opened"
        );
        Ok(Self {
            tables: RwLock::new(tables),
            disk: Some(Disk { snapshot, audit }),
            signal_retention: DEFAULT_SIGNAL_RETENTION,
        })
    }

    /// In-memory store with no persistence.
    pub fn ephemeral() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            disk: None,
            signal_retention: DEFAULT_SIGNAL_RETENTION,
        }
    }

    /// Keep at most `retain` rejected or failed signals per agent.
    ///
    /// Applies to records already loaded; the next write persists the result.
    pub fn with_signal_retention(mut self, retain: usize) -> Self {
        self.signal_retention = retain;
        let dropped = self.tables.get_mut().compact(retain);
        if dropped > 0 {
            info!(dropped, retain, "Compacted terminal signals");
        }
        self
    }

    /// Audit trail, if the store is file-backed.
    pub async fn audit_entries(&self) -> Result<Vec<AuditEntry>> {
        match &self.disk {
            Some(disk) => disk.audit.load_all().await,
            None => Ok(Vec::new()),
        }
    }

    /// Persist after a write. Must be called with the write lock held.
    async fn persist<T: Serialize>(
        &self,
        tables: &Tables,
        kind: &str,
        action: &str,
        id: String,
        record: &T,
    ) -> Result<()> {
        let Some(disk) = &self.disk else {
            return Ok(());
        };
        disk.snapshot.save(&tables.snapshot()).await?;
        disk.audit
            .append(&AuditEntry {
                at: Utc::now(),
                kind: kind.to_string(),
                action: action.to_string(),
                id,
                record: serde_json::to_value(record)?,
            })
            .await
    }
}

fn not_found(kind: &'static str, id: impl ToString) -> anyhow::Error {
    BotError::NotFound {
        kind,
        id: id.to_string(),
    }
    .into()
}

#[async_trait]
impl Repository for JsonStore {
    async fn create_signal(&self, signal: &Signal) -> Result<()> {
        let mut tables = self.tables.write().await;
        anyhow::ensure!(
            !tables.signals.contains_key(&signal.id),
            "signal {} already exists",
            signal.id
        );
        tables.signals.insert(signal.id, signal.clone());
        self.persist(&tables, "signal", "create", signal.id.to_string(), signal)
            .await
    }

    async fn update_signal(&self, signal: &Signal) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .signals
            .get_mut(&signal.id)
            .ok_or_else(|| not_found("signal", signal.id))?;
        *slot = signal.clone();
        if is_compactable(signal) {
            let dropped = tables.compact_agent(&signal.agent_id, self.signal_retention);
            if dropped > 0 {
                debug!(agent_id = %signal.agent_id, dropped, "Compacted terminal signals");
            }
        }
        self.persist(&tables, "signal", "update", signal.id.to_string(), signal)
            .await
    }

    async fn get_signal(&self, id: SignalId) -> Result<Option<Signal>> {
        Ok(self.tables.read().await.signals.get(&id).cloned())
    }

    async fn signals_by_status(&self, status: SignalStatus) -> Result<Vec<Signal>> {
        let tables = self.tables.read().await;
        let mut out: Vec<_> = tables
            .signals
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.detected_at, s.id));
        Ok(out)
    }

    async fn create_position(&self, position: &Position) -> Result<()> {
        let mut tables = self.tables.write().await;
        anyhow::ensure!(
            !tables.positions.contains_key(&position.id),
            "position {} already exists",
            position.id
        );
        let duplicate = position.is_open()
            && tables.positions.values().any(|p| {
                p.is_open() && p.account_id == position.account_id && p.market_id == position.market_id
            });
        if duplicate {
            return Err(BotError::DuplicatePosition {
                account_id: position.account_id.clone(),
                market_id: position.market_id.clone(),
            }
            .into());
        }
        tables.positions.insert(position.id, position.clone());
        self.persist(&tables, "position", "create", position.id.to_string(), position)
            .await
    }

    async fn update_position(&self, position: &Position) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .positions
            .get_mut(&position.id)
            .ok_or_else(|| not_found("position", position.id))?;
        *slot = position.clone();
        self.persist(&tables, "position", "update", position.id.to_string(), position)
            .await
    }

    async fn positions_by_status(&self, status: PositionStatus) -> Result<Vec<Position>> {
        let tables = self.tables.read().await;
        let mut out: Vec<_> = tables
            .positions
            .values()
            .filter(|p| p.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.entered_at, p.id));
        Ok(out)
    }

    async fn position_for_signal(&self, signal_id: SignalId) -> Result<Option<Position>> {
        let tables = self.tables.read().await;
        Ok(tables
            .positions
            .values()
            .find(|p| p.signal_id == signal_id)
            .cloned())
    }

    async fn positions_for_account(&self, account_id: &str) -> Result<Vec<Position>> {
        let tables = self.tables.read().await;
        let mut out: Vec<_> = tables
            .positions
            .values()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect();
        out.sort_by_key(|p| (p.entered_at, p.id));
        Ok(out)
    }

    async fn upsert_account(&self, account: &Account) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.accounts.insert(account.id.clone(), account.clone());
        self.persist(&tables, "account", "upsert", account.id.clone(), account)
            .await
    }

    async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.tables.read().await.accounts.get(id).cloned())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.agents.insert(agent.id.clone(), agent.clone());
        self.persist(&tables, "agent", "upsert", agent.id.clone(), agent)
            .await
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.tables.read().await.agents.get(id).cloned())
    }

    async fn agents_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .agents
            .values()
            .filter(|a| a.status == status)
            .cloned()
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        match &self.disk {
            Some(disk) => disk.snapshot.is_healthy().await,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::{Outcome, SignalReason, StrategyConfig, VerificationResult};

    fn signal(market: &str) -> Signal {
        Signal::detected(
            "agent".into(),
            "acct".into(),
            market.into(),
            "q".into(),
            None,
            Outcome::Yes,
            "tok".into(),
            dec!(0.85),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_second_open_position_is_rejected() {
        let store = JsonStore::ephemeral();
        let s1 = signal("m1");
        let s2 = signal("m1");
        store
            .create_position(&Position::open(&s1, dec!(10), dec!(0.85), Utc::now()))
            .await
            .unwrap();
        let err = store
            .create_position(&Position::open(&s2, dec!(10), dec!(0.85), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(
            BotError::find(&err),
            Some(BotError::DuplicatePosition { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_position_frees_market() {
        let store = JsonStore::ephemeral();
        let s1 = signal("m1");
        let mut p = Position::open(&s1, dec!(10), dec!(0.85), Utc::now());
        store.create_position(&p).await.unwrap();
        p.close(dec!(1), Utc::now()).unwrap();
        store.update_position(&p).await.unwrap();
        let s2 = signal("m1");
        store
            .create_position(&Position::open(&s2, dec!(10), dec!(0.9), Utc::now()))
            .await
            .unwrap();
        assert_eq!(store.positions_for_account("acct").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_unknown_signal_is_not_found() {
        let store = JsonStore::ephemeral();
        let err = store.update_signal(&signal("m")).await.unwrap_err();
        assert!(matches!(BotError::find(&err), Some(BotError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_reopen_restores_records_and_audit() {
        let dir = tempfile::tempdir().unwrap();
        let s = signal("m1");
        {
            let store = JsonStore::open(dir.path()).await.unwrap();
            store.create_signal(&s).await.unwrap();
            let agent = Agent::new("a".into(), "A".into(), "acct".into(), StrategyConfig::default());
            store.upsert_agent(&agent).await.unwrap();
        }
        let store = JsonStore::open(dir.path()).await.unwrap();
        assert_eq!(store.get_signal(s.id).await.unwrap(), Some(s));
        assert!(store.get_agent("a").await.unwrap().is_some());
        let audit = store.audit_entries().await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].kind, "signal");
    }

    async fn reject(store: &JsonStore, agent: &str, market: &str, age_secs: i64) -> Signal {
        let mut s = signal(market);
        s.agent_id = agent.into();
        s.detected_at = Utc::now() - chrono::Duration::seconds(age_secs);
        store.create_signal(&s).await.unwrap();
        s.reject(SignalReason::NotFilled, Utc::now()).unwrap();
        store.update_signal(&s).await.unwrap();
        s
    }

    #[tokio::test]
    async fn test_terminal_signals_beyond_retention_are_compacted() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap().with_signal_retention(2);
        let oldest = reject(&store, "a", "m1", 30).await;
        let middle = reject(&store, "a", "m2", 20).await;
        let other_agent = reject(&store, "b", "m3", 40).await;
        let newest = reject(&store, "a", "m4", 10).await;
        let live = signal("m5");
        store.create_signal(&live).await.unwrap();

        assert!(store.get_signal(oldest.id).await.unwrap().is_none());
        assert!(store.get_signal(middle.id).await.unwrap().is_some());
        assert!(store.get_signal(newest.id).await.unwrap().is_some());
        assert!(store.get_signal(other_agent.id).await.unwrap().is_some());
        assert!(store.get_signal(live.id).await.unwrap().is_some());
        drop(store);

        let reopened = JsonStore::open(dir.path()).await.unwrap();
        let rejected = reopened.signals_by_status(SignalStatus::Rejected).await.unwrap();
        assert_eq!(rejected.len(), 3);
        let audit = reopened.audit_entries().await.unwrap();
        assert!(audit.iter().any(|e| e.id == oldest.id.to_string()));
    }

    #[tokio::test]
    async fn test_ambiguous_failures_are_never_compacted() {
        let store = JsonStore::ephemeral().with_signal_retention(0);
        let mut s = signal("m1");
        let now = Utc::now();
        let result = VerificationResult {
            signal_id: s.id,
            confidence: 0.98,
            rationale: "final".into(),
            verified_at: now,
        };
        s.verify(result, now).unwrap();
        s.begin_execution(dec!(10), dec!(0.87), now).unwrap();
        store.create_signal(&s).await.unwrap();
        s.fail(
            SignalReason::ExecutionAmbiguous {
                error: "timeout".into(),
            },
            Utc::now(),
        )
        .unwrap();
        store.update_signal(&s).await.unwrap();
        assert!(store.get_signal(s.id).await.unwrap().is_some());

        reject(&store, "agent", "m2", 5).await;
        assert_eq!(store.signals_by_status(SignalStatus::Rejected).await.unwrap().len(), 0);
    }
}
