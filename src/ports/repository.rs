//! Repository Port - Durable Record Interface
//!
//! Defines the trait for persisting the bot's records: signals,
//! positions, accounts and agents. Records survive restarts; positions
//! are never deleted. A store may drop old rejected or failed signals
//! once they fall outside its retention bound.

use async_trait::async_trait;

use crate::domain::{
  Account, Agent, AgentStatus, Position, PositionStatus, Signal, SignalId, SignalStatus,
};

/// Trait for record stores.
///
/// Updates replace the stored record with the same id and fail with
/// `BotError::NotFound` if there is none.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Repository: Send + Sync + 'static {
  async fn create_signal(&self, signal: &Signal) -> anyhow::Result<()>;
  async fn update_signal(&self, signal: &Signal) -> anyhow::Result<()>;
  async fn get_signal(&self, id: SignalId) -> anyhow::Result<Option<Signal>>;
  async fn signals_by_status(&self, status: SignalStatus) -> anyhow::Result<Vec<Signal>>;

  /// Insert a new position.
  ///
  /// # Errors
  /// Returns `BotError::DuplicatePosition` if the account already holds an
  /// `Open` position in the same market.
  async fn create_position(&self, position: &Position) -> anyhow::Result<()>;
  async fn update_position(&self, position: &Position) -> anyhow::Result<()>;
  async fn positions_by_status(&self, status: PositionStatus) -> anyhow::Result<Vec<Position>>;
  /// Position created from a given signal, if any.
  async fn position_for_signal(&self, signal_id: SignalId) -> anyhow::Result<Option<Position>>;
  /// Every position ever opened on an account, any status.
  async fn positions_for_account(&self, account_id: &str) -> anyhow::Result<Vec<Position>>;

  async fn upsert_account(&self, account: &Account) -> anyhow::Result<()>;
  async fn get_account(&self, id: &str) -> anyhow::Result<Option<Account>>;

  async fn upsert_agent(&self, agent: &Agent) -> anyhow::Result<()>;
  async fn get_agent(&self, id: &str) -> anyhow::Result<Option<Agent>>;
  async fn agents_by_status(&self, status: AgentStatus) -> anyhow::Result<Vec<Agent>>;

  /// Check if the store is writable.
  async fn is_healthy(&self) -> bool;
}
