//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the bot's core workflows. Each use case is a self-contained
//! business operation.
//!
//! Use cases:
//! - `SignalVerifier`: Fan-out AI verification with the confidence gate
//! - `RiskManager`: Per-account locks, reservations and trade limits
//! - `OrderExecutor`: Idempotent submission and reconciliation
//! - `PositionMonitor`: Settlement polling, P&L and stale alerts
//! - `AgentRunner`: One agent's detect → verify → approve → execute loop
//! - `AgentOrchestrator`: Start, stop and status of agents

pub mod agent_loop;
pub mod order_executor;
pub mod orchestrator;
pub mod position_monitor;
pub mod risk_manager;
pub mod verification;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::domain::{BotError, BotEvent};
use crate::ports::execution::ExecutionVenue;
use crate::ports::market_feed::MarketFeed;
use crate::ports::repository::Repository;
use crate::ports::settlement::SettlementSource;
use crate::ports::verifier::OutcomeVerifier;

/// Broadcast channel carrying pipeline events to metrics and logs.
pub type EventSender = broadcast::Sender<BotEvent>;

/// Publish an event. Having no subscriber is not an error.
pub fn emit(events: &EventSender, event: BotEvent) {
  let _ = events.send(event);
}

/// Port implementations shared by every use case.
#[derive(Clone)]
pub struct Services {
  pub feed: Arc<dyn MarketFeed>,
  pub verifier: Arc<dyn OutcomeVerifier>,
  pub venue: Arc<dyn ExecutionVenue>,
  pub settlement: Arc<dyn SettlementSource>,
  pub repo: Arc<dyn Repository>,
  pub events: EventSender,
}

/// Timeouts and knobs that are not per-agent strategy.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
  /// Deadline for one market listing.
  pub feed_timeout: Duration,
  /// Deadline for one verifier call.
  pub verify_timeout: Duration,
  /// Deadline for one venue call (submit, query or cancel).
  pub venue_timeout: Duration,
  /// Deadline for one settlement lookup.
  pub settlement_timeout: Duration,
  /// Maximum verifier calls in flight per cycle.
  pub verify_fan_out: usize,
  /// How long a resting order may wait before it is re-queried and cancelled.
  pub confirm_window: Duration,
  /// Open positions older than this are flagged stale.
  pub stale_after: chrono::Duration,
  /// Rejected/failed signals listed in an agent status report.
  pub status_history: usize,
}

impl Default for PipelineSettings {
  fn default() -> Self {
    Self {
      feed_timeout: Duration::from_secs(15),
      verify_timeout: Duration::from_secs(30),
      venue_timeout: Duration::from_secs(10),
      settlement_timeout: Duration::from_secs(10),
      verify_fan_out: 4,
      confirm_window: Duration::from_secs(2),
      stale_after: chrono::Duration::hours(72),
      status_history: 20,
    }
  }
}

/// Await `fut` for at most `limit`; elapse becomes `BotError::Transient`.
pub async fn with_timeout<T, F>(stage: &'static str, limit: Duration, fut: F) -> anyhow::Result<T>
where
  F: Future<Output = anyhow::Result<T>>,
{
  match tokio::time::timeout(limit, fut).await {
    Ok(result) => result,
    Err(_) => Err(BotError::transient(stage, format!("timed out after {}ms", limit.as_millis())).into()),
  }
}
