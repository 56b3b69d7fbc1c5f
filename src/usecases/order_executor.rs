//! Order Executor - Idempotent Order Lifecycle
//!
//! Turns an approved signal into at most one venue order and at most one
//! position. The signal id is the venue idempotency key:
//! - A signal is persisted as `Executing` before its order is submitted
//! - A signal seen before is looked up by key, never resubmitted
//! - A signal that already owns a position returns it untouched
//!
//! Submissions whose outcome cannot be confirmed leave the signal
//! `Failed` with an ambiguous reason. Those signals form the
//! reconciliation queue, drained by `reconcile` at the start of each cycle.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::risk_manager::{AccountLock, Approval, RiskManager, Settlement};
use super::{EventSender, emit, with_timeout};
use crate::domain::{BotError, BotEvent, Position, Signal, SignalReason, SignalStatus};
use crate::ports::execution::{ExecutionVenue, OrderReport, OrderRequest, OrderState};
use crate::ports::repository::Repository;

/// How one execution attempt ended.
#[derive(Debug)]
pub enum ExecutionOutcome {
  /// Confirmed fill; the position is persisted.
  Filled(Position),
  /// Confirmed that nothing filled.
  NotFilled(SignalReason),
  /// Venue state unknown; the signal is queued for reconciliation.
  Ambiguous(String),
  /// Venue refused our credentials. Nothing was placed.
  Fatal(anyhow::Error),
}

impl ExecutionOutcome {
  /// What the exposure book should do with the reservation.
  pub fn settlement(&self) -> Settlement {
    match self {
      Self::Filled(position) => Settlement::Filled(position.entered_at),
      Self::NotFilled(_) | Self::Fatal(_) => Settlement::NotFilled,
      Self::Ambiguous(_) => Settlement::Ambiguous,
    }
  }
}

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
  pub filled: usize,
  pub released: usize,
  pub unresolved: usize,
}

/// Places orders and resolves their outcome.
pub struct OrderExecutor {
  venue: Arc<dyn ExecutionVenue>,
  repo: Arc<dyn Repository>,
  events: EventSender,
  venue_timeout: Duration,
  confirm_window: Duration,
  /// Idempotency keys submitted by this process.
  seen: Mutex<HashSet<String>>,
}

impl OrderExecutor {
  pub fn new(
    venue: Arc<dyn ExecutionVenue>,
    repo: Arc<dyn Repository>,
    events: EventSender,
    venue_timeout: Duration,
    confirm_window: Duration,
  ) -> Self {
    Self {
      venue,
      repo,
      events,
      venue_timeout,
      confirm_window,
      seen: Mutex::new(HashSet::new()),
    }
  }

  /// Execute an approved signal.
  ///
  /// # Errors
  /// Returns error when the store fails or the approval does not match the
  /// signal. The venue state is then unknown to the caller, which must keep
  /// the reservation.
  #[instrument(skip_all, fields(signal_id = %signal.id, market_id = %signal.market_id))]
  pub async fn execute(&self, signal: Signal, approval: Approval) -> Result<ExecutionOutcome> {
    anyhow::ensure!(
      approval.signal_id() == signal.id,
      "approval for {} used on signal {}",
      approval.signal_id(),
      signal.id
    );

    if let Some(position) = self.repo.position_for_signal(signal.id).await? {
      info!(position_id = %position.id, "Signal already owns a position");
      return Ok(ExecutionOutcome::Filled(position));
    }

    let key = signal.idempotency_key();
    let mut signal = match self.repo.get_signal(signal.id).await? {
      Some(stored) => stored,
      None => {
        self.repo.create_signal(&signal).await?;
        signal
      }
    };

    match signal.status {
      SignalStatus::Rejected => {
        let reason = signal.reason.clone().unwrap_or(SignalReason::NotFilled);
        return Ok(ExecutionOutcome::NotFilled(reason));
      }
      SignalStatus::Failed if !signal.is_ambiguous() => {
        let reason = signal.reason.clone().unwrap_or(SignalReason::NotFilled);
        return Ok(ExecutionOutcome::NotFilled(reason));
      }
      SignalStatus::Executed => {
        anyhow::bail!("signal {} is executed but owns no position", signal.id);
      }
      _ => {}
    }

    let attempted = self.seen.lock().await.contains(&key)
      || matches!(signal.status, SignalStatus::Executing | SignalStatus::Failed);
    if attempted {
      debug!("Signal attempted before, querying venue by key");
      return self.resolve_previous(signal).await;
    }

    let order = OrderRequest {
      idempotency_key: key.clone(),
      market_id: signal.market_id.clone(),
      token_id: signal.token_id.clone(),
      outcome: signal.outcome,
      size: approval.size(),
      limit_price: approval.limit_price(),
      expected_price: signal.price,
    };
    signal.begin_execution(order.size, order.limit_price, Utc::now())?;
    self.repo.update_signal(&signal).await?;
    self.seen.lock().await.insert(key);

    info!(
      size = %order.size,
      limit_price = %order.limit_price,
      outcome = %order.outcome,
      "Submitting order"
    );
    match with_timeout("venue", self.venue_timeout, self.venue.submit_order(&order)).await {
      Ok(report) => self.apply_report(signal, report).await,
      Err(e) if BotError::is_fatal(&e) => {
        warn!(error = %e, "Venue refused credentials");
        let reason = SignalReason::VenueRejected {
          reason: format!("{e:#}"),
        };
        self.not_filled(signal, reason).await?;
        Ok(ExecutionOutcome::Fatal(e))
      }
      // Any other failure may have reached the book; reconciliation finds out.
      Err(e) => self.mark_ambiguous(signal, format!("{e:#}")).await,
    }
  }

  /// Resolve every queued order of the lock's account.
  pub async fn reconcile(&self, lock: &mut AccountLock) -> Result<ReconcileReport> {
    let queue = self.queue(Some(lock.account_id())).await?;
    let mut report = ReconcileReport::default();
    for signal in queue {
      let signal_id = signal.id;
      if let Some(position) = self.repo.position_for_signal(signal_id).await? {
        let mut signal = signal;
        signal.mark_executed(Utc::now())?;
        self.repo.update_signal(&signal).await?;
        lock.settle(signal_id, Settlement::Filled(position.entered_at));
        report.filled += 1;
        continue;
      }
      match self.resolve_previous(signal).await {
        Ok(outcome) => {
          match &outcome {
            ExecutionOutcome::Filled(_) => report.filled += 1,
            ExecutionOutcome::NotFilled(_) | ExecutionOutcome::Fatal(_) => report.released += 1,
            ExecutionOutcome::Ambiguous(_) => report.unresolved += 1,
          }
          lock.settle(signal_id, outcome.settlement());
        }
        Err(e) => {
          warn!(%signal_id, error = %e, "Reconciliation failed, retrying next cycle");
          report.unresolved += 1;
        }
      }
    }
    if report != ReconcileReport::default() {
      info!(
        account_id = lock.account_id(),
        filled = report.filled,
        released = report.released,
        unresolved = report.unresolved,
        "Reconciliation pass"
      );
    }
    Ok(report)
  }

  /// Rebuild the reconciliation queue after a restart.
  ///
  /// Restores reservations for every signal persisted as `Executing` or
  /// failed-ambiguous, and marks their keys as seen.
  pub async fn recover(&self, risk: &RiskManager) -> Result<usize> {
    let queue = self.queue(None).await?;
    let mut by_account: BTreeMap<String, Vec<Signal>> = BTreeMap::new();
    for signal in queue {
      by_account.entry(signal.account_id.clone()).or_default().push(signal);
    }
    let mut restored = 0;
    for (account_id, signals) in by_account {
      // Account lock before `seen`, as in `execute`.
      let mut lock = risk.lock_account(&account_id).await;
      for signal in &signals {
        lock.restore(signal);
      }
      restored += signals.len();
      self
        .seen
        .lock()
        .await
        .extend(signals.iter().map(Signal::idempotency_key));
    }
    if restored > 0 {
      warn!(restored, "Recovered unresolved orders into the reconciliation queue");
    }
    Ok(restored)
  }

  /// Signals whose venue outcome is still unknown.
  pub async fn queue(&self, account_id: Option<&str>) -> Result<Vec<Signal>> {
    let mut queue = self.repo.signals_by_status(SignalStatus::Executing).await?;
    queue.extend(
      self
        .repo
        .signals_by_status(SignalStatus::Failed)
        .await?
        .into_iter()
        .filter(Signal::is_ambiguous),
    );
    if let Some(account_id) = account_id {
      queue.retain(|s| s.account_id == account_id);
    }
    Ok(queue)
  }

  async fn resolve_previous(&self, signal: Signal) -> Result<ExecutionOutcome> {
    let key = signal.idempotency_key();
    match with_timeout("venue", self.venue_timeout, self.venue.query_order(&key)).await {
      Ok(Some(report)) => self.apply_report(signal, report).await,
      Ok(None) => {
        info!(signal_id = %signal.id, "Venue never saw the order");
        self.not_filled(signal, SignalReason::NotFilled).await
      }
      Err(e) => self.mark_ambiguous(signal, format!("{e:#}")).await,
    }
  }

  async fn apply_report(&self, signal: Signal, report: OrderReport) -> Result<ExecutionOutcome> {
    match report.state {
      OrderState::Filled => self.record_fill(signal, &report).await,
      OrderState::Rejected => {
        let reason = report
          .reason
          .map_or(SignalReason::NotFilled, |reason| SignalReason::VenueRejected { reason });
        self.not_filled(signal, reason).await
      }
      OrderState::Pending => self.settle_pending(signal).await,
    }
  }

  /// Give a resting order one confirmation window, then cancel it.
  async fn settle_pending(&self, signal: Signal) -> Result<ExecutionOutcome> {
    let key = signal.idempotency_key();
    tokio::time::sleep(self.confirm_window).await;
    match with_timeout("venue", self.venue_timeout, self.venue.query_order(&key)).await {
      Ok(Some(report)) if report.state == OrderState::Filled => {
        return self.record_fill(signal, &report).await;
      }
      Ok(Some(report)) if report.state == OrderState::Rejected => {
        return self.not_filled(signal, SignalReason::NotFilled).await;
      }
      Ok(_) => {}
      Err(e) => debug!(error = %e, "Confirmation lookup failed, cancelling"),
    }
    match with_timeout("venue", self.venue_timeout, self.venue.cancel_order(&key)).await {
      Ok(true) => {
        info!(signal_id = %signal.id, "Resting order cancelled");
        self.not_filled(signal, SignalReason::NotFilled).await
      }
      Ok(false) => {
        self
          .mark_ambiguous(signal, "order still pending and cancel was refused".to_string())
          .await
      }
      Err(e) => self.mark_ambiguous(signal, format!("cancel failed: {e:#}")).await,
    }
  }

  async fn record_fill(&self, mut signal: Signal, report: &OrderReport) -> Result<ExecutionOutcome> {
    let now = Utc::now();
    let size = report
      .filled_size
      .or(signal.order_size)
      .ok_or_else(|| anyhow::anyhow!("fill for {} carries no size", signal.id))?;
    let entry_price = report.fill_price.or(signal.limit_price).unwrap_or(signal.price);

    let position = Position::open(&signal, size, entry_price, now);
    self.repo.create_position(&position).await?;
    signal.mark_executed(now)?;
    self.repo.update_signal(&signal).await?;

    info!(
      signal_id = %signal.id,
      position_id = %position.id,
      market_id = %position.market_id,
      size = %size,
      entry_price = %entry_price,
      "Position opened"
    );
    emit(
      &self.events,
      BotEvent::PositionOpened {
        account_id: position.account_id.clone(),
        position_id: position.id,
        market_id: position.market_id.clone(),
        size,
        entry_price,
      },
    );
    emit(
      &self.events,
      BotEvent::SignalExecuted {
        agent_id: signal.agent_id.clone(),
        signal_id: signal.id,
        position_id: position.id,
      },
    );
    Ok(ExecutionOutcome::Filled(position))
  }

  async fn not_filled(&self, mut signal: Signal, reason: SignalReason) -> Result<ExecutionOutcome> {
    signal.fail(reason.clone(), Utc::now())?;
    self.repo.update_signal(&signal).await?;
    info!(signal_id = %signal.id, reason = %reason, "Order not filled");
    emit(
      &self.events,
      BotEvent::SignalFailed {
        agent_id: signal.agent_id.clone(),
        signal_id: signal.id,
        reason: reason.clone(),
      },
    );
    Ok(ExecutionOutcome::NotFilled(reason))
  }

  async fn mark_ambiguous(&self, mut signal: Signal, error: String) -> Result<ExecutionOutcome> {
    if signal.is_ambiguous() {
      debug!(signal_id = %signal.id, error, "Order still unresolved");
      return Ok(ExecutionOutcome::Ambiguous(error));
    }
    let reason = SignalReason::ExecutionAmbiguous {
      error: error.clone(),
    };
    signal.fail(reason.clone(), Utc::now())?;
    self.repo.update_signal(&signal).await?;
    warn!(signal_id = %signal.id, error, "Order outcome unknown, queued for reconciliation");
    emit(
      &self.events,
      BotEvent::SignalFailed {
        agent_id: signal.agent_id.clone(),
        signal_id: signal.id,
        reason,
      },
    );
    Ok(ExecutionOutcome::Ambiguous(error))
  }
}
