//! Agent Loop - One Agent's Scan Cycle
//!
//! Each cycle runs reconcile → fetch → detect → verify → approve and
//! execute → heartbeat, then sleeps until the next scan or a stop request.
//! A stop request lets the order in flight finish; verified signals not
//! yet executed are rejected as `AgentStopping`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::order_executor::{ExecutionOutcome, OrderExecutor};
use super::risk_manager::{ApprovalDecision, RiskManager, Settlement};
use super::verification::SignalVerifier;
use super::{PipelineSettings, Services, emit, with_timeout};
use crate::domain::{Agent, AgentId, BotError, BotEvent, MarketId, Signal, SignalReason, detector};

/// Why a loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentExit {
  /// Stop was requested.
  Stopped,
  /// Fatal error or too many consecutive failed cycles.
  Failed(String),
}

/// Counts from one cycle.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
  pub markets: usize,
  pub detected: usize,
  pub skipped_held: usize,
  pub verified: usize,
  pub risk_rejected: usize,
  pub executed: usize,
  pub not_filled: usize,
  pub ambiguous: usize,
}

/// Drives one agent until stopped.
pub struct AgentRunner {
  agent_id: AgentId,
  services: Services,
  risk: Arc<RiskManager>,
  executor: Arc<OrderExecutor>,
  gate: SignalVerifier,
  settings: PipelineSettings,
  stop: watch::Receiver<bool>,
}

impl AgentRunner {
  pub fn new(
    agent_id: AgentId,
    services: Services,
    risk: Arc<RiskManager>,
    executor: Arc<OrderExecutor>,
    settings: PipelineSettings,
    stop: watch::Receiver<bool>,
  ) -> Self {
    let gate = SignalVerifier::new(
      services.verifier.clone(),
      services.repo.clone(),
      services.events.clone(),
      settings.verify_fan_out,
      settings.verify_timeout,
    );
    Self {
      agent_id,
      services,
      risk,
      executor,
      gate,
      settings,
      stop,
    }
  }

  fn stopping(&self) -> bool {
    *self.stop.borrow()
  }

  /// Run cycles until stopped or failed.
  #[instrument(skip(self), fields(agent_id = %self.agent_id))]
  pub async fn run(mut self) -> AgentExit {
    let agent = match self.services.repo.get_agent(&self.agent_id).await {
      Ok(Some(agent)) => agent,
      Ok(None) => return AgentExit::Failed(format!("agent {} not found", self.agent_id)),
      Err(e) => return AgentExit::Failed(format!("failed to load agent: {e:#}")),
    };
    let interval = Duration::from_secs(agent.strategy.scan_interval_secs);
    let max_failures = agent.strategy.max_consecutive_failures;
    let mut failures = 0u32;
    info!(account_id = %agent.account_id, interval_secs = interval.as_secs(), "Agent loop started");

    loop {
      if self.stopping() {
        info!("Agent loop stopped");
        return AgentExit::Stopped;
      }

      match self.cycle(&agent).await {
        Ok(report) => {
          failures = 0;
          debug!(?report, "Cycle complete");
        }
        Err(e) if BotError::is_fatal(&e) => {
          error!(error = %e, "Fatal error, leaving running state");
          return AgentExit::Failed(format!("{e:#}"));
        }
        Err(e) => {
          failures += 1;
          warn!(error = %e, failures, max_failures, "Cycle failed");
          if failures >= max_failures {
            return AgentExit::Failed(format!("{failures} consecutive failed cycles, last: {e:#}"));
          }
        }
      }

      self.heartbeat().await;

      tokio::select! {
        _ = tokio::time::sleep(interval) => {}
        changed = self.stop.changed() => {
          if changed.is_err() {
            return AgentExit::Stopped;
          }
        }
      }
    }
  }

  /// One full pass of the pipeline.
  pub async fn cycle(&self, agent: &Agent) -> Result<CycleReport> {
    let repo = &self.services.repo;
    let mut report = CycleReport::default();

    {
      let mut lock = self.risk.lock_account(&agent.account_id).await;
      self.executor.reconcile(&mut lock).await.context("reconcile pending orders")?;
    }

    let markets = with_timeout("feed", self.settings.feed_timeout, self.services.feed.fetch_markets())
      .await
      .context("fetch markets")?;
    report.markets = markets.len();

    let mut signals = detector::detect(&markets, agent, Utc::now());
    report.detected = signals.len();

    let held = self.held_markets(agent).await?;
    signals.retain(|s| !held.contains(&s.market_id));
    report.skipped_held = report.detected - signals.len();

    for signal in &signals {
      repo.create_signal(signal).await?;
      info!(
        signal_id = %signal.id,
        market_id = %signal.market_id,
        outcome = %signal.outcome,
        price = %signal.price,
        discount = %signal.discount,
        "Signal detected"
      );
      emit(
        &self.services.events,
        BotEvent::SignalDetected {
          agent_id: agent.id.clone(),
          signal_id: signal.id,
          market_id: signal.market_id.clone(),
          outcome: signal.outcome,
          price: signal.price,
          discount: signal.discount,
        },
      );
    }
    if signals.is_empty() {
      return Ok(report);
    }

    let mut verified = self
      .gate
      .verify_batch(signals, agent.strategy.confidence_threshold)
      .await?;
    report.verified = verified.len();
    verified.sort_by(|a, b| {
      b.discount
        .cmp(&a.discount)
        .then_with(|| a.market_id.cmp(&b.market_id))
    });

    for signal in verified {
      if self.stopping() {
        self.reject(signal, SignalReason::AgentStopping).await?;
        continue;
      }
      self.approve_and_execute(agent, signal, &mut report).await?;
    }
    Ok(report)
  }

  /// Markets this agent's account already holds or is still resolving.
  async fn held_markets(&self, agent: &Agent) -> Result<HashSet<MarketId>> {
    let mut held: HashSet<MarketId> = self
      .services
      .repo
      .positions_for_account(&agent.account_id)
      .await?
      .into_iter()
      .filter(|p| p.is_open())
      .map(|p| p.market_id)
      .collect();
    held.extend(
      self
        .executor
        .queue(Some(&agent.account_id))
        .await?
        .into_iter()
        .map(|s| s.market_id),
    );
    Ok(held)
  }

  async fn approve_and_execute(
    &self,
    agent: &Agent,
    signal: Signal,
    report: &mut CycleReport,
  ) -> Result<()> {
    let strategy = &agent.strategy;
    let size = strategy.requested_size(signal.confidence().unwrap_or(0.0));
    let mut lock = self.risk.lock_account(&agent.account_id).await;

    let approval = match lock.approve(&signal, size, strategy, Utc::now()).await? {
      ApprovalDecision::Approved(approval) => approval,
      ApprovalDecision::Rejected(rejection) => {
        report.risk_rejected += 1;
        return self.reject(signal, SignalReason::Risk { rejection }).await;
      }
    };

    let signal_id = signal.id;
    match self.executor.execute(signal, approval).await {
      Ok(outcome) => {
        lock.settle(signal_id, outcome.settlement());
        match outcome {
          ExecutionOutcome::Filled(_) => report.executed += 1,
          ExecutionOutcome::NotFilled(_) => report.not_filled += 1,
          ExecutionOutcome::Ambiguous(_) => report.ambiguous += 1,
          ExecutionOutcome::Fatal(e) => return Err(e),
        }
        Ok(())
      }
      Err(e) => {
        // Keep the reservation only if the order may have reached the venue.
        let queued = self
          .executor
          .queue(Some(&agent.account_id))
          .await
          .map_or(true, |q| q.iter().any(|s| s.id == signal_id));
        let settlement = if queued { Settlement::Ambiguous } else { Settlement::NotFilled };
        lock.settle(signal_id, settlement);
        Err(e.context(format!("execute signal {signal_id}")))
      }
    }
  }

  async fn reject(&self, mut signal: Signal, reason: SignalReason) -> Result<()> {
    signal.reject(reason.clone(), Utc::now())?;
    self.services.repo.update_signal(&signal).await?;
    emit(
      &self.services.events,
      BotEvent::SignalRejected {
        agent_id: signal.agent_id.clone(),
        signal_id: signal.id,
        reason,
      },
    );
    Ok(())
  }

  async fn heartbeat(&self) {
    if let Err(e) = self.record_heartbeat().await {
      warn!(error = %e, "Failed to record heartbeat");
    }
  }

  async fn record_heartbeat(&self) -> Result<()> {
    let repo = &self.services.repo;
    let mut agent = repo
      .get_agent(&self.agent_id)
      .await?
      .ok_or_else(|| BotError::NotFound {
        kind: "agent",
        id: self.agent_id.clone(),
      })?;
    agent.last_heartbeat = Some(Utc::now());
    repo.upsert_agent(&agent).await
  }
}
