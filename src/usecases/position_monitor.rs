//! Position Monitor - Settlement Tracking
//!
//! Polls the settlement source for every open position on its own
//! cadence. A resolved market closes the position with realized P&L; a
//! resolution that pays nothing on our side is still a close, just a
//! losing one. Positions open past the stale threshold are flagged once
//! and left open for the operator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, instrument, warn};

use super::risk_manager::RiskManager;
use super::{EventSender, emit, with_timeout};
use crate::domain::{BotEvent, Position, PositionId, PositionStatus};
use crate::ports::repository::Repository;
use crate::ports::settlement::{Resolution, SettlementSource};

/// Counts from one monitor pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
  pub checked: usize,
  pub closed: usize,
  pub errored: usize,
  pub stale: usize,
  /// Positions whose update could not be stored; retried next pass.
  pub failed: usize,
}

/// Background settlement watcher.
pub struct PositionMonitor {
  settlement: Arc<dyn SettlementSource>,
  repo: Arc<dyn Repository>,
  risk: Arc<RiskManager>,
  events: EventSender,
  poll_interval: Duration,
  lookup_timeout: Duration,
  stale_after: chrono::Duration,
  /// Positions already reported stale.
  flagged: Mutex<HashSet<PositionId>>,
}

impl PositionMonitor {
  pub fn new(
    settlement: Arc<dyn SettlementSource>,
    repo: Arc<dyn Repository>,
    risk: Arc<RiskManager>,
    events: EventSender,
    poll_interval: Duration,
    lookup_timeout: Duration,
    stale_after: chrono::Duration,
  ) -> Self {
    Self {
      settlement,
      repo,
      risk,
      events,
      poll_interval,
      lookup_timeout,
      stale_after,
      flagged: Mutex::new(HashSet::new()),
    }
  }

  /// Run until `shutdown` fires.
  #[instrument(skip_all, name = "position_monitor")]
  pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
    info!(interval_secs = self.poll_interval.as_secs(), "Position monitor started");
    let mut ticker = tokio::time::interval(self.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
      tokio::select! {
        _ = shutdown.recv() => {
          info!("Position monitor shutting down");
          return;
        }
        _ = ticker.tick() => {
          if let Err(e) = self.poll_once().await {
            error!(error = %e, "Position monitor pass failed");
          }
        }
      }
    }
  }

  /// Check every open position once.
  pub async fn poll_once(&self) -> Result<MonitorReport> {
    let open = self.repo.positions_by_status(PositionStatus::Open).await?;
    let mut report = MonitorReport {
      checked: open.len(),
      ..MonitorReport::default()
    };
    for position in open {
      let market_id = position.market_id.clone();
      let lookup = self.settlement.resolution(&market_id);
      match with_timeout("settlement", self.lookup_timeout, lookup).await {
        Ok(Resolution::Pending) => {
          if self.flag_if_stale(&position).await {
            report.stale += 1;
          }
        }
        Ok(resolution) => match resolution.payout(position.outcome) {
          Some(payout) => match self.close(position, payout).await {
            Ok(()) => report.closed += 1,
            Err(e) => {
              error!(%market_id, error = %e, "Failed to close settled position");
              report.failed += 1;
            }
          },
          None => {
            let note = "market resolved without a payout for our side";
            match self.mark_error(position, note).await {
              Ok(()) => report.errored += 1,
              Err(e) => {
                error!(%market_id, error = %e, "Failed to mark position in error");
                report.failed += 1;
              }
            }
          }
        },
        Err(e) => {
          warn!(position_id = %position.id, %market_id, error = %e, "Settlement lookup failed");
          if self.flag_if_stale(&position).await {
            report.stale += 1;
          }
        }
      }
    }
    if report.closed + report.errored + report.stale + report.failed > 0 {
      info!(
        checked = report.checked,
        closed = report.closed,
        errored = report.errored,
        stale = report.stale,
        failed = report.failed,
        "Monitor pass"
      );
    }
    Ok(report)
  }

  async fn close(&self, mut position: Position, payout: Decimal) -> Result<()> {
    let pnl = position.close(payout, Utc::now())?;
    self.repo.update_position(&position).await?;
    self.flagged.lock().await.remove(&position.id);
    self.risk.record_close(&position.account_id, pnl).await;

    let won = payout >= Decimal::ONE;
    if won {
      info!(
        position_id = %position.id,
        market_id = %position.market_id,
        pnl = %pnl,
        "Position settled"
      );
    } else {
      warn!(
        position_id = %position.id,
        market_id = %position.market_id,
        outcome = %position.outcome,
        payout = %payout,
        pnl = %pnl,
        "Settlement contradicts verified outcome"
      );
    }
    emit(
      &self.events,
      BotEvent::PositionClosed {
        account_id: position.account_id.clone(),
        position_id: position.id,
        market_id: position.market_id.clone(),
        realized_pnl: pnl,
        won,
      },
    );
    Ok(())
  }

  async fn mark_error(&self, mut position: Position, note: &str) -> Result<()> {
    position.mark_error(note, Utc::now())?;
    self.repo.update_position(&position).await?;
    error!(position_id = %position.id, market_id = %position.market_id, note, "Position needs attention");
    emit(
      &self.events,
      BotEvent::PositionError {
        account_id: position.account_id.clone(),
        position_id: position.id,
        note: note.to_string(),
      },
    );
    Ok(())
  }

  async fn flag_if_stale(&self, position: &Position) -> bool {
    let now = Utc::now();
    if !position.is_stale(now, self.stale_after) {
      return false;
    }
    if !self.flagged.lock().await.insert(position.id) {
      debug!(position_id = %position.id, "Stale position already flagged");
      return false;
    }
    let hours_open = (now - position.entered_at).num_hours();
    warn!(
      position_id = %position.id,
      market_id = %position.market_id,
      hours_open,
      "Position open past stale threshold"
    );
    emit(
      &self.events,
      BotEvent::PositionStale {
        account_id: position.account_id.clone(),
        position_id: position.id,
        hours_open,
      },
    );
    true
  }
}

#[cfg(test)]
mod tests {
  use rust_decimal_macros::dec;

  use super::*;
  use crate::adapters::persistence::JsonStore;
  use crate::domain::{BotError, Outcome, Signal};
  use crate::ports::repository::MockRepository;
  use crate::ports::settlement::MockSettlementSource;

  fn position(market: &str, entry: Decimal, age_hours: i64) -> Position {
    let s = Signal::detected(
      "agent".into(),
      "acct".into(),
      market.into(),
      "q".into(),
      None,
      Outcome::Yes,
      "tok".into(),
      entry,
      Utc::now(),
    );
    Position::open(&s, dec!(100), entry, Utc::now() - chrono::Duration::hours(age_hours))
  }

  fn monitor(settlement: MockSettlementSource, repo: Arc<dyn Repository>) -> (PositionMonitor, Arc<RiskManager>) {
    let (events, _) = broadcast::channel(16);
    let risk = Arc::new(RiskManager::new(repo.clone()));
    let monitor = PositionMonitor::new(
      Arc::new(settlement),
      repo,
      risk.clone(),
      events,
      Duration::from_secs(60),
      Duration::from_secs(1),
      chrono::Duration::hours(72),
    );
    (monitor, risk)
  }

  #[tokio::test]
  async fn test_resolution_closes_with_pnl() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    let won = position("win", dec!(0.85), 1);
    let lost = position("loss", dec!(0.90), 1);
    repo.create_position(&won).await.unwrap();
    repo.create_position(&lost).await.unwrap();

    let mut settlement = MockSettlementSource::new();
    settlement.expect_resolution().returning(|market| {
      let yes = if market == "win" { dec!(1) } else { dec!(0) };
      Ok(Resolution::Resolved {
        payouts: vec![(Outcome::Yes, yes), (Outcome::No, dec!(1) - yes)],
      })
    });
    let (monitor, risk) = monitor(settlement, repo.clone());
    let report = monitor.poll_once().await.unwrap();
    assert_eq!(report.closed, 2);

    let closed = repo.positions_by_status(PositionStatus::Closed).await.unwrap();
    let pnl: Vec<_> = closed.iter().map(|p| (p.market_id.as_str(), p.realized_pnl)).collect();
    assert!(pnl.contains(&("win", Some(dec!(15)))));
    assert!(pnl.contains(&("loss", Some(dec!(-90)))));
    assert_eq!(risk.snapshot("acct").await.realized_pnl, dec!(-75));
  }

  #[tokio::test]
  async fn test_missing_payout_marks_error() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    repo.create_position(&position("m", dec!(0.85), 1)).await.unwrap();
    let mut settlement = MockSettlementSource::new();
    settlement
      .expect_resolution()
      .returning(|_| Ok(Resolution::Resolved { payouts: vec![] }));
    let (monitor, _) = monitor(settlement, repo.clone());
    assert_eq!(monitor.poll_once().await.unwrap().errored, 1);
    assert_eq!(repo.positions_by_status(PositionStatus::Error).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_stale_flagged_once_and_left_open() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    repo.create_position(&position("m", dec!(0.85), 100)).await.unwrap();
    let mut settlement = MockSettlementSource::new();
    settlement.expect_resolution().returning(|_| Ok(Resolution::Pending));
    let (monitor, _) = monitor(settlement, repo.clone());
    assert_eq!(monitor.poll_once().await.unwrap().stale, 1);
    assert_eq!(monitor.poll_once().await.unwrap().stale, 0);
    assert_eq!(repo.positions_by_status(PositionStatus::Open).await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_store_failure_does_not_end_the_pass() {
    let first = position("first", dec!(0.85), 1);
    let second = position("second", dec!(0.90), 1);
    let first_id = first.id;
    let open = vec![first, second];

    let mut repo = MockRepository::new();
    repo
      .expect_positions_by_status()
      .returning(move |_| Ok(open.clone()));
    repo.expect_update_position().times(2).returning(move |p| {
      if p.id == first_id {
        Err(BotError::transient("store", "disk full").into())
      } else {
        Ok(())
      }
    });

    let mut settlement = MockSettlementSource::new();
    settlement.expect_resolution().returning(|_| {
      Ok(Resolution::Resolved {
        payouts: vec![(Outcome::Yes, dec!(1)), (Outcome::No, dec!(0))],
      })
    });
    let (monitor, risk) = monitor(settlement, Arc::new(repo));
    let report = monitor.poll_once().await.unwrap();
    assert_eq!(report.checked, 2);
    assert_eq!(report.closed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(risk.snapshot("acct").await.realized_pnl, dec!(10));
  }
}
