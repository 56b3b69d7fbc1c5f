//! Risk Manager - Per-Account Trade Limits
//!
//! Enforces risk controls on every verified signal, in this order:
//! - One position (open or pending) per market per account
//! - Maximum size of a single position
//! - Available balance after pending reservations
//! - Maximum total exposure (open + pending)
//! - Maximum concurrent positions (open + pending)
//! - Cooldown period after the account's last executed trade
//!
//! Each account has one async lock. The caller takes it with
//! `lock_account`, approves, executes and settles while holding it, so
//! two pipelines sharing an account never both pass a limit only one of
//! them fits under.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::domain::{
  AccountId, BotError, MarketId, Position, RiskRejection, Signal, SignalId, StrategyConfig,
};
use crate::ports::repository::Repository;

/// Permission to execute one signal. Not `Clone`: the executor consumes it.
#[derive(Debug)]
pub struct Approval {
  signal_id: SignalId,
  account_id: AccountId,
  size: Decimal,
  limit_price: Decimal,
}

impl Approval {
  pub fn signal_id(&self) -> SignalId {
    self.signal_id
  }

  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  /// Order size in USDC.
  pub fn size(&self) -> Decimal {
    self.size
  }

  pub fn limit_price(&self) -> Decimal {
    self.limit_price
  }
}

#[cfg(test)]
impl Approval {
  /// Approval for a signal that was already approved once.
  pub(crate) fn for_replay(signal: &Signal) -> Self {
    Self {
      signal_id: signal.id,
      account_id: signal.account_id.clone(),
      size: signal.order_size.unwrap_or(Decimal::ONE),
      limit_price: signal.limit_price.unwrap_or(signal.price),
    }
  }
}

/// Result of a risk check.
#[derive(Debug)]
pub enum ApprovalDecision {
  Approved(Approval),
  Rejected(RiskRejection),
}

/// How an approved order ended, as reported back to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
  /// Filled at the given time. The reservation becomes an open position.
  Filled(DateTime<Utc>),
  /// Confirmed not filled. The reservation is released.
  NotFilled,
  /// Outcome unknown. The reservation stays until reconciled.
  Ambiguous,
}

#[derive(Debug, Clone)]
struct Reservation {
  market_id: MarketId,
  size: Decimal,
  ambiguous: bool,
}

/// Pending exposure of one account.
#[derive(Debug, Default)]
struct ExposureBook {
  pending: HashMap<SignalId, Reservation>,
  last_trade_at: Option<DateTime<Utc>>,
  realized_pnl: Decimal,
}

impl ExposureBook {
  fn pending_total(&self) -> Decimal {
    self.pending.values().map(|r| r.size).sum()
  }

  fn holds_market(&self, market_id: &str) -> bool {
    self.pending.values().any(|r| r.market_id == market_id)
  }
}

/// Read-only view of an account's exposure.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureSnapshot {
  pub pending_total: Decimal,
  pub pending_count: usize,
  pub ambiguous_count: usize,
  pub last_trade_at: Option<DateTime<Utc>>,
  pub realized_pnl: Decimal,
}

/// Owner of every account's exposure book.
pub struct RiskManager {
  repo: Arc<dyn Repository>,
  books: Mutex<HashMap<AccountId, Arc<Mutex<ExposureBook>>>>,
}

impl RiskManager {
  pub fn new(repo: Arc<dyn Repository>) -> Self {
    Self {
      repo,
      books: Mutex::new(HashMap::new()),
    }
  }

  async fn book(&self, account_id: &str) -> Arc<Mutex<ExposureBook>> {
    let mut books = self.books.lock().await;
    books
      .entry(account_id.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(ExposureBook::default())))
      .clone()
  }

  /// Take the account's exclusive lock. Held across approve → execute → settle.
  pub async fn lock_account(&self, account_id: &str) -> AccountLock {
    let guard = self.book(account_id).await.lock_owned().await;
    AccountLock {
      account_id: account_id.to_string(),
      repo: self.repo.clone(),
      book: guard,
    }
  }

  /// Credit realized P&L from a closed position.
  pub async fn record_close(&self, account_id: &str, pnl: Decimal) {
    let mut lock = self.lock_account(account_id).await;
    lock.book.realized_pnl += pnl;
    if pnl < Decimal::ZERO {
      warn!(account_id, pnl = %pnl, "Realized loss recorded");
    } else {
      debug!(account_id, pnl = %pnl, "Realized gain recorded");
    }
  }

  pub async fn snapshot(&self, account_id: &str) -> ExposureSnapshot {
    self.lock_account(account_id).await.snapshot()
  }
}

/// Exclusive handle on one account's exposure book.
pub struct AccountLock {
  account_id: AccountId,
  repo: Arc<dyn Repository>,
  book: OwnedMutexGuard<ExposureBook>,
}

impl AccountLock {
  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  /// Run the limit checks and, on success, reserve `size` for the signal.
  ///
  /// # Errors
  /// Returns error when the account is unknown or the store is unreadable.
  /// A failed limit is an `Ok(Rejected)`, not an error.
  pub async fn approve(
    &mut self,
    signal: &Signal,
    size: Decimal,
    strategy: &StrategyConfig,
    now: DateTime<Utc>,
  ) -> Result<ApprovalDecision> {
    anyhow::ensure!(
      signal.account_id == self.account_id,
      "signal {} belongs to account {}, not {}",
      signal.id,
      signal.account_id,
      self.account_id
    );
    let account = self
      .repo
      .get_account(&self.account_id)
      .await?
      .ok_or_else(|| BotError::NotFound {
        kind: "account",
        id: self.account_id.clone(),
      })?;
    let positions = self.repo.positions_for_account(&self.account_id).await?;

    let balance = account.trading_balance();
    let checked = self.check(signal, size, strategy, &positions, balance, account.last_synced_at, now);
    let decision = match checked {
      Some(rejection) => {
        info!(
          account_id = %self.account_id,
          signal_id = %signal.id,
          market_id = %signal.market_id,
          reason = %rejection,
          "Risk rejected signal"
        );
        ApprovalDecision::Rejected(rejection)
      }
      None => {
        self.book.pending.insert(
          signal.id,
          Reservation {
            market_id: signal.market_id.clone(),
            size,
            ambiguous: false,
          },
        );
        debug!(
          account_id = %self.account_id,
          signal_id = %signal.id,
          size = %size,
          pending = %self.book.pending_total(),
          "Reserved exposure"
        );
        ApprovalDecision::Approved(Approval {
          signal_id: signal.id,
          account_id: self.account_id.clone(),
          size,
          limit_price: strategy.limit_price(signal.price),
        })
      }
    };
    Ok(decision)
  }

  #[allow(clippy::too_many_arguments)]
  fn check(
    &self,
    signal: &Signal,
    size: Decimal,
    strategy: &StrategyConfig,
    positions: &[Position],
    balance: Decimal,
    last_synced_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
  ) -> Option<RiskRejection> {
    let open: Vec<&Position> = positions.iter().filter(|p| p.is_open()).collect();
    let held = open.iter().any(|p| p.market_id == signal.market_id);
    if held || self.book.holds_market(&signal.market_id) {
      return Some(RiskRejection::DuplicatePosition {
        market_id: signal.market_id.clone(),
      });
    }

    if size > strategy.max_position_size {
      return Some(RiskRejection::PositionSizeLimit {
        requested: size,
        limit: strategy.max_position_size,
      });
    }

    // Fills after the last balance sync are not reflected in the balance yet.
    let unsynced: Decimal = open
      .iter()
      .filter(|p| last_synced_at.is_none_or(|synced| p.entered_at > synced))
      .map(|p| p.size)
      .sum();
    let pending = self.book.pending_total();
    let available = balance - pending - unsynced;
    if available < size {
      return Some(RiskRejection::InsufficientBalance {
        available,
        requested: size,
      });
    }

    let current = open.iter().map(|p| p.size).sum::<Decimal>() + pending;
    if current + size > strategy.max_total_exposure {
      return Some(RiskRejection::ExposureLimit {
        current,
        requested: size,
        limit: strategy.max_total_exposure,
      });
    }

    let count = open.len() + self.book.pending.len();
    if count >= strategy.max_concurrent_positions {
      return Some(RiskRejection::ConcurrencyLimit {
        open: count,
        limit: strategy.max_concurrent_positions,
      });
    }

    let last_trade = positions
      .iter()
      .map(|p| p.entered_at)
      .chain(self.book.last_trade_at)
      .max();
    if let Some(last) = last_trade {
      let cooldown = i64::try_from(strategy.cooldown_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX);
      let elapsed = (now - last).max(chrono::Duration::zero());
      if elapsed < cooldown {
        let remaining = (cooldown - elapsed).num_milliseconds().max(0);
        let remaining_secs = u64::try_from((remaining + 999) / 1000).unwrap_or(0);
        return Some(RiskRejection::Cooldown { remaining_secs });
      }
    }

    None
  }

  /// Report how an approved order ended.
  pub fn settle(&mut self, signal_id: SignalId, outcome: Settlement) {
    match outcome {
      Settlement::Filled(at) => {
        self.book.pending.remove(&signal_id);
        self.book.last_trade_at = self.book.last_trade_at.max(Some(at));
      }
      Settlement::NotFilled => {
        if self.book.pending.remove(&signal_id).is_some() {
          debug!(account_id = %self.account_id, %signal_id, "Released reservation");
        }
      }
      Settlement::Ambiguous => {
        if let Some(reservation) = self.book.pending.get_mut(&signal_id) {
          reservation.ambiguous = true;
          warn!(
            account_id = %self.account_id,
            %signal_id,
            size = %reservation.size,
            "Reservation held pending reconciliation"
          );
        }
      }
    }
  }

  /// Re-create the reservation of an order whose outcome is still unknown.
  pub fn restore(&mut self, signal: &Signal) {
    let size = signal.order_size.unwrap_or(Decimal::ZERO);
    self.book.pending.insert(
      signal.id,
      Reservation {
        market_id: signal.market_id.clone(),
        size,
        ambiguous: true,
      },
    );
  }

  pub fn snapshot(&self) -> ExposureSnapshot {
    ExposureSnapshot {
      pending_total: self.book.pending_total(),
      pending_count: self.book.pending.len(),
      ambiguous_count: self.book.pending.values().filter(|r| r.ambiguous).count(),
      last_trade_at: self.book.last_trade_at,
      realized_pnl: self.book.realized_pnl,
    }
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use rust_decimal_macros::dec;

  use super::*;
  use crate::adapters::persistence::JsonStore;
  use crate::domain::{Account, Outcome};

  async fn setup(balance: Decimal) -> (Arc<dyn Repository>, RiskManager) {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    let mut balances = BTreeMap::new();
    balances.insert("USDC".to_string(), balance);
    repo
      .upsert_account(&Account {
        id: "acct".into(),
        address: "0xabc".into(),
        balances,
        agent_ids: vec!["agent".into()],
        last_synced_at: Some(Utc::now() - chrono::Duration::days(1)),
      })
      .await
      .unwrap();
    let risk = RiskManager::new(repo.clone());
    (repo, risk)
  }

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

  fn strategy() -> StrategyConfig {
    StrategyConfig {
      cooldown_secs: 0,
      ..StrategyConfig::default()
    }
  }

  fn rejection(decision: ApprovalDecision) -> RiskRejection {
    match decision {
      ApprovalDecision::Rejected(r) => r,
      ApprovalDecision::Approved(a) => panic!("expected rejection, got {a:?}"),
    }
  }

  #[tokio::test]
  async fn test_approval_reserves_and_blocks_same_market() {
    let (_repo, risk) = setup(dec!(1000)).await;
    let mut lock = risk.lock_account("acct").await;
    let first = lock.approve(&signal("m1"), dec!(100), &strategy(), Utc::now()).await.unwrap();
    let ApprovalDecision::Approved(approval) = first else {
      panic!("first signal should pass");
    };
    assert_eq!(approval.limit_price(), dec!(0.867));
    let second = lock.approve(&signal("m1"), dec!(100), &strategy(), Utc::now()).await.unwrap();
    assert!(matches!(rejection(second), RiskRejection::DuplicatePosition { .. }));
    assert_eq!(lock.snapshot().pending_total, dec!(100));
  }

  #[tokio::test]
  async fn test_balance_counts_pending() {
    let (_repo, risk) = setup(dec!(150)).await;
    let mut lock = risk.lock_account("acct").await;
    lock.approve(&signal("m1"), dec!(100), &strategy(), Utc::now()).await.unwrap();
    let r = rejection(lock.approve(&signal("m2"), dec!(100), &strategy(), Utc::now()).await.unwrap());
    assert_eq!(
      r,
      RiskRejection::InsufficientBalance {
        available: dec!(50),
        requested: dec!(100)
      }
    );
  }

  #[tokio::test]
  async fn test_exposure_and_concurrency_limits() {
    let (_repo, risk) = setup(dec!(10000)).await;
    let mut lock = risk.lock_account("acct").await;
    let cfg = StrategyConfig {
      max_total_exposure: dec!(250),
      ..strategy()
    };
    lock.approve(&signal("m1"), dec!(100), &cfg, Utc::now()).await.unwrap();
    lock.approve(&signal("m2"), dec!(100), &cfg, Utc::now()).await.unwrap();
    let r = rejection(lock.approve(&signal("m3"), dec!(100), &cfg, Utc::now()).await.unwrap());
    assert!(matches!(r, RiskRejection::ExposureLimit { .. }));

    let cfg = StrategyConfig {
      max_concurrent_positions: 2,
      ..strategy()
    };
    let r = rejection(lock.approve(&signal("m4"), dec!(10), &cfg, Utc::now()).await.unwrap());
    assert_eq!(r, RiskRejection::ConcurrencyLimit { open: 2, limit: 2 });
  }

  #[tokio::test]
  async fn test_cooldown_after_fill() {
    let (_repo, risk) = setup(dec!(1000)).await;
    let cfg = StrategyConfig {
      cooldown_secs: 60,
      ..StrategyConfig::default()
    };
    let mut lock = risk.lock_account("acct").await;
    let now = Utc::now();
    let s1 = signal("m1");
    let ApprovalDecision::Approved(a) = lock.approve(&s1, dec!(100), &cfg, now).await.unwrap() else {
      panic!("first signal should pass");
    };
    lock.settle(a.signal_id(), Settlement::Filled(now));
    let r = rejection(
      lock
        .approve(&signal("m2"), dec!(100), &cfg, now + chrono::Duration::seconds(30))
        .await
        .unwrap(),
    );
    assert_eq!(r, RiskRejection::Cooldown { remaining_secs: 30 });
    assert!(r.to_string().contains("cooldown"));
  }

  #[tokio::test]
  async fn test_not_filled_releases_but_ambiguous_holds() {
    let (_repo, risk) = setup(dec!(1000)).await;
    let mut lock = risk.lock_account("acct").await;
    let s1 = signal("m1");
    let s2 = signal("m2");
    lock.approve(&s1, dec!(100), &strategy(), Utc::now()).await.unwrap();
    lock.approve(&s2, dec!(100), &strategy(), Utc::now()).await.unwrap();
    lock.settle(s1.id, Settlement::NotFilled);
    lock.settle(s2.id, Settlement::Ambiguous);
    let snap = lock.snapshot();
    assert_eq!(snap.pending_total, dec!(100));
    assert_eq!(snap.ambiguous_count, 1);
  }

  #[tokio::test]
  async fn test_oversized_request_rejected_before_balance() {
    let (_repo, risk) = setup(dec!(1)).await;
    let mut lock = risk.lock_account("acct").await;
    let r = rejection(lock.approve(&signal("m1"), dec!(900), &strategy(), Utc::now()).await.unwrap());
    assert!(matches!(r, RiskRejection::PositionSizeLimit { .. }));
  }

  #[tokio::test]
  async fn test_oversized_duplicate_reported_as_duplicate() {
    let (_repo, risk) = setup(dec!(1000)).await;
    let mut lock = risk.lock_account("acct").await;
    lock.approve(&signal("m1"), dec!(100), &strategy(), Utc::now()).await.unwrap();
    let r = rejection(lock.approve(&signal("m1"), dec!(900), &strategy(), Utc::now()).await.unwrap());
    assert_eq!(
      r,
      RiskRejection::DuplicatePosition {
        market_id: "m1".into()
      }
    );
  }

  #[tokio::test]
  async fn test_unknown_account_is_error() {
    let (_repo, risk) = setup(dec!(1)).await;
    let mut lock = risk.lock_account("other").await;
    let mut s = signal("m1");
    s.account_id = "other".into();
    let err = lock.approve(&s, dec!(1), &strategy(), Utc::now()).await.unwrap_err();
    assert!(matches!(BotError::find(&err), Some(BotError::NotFound { .. })));
  }

  #[tokio::test]
  async fn test_record_close_accumulates_pnl() {
    let (_repo, risk) = setup(dec!(1)).await;
    risk.record_close("acct", dec!(15)).await;
    risk.record_close("acct", dec!(-5)).await;
    assert_eq!(risk.snapshot("acct").await.realized_pnl, dec!(10));
  }
}
