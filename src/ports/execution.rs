//! Execution Port - Venue Order Interface
//!
//! Defines the trait for placing, looking up and cancelling orders
//! on the execution venue (Polymarket CLOB in production, an in-process
//! paper venue in dry-run mode).
//!
//! Key design decisions:
//! - Every order carries a client idempotency key (the signal id)
//! - Lookups and cancels go by that key, never by venue order id
//! - Fill-or-kill orders: a report is final unless the state is `Pending`

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::market::{MarketId, Outcome, TokenId};

/// Buy order for one outcome token.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
  /// Client idempotency key.
  pub idempotency_key: String,
  pub market_id: MarketId,
  pub token_id: TokenId,
  pub outcome: Outcome,
  /// Size in USDC.
  pub size: Decimal,
  /// Worst acceptable price per share.
  pub limit_price: Decimal,
  /// Observed price when the signal was detected.
  pub expected_price: Decimal,
}

/// Venue-side state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
  /// Fully matched.
  Filled,
  /// Rejected, cancelled or expired without a fill.
  Rejected,
  /// Accepted but not yet matched.
  Pending,
}

/// What the venue reports for an order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
  pub idempotency_key: String,
  pub state: OrderState,
  /// Average fill price, present when `Filled`.
  pub fill_price: Option<Decimal>,
  /// Filled size in USDC.
  pub filled_size: Option<Decimal>,
  /// Venue-provided reason for a rejection.
  pub reason: Option<String>,
}

/// Trait for order execution venues.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionVenue: Send + Sync + 'static {
  /// Submit an order. Never retried by the caller.
  ///
  /// # Errors
  /// Returns error when the venue's answer is unknown (timeout, transport
  /// failure). Callers treat that as ambiguous, not as a rejection.
  async fn submit_order(&self, order: &OrderRequest) -> anyhow::Result<OrderReport>;

  /// Look up an order by idempotency key. `None` if the venue never saw it.
  async fn query_order(&self, idempotency_key: &str) -> anyhow::Result<Option<OrderReport>>;

  /// Cancel a resting order. Returns whether the venue cancelled it.
  async fn cancel_order(&self, idempotency_key: &str) -> anyhow::Result<bool>;
}
