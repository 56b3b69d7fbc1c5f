//! Market Feed Port - Market Snapshot Interface
//!
//! Defines the trait for fetching market metadata and prices
//! from the prediction market data provider. Pure fetch: every call
//! returns fresh snapshots and implementors keep no state between calls.

use async_trait::async_trait;

use crate::domain::market::Market;

/// Trait for market data providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketFeed: Send + Sync + 'static {
  /// Fetch every market the provider considers ended or recently active.
  ///
  /// # Errors
  /// Returns a `BotError::Transient` on network failure or timeout.
  async fn fetch_markets(&self) -> anyhow::Result<Vec<Market>>;

  /// Fetch a single market snapshot by id.
  ///
  /// Returns `None` if the provider does not know the market.
  async fn fetch_market(&self, market_id: &str) -> anyhow::Result<Option<Market>>;
}
