//! Settlement Port - On-chain Resolution Interface
//!
//! Defines the trait for learning whether a market has resolved
//! on-chain and what each outcome token pays out.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::market::Outcome;

/// Resolution state of a market as seen by the settlement source.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  /// Not resolved yet.
  Pending,
  /// Resolved with a payout per share for each outcome.
  Resolved {
    /// Payout per share, 0 to 1.
    payouts: Vec<(Outcome, Decimal)>,
  },
}

impl Resolution {
  /// Payout for one side, if resolved and listed.
  pub fn payout(&self, outcome: Outcome) -> Option<Decimal> {
    match self {
      Self::Pending => None,
      Self::Resolved { payouts } => payouts
        .iter()
        .find(|(o, _)| *o == outcome)
        .map(|(_, v)| *v),
    }
  }
}

/// Trait for settlement data providers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettlementSource: Send + Sync + 'static {
  /// Current resolution state of a market.
  async fn resolution(&self, market_id: &str) -> anyhow::Result<Resolution>;
}
