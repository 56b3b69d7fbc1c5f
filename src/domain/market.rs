//! Market snapshots as returned by the market feed.
//!
//! A `Market` is an immutable view of one market taken during one scan
//! cycle. Nothing holds on to it across cycles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// External market identifier.
pub type MarketId = String;

/// Outcome token identifier on the venue.
pub type TokenId = String;

/// Binary market outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    /// Parse a venue/feed outcome label ("Yes", "NO", ...).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "YES" => Some(Self::Yes),
            "NO" => Some(Self::No),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yes => write!(f, "YES"),
            Self::No => write!(f, "NO"),
        }
    }
}

/// Resolution state of a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStatus {
    /// Event still in progress.
    Active,
    /// Real-world event over, on-chain resolution pending.
    EndedUnresolved,
    /// Settled on-chain.
    Resolved,
}

/// Price of one outcome token in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeQuote {
    pub outcome: Outcome,
    pub token_id: TokenId,
    /// Last traded / best price in USDC per share.
    pub price: Decimal,
    /// Confidence in [0, 1] from the upstream known-outcome feed that this
    /// outcome is the real-world result. `None` when no such signal exists.
    #[serde(default)]
    pub truth_confidence: Option<f64>,
}

/// One market as seen in one scan cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub question: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Scheduled end of the real-world event.
    pub end_time: Option<DateTime<Utc>>,
    pub status: ResolutionStatus,
    pub outcomes: Vec<OutcomeQuote>,
    /// Book liquidity in USDC.
    #[serde(default)]
    pub liquidity: Decimal,
}

impl Market {
    /// Quote for a given outcome, if the market lists it.
    pub fn quote(&self, outcome: Outcome) -> Option<&OutcomeQuote> {
        self.outcomes.iter().find(|q| q.outcome == outcome)
    }

    /// Time elapsed since the market's end. `None` if there is no end time
    /// or the end is still in the future.
    pub fn elapsed_since_end(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        let end = self.end_time?;
        (end <= now).then(|| now - end)
    }
}
