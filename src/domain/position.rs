//! Positions opened on confirmed fills and tracked until settlement.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::error::BotError;
use super::market::{MarketId, Outcome, TokenId};
use super::signal::{Signal, SignalId};

pub type PositionId = Uuid;

/// Position lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    Closed,
    /// Settlement could not be valued. Needs an operator.
    Error,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A filled order waiting for, or past, settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    /// Signal whose execution created this position.
    pub signal_id: SignalId,
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub outcome: Outcome,
    pub token_id: TokenId,
    /// Committed size in USDC.
    pub size: Decimal,
    /// Fill price.
    pub entry_price: Decimal,
    pub status: PositionStatus,
    pub entered_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Payout per share at settlement.
    #[serde(default)]
    pub settlement_value: Option<Decimal>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Position {
    /// Open a position for a filled signal.
    pub fn open(signal: &Signal, size: Decimal, entry_price: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            account_id: signal.account_id.clone(),
            market_id: signal.market_id.clone(),
            outcome: signal.outcome,
            token_id: signal.token_id.clone(),
            size,
            entry_price,
            status: PositionStatus::Open,
            entered_at: now,
            closed_at: None,
            settlement_value: None,
            realized_pnl: None,
            note: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Close on settlement. Returns the realized P&L,
    /// `(settlement_value - entry_price) * size`.
    pub fn close(
        &mut self,
        settlement_value: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, BotError> {
        self.ensure_open(PositionStatus::Closed)?;
        let pnl = (settlement_value - self.entry_price) * self.size;
        self.status = PositionStatus::Closed;
        self.closed_at = Some(now);
        self.settlement_value = Some(settlement_value);
        self.realized_pnl = Some(pnl);
        Ok(pnl)
    }

    /// Park the position in `Error` with a note for the operator.
    pub fn mark_error(&mut self, note: impl Into<String>, now: DateTime<Utc>) -> Result<(), BotError> {
        self.ensure_open(PositionStatus::Error)?;
        self.status = PositionStatus::Error;
        self.closed_at = Some(now);
        self.note = Some(note.into());
        Ok(())
    }

    /// Open for longer than `stale_after`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        self.is_open() && now - self.entered_at > stale_after
    }

    fn ensure_open(&self, to: PositionStatus) -> Result<(), BotError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BotError::InvalidTransition {
                kind: "position",
                from: self.status.to_string(),
                to: to.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn position(entry: Decimal, size: Decimal) -> Position {
        let signal = Signal::detected(
            "a".into(),
            "acct".into(),
            "m1".into(),
            "q".into(),
            None,
            Outcome::Yes,
            "tok".into(),
            entry,
            Utc::now(),
        );
        Position::open(&signal, size, entry, Utc::now())
    }

    #[test]
    fn test_close_realizes_pnl() {
        let mut p = position(dec!(0.85), dec!(100));
        let pnl = p.close(dec!(1.00), Utc::now()).unwrap();
        assert_eq!(pnl, dec!(15.00));
        assert_eq!(p.status, PositionStatus::Closed);
        assert_eq!(p.realized_pnl, Some(dec!(15.00)));
    }

    #[test]
    fn test_losing_settlement_is_negative() {
        let mut p = position(dec!(0.9), dec!(50));
        assert_eq!(p.close(dec!(0), Utc::now()).unwrap(), dec!(-45.0));
    }

    #[test]
    fn test_cannot_close_twice() {
        let mut p = position(dec!(0.9), dec!(50));
        p.close(dec!(1), Utc::now()).unwrap();
        assert!(p.close(dec!(1), Utc::now()).is_err());
        assert!(p.mark_error("late", Utc::now()).is_err());
    }

    #[test]
    fn test_stale_flag() {
        let mut p = position(dec!(0.9), dec!(50));
        p.entered_at = Utc::now() - Duration::hours(80);
        assert!(p.is_stale(Utc::now(), Duration::hours(72)));
        assert!(!p.is_stale(Utc::now(), Duration::hours(96)));
    }
}
