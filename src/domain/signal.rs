//! Trading signals and their lifecycle.
//!
//! A `Signal` is created by the detector, then advanced by exactly one stage
//! at a time: verifier → risk manager → order executor. Each transition is
//! checked here so an out-of-order write fails loudly instead of corrupting
//! the record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::account::AccountId;
use super::agent::AgentId;
use super::error::BotError;
use super::market::{MarketId, Outcome, TokenId};

/// Signal identifier. Doubles as the venue idempotency key.
pub type SignalId = Uuid;

/// Lifecycle status of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Detected,
    Verified,
    Rejected,
    Executing,
    Executed,
    Failed,
}

impl SignalStatus {
    /// Whether `self -> next` is a legal lifecycle step.
    ///
    /// `Failed -> Executed` exists for reconciliation of an ambiguous order
    /// that turned out to be filled.
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Detected, Self::Verified | Self::Rejected)
                | (Self::Verified, Self::Rejected | Self::Executing)
                | (Self::Executing, Self::Executed | Self::Failed)
                | (Self::Failed, Self::Executed | Self::Failed)
        )
    }

    /// No further stage will touch a signal in this status.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Executed)
    }
}

impl std::fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Detected => "DETECTED",
            Self::Verified => "VERIFIED",
            Self::Rejected => "REJECTED",
            Self::Executing => "EXECUTING",
            Self::Executed => "EXECUTED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Outcome of an AI verification. Immutable once attached to a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub signal_id: SignalId,
    /// Confidence in [0, 1] that the detected outcome is the real result.
    pub confidence: f64,
    pub rationale: String,
    pub verified_at: DateTime<Utc>,
}

/// Why the risk manager refused a trade.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskRejection {
    #[error("account already holds or is entering a position in market {market_id}")]
    DuplicatePosition { market_id: MarketId },

    #[error("insufficient balance: available {available}, requested {requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("exposure limit: current {current} + requested {requested} > limit {limit}")]
    ExposureLimit {
        current: Decimal,
        requested: Decimal,
        limit: Decimal,
    },

    #[error("concurrency limit: {open} open or pending positions, limit {limit}")]
    ConcurrencyLimit { open: usize, limit: usize },

    #[error("account in cooldown for another {remaining_secs}s")]
    Cooldown { remaining_secs: u64 },

    #[error("position size {requested} exceeds per-position limit {limit}")]
    PositionSizeLimit { requested: Decimal, limit: Decimal },
}

/// Reason recorded on a `Rejected` or `Failed` signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalReason {
    /// Verifier call timed out or returned garbage.
    VerificationFailed { error: String },
    ConfidenceBelowThreshold { confidence: f64, threshold: f64 },
    Risk { rejection: RiskRejection },
    VenueRejected { reason: String },
    /// Order expired or was cancelled without any fill.
    NotFilled,
    /// Submission outcome unknown; order is under reconciliation.
    ExecutionAmbiguous { error: String },
    /// Agent stopped between verification and execution.
    AgentStopping,
}

impl std::fmt::Display for SignalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VerificationFailed { error } => write!(f, "verification failed: {error}"),
            Self::ConfidenceBelowThreshold {
                confidence,
                threshold,
            } => write!(f, "confidence {confidence:.3} below threshold {threshold:.3}"),
            Self::Risk { rejection } => write!(f, "risk rejected: {rejection}"),
            Self::VenueRejected { reason } => write!(f, "venue rejected order: {reason}"),
            Self::NotFilled => write!(f, "order not filled"),
            Self::ExecutionAmbiguous { error } => write!(f, "execution ambiguous: {error}"),
            Self::AgentStopping => write!(f, "agent stopping"),
        }
    }
}

/// A detected mispricing on a market whose outcome looks settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub agent_id: AgentId,
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub question: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Side believed to have won.
    pub outcome: Outcome,
    pub token_id: TokenId,
    /// Observed price of the winning side.
    pub price: Decimal,
    /// `1 - price`: the payout left on the table.
    pub discount: Decimal,
    pub detected_at: DateTime<Utc>,
    pub status: SignalStatus,
    #[serde(default)]
    pub verification: Option<VerificationResult>,
    #[serde(default)]
    pub reason: Option<SignalReason>,
    /// Order size committed when execution began.
    #[serde(default)]
    pub order_size: Option<Decimal>,
    /// Limit price sent to the venue.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Signal {
    /// Fresh signal in `Detected`.
    #[allow(clippy::too_many_arguments)]
    pub fn detected(
        agent_id: AgentId,
        account_id: AccountId,
        market_id: MarketId,
        question: String,
        category: Option<String>,
        outcome: Outcome,
        token_id: TokenId,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_id,
            account_id,
            market_id,
            question,
            category,
            outcome,
            token_id,
            price,
            discount: Decimal::ONE - price,
            detected_at: now,
            status: SignalStatus::Detected,
            verification: None,
            reason: None,
            order_size: None,
            limit_price: None,
            updated_at: now,
        }
    }

    /// Venue idempotency key for this signal.
    pub fn idempotency_key(&self) -> String {
        self.id.to_string()
    }

    /// Verifier confidence, if verification happened.
    pub fn confidence(&self) -> Option<f64> {
        self.verification.as_ref().map(|v| v.confidence)
    }

    fn advance(&mut self, next: SignalStatus, now: DateTime<Utc>) -> Result<(), BotError> {
        if !self.status.can_transition(next) {
            return Err(BotError::InvalidTransition {
                kind: "signal",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Attach the verification and pass the confidence gate.
    pub fn verify(
        &mut self,
        result: VerificationResult,
        now: DateTime<Utc>,
    ) -> Result<(), BotError> {
        self.advance(SignalStatus::Verified, now)?;
        self.verification = Some(result);
        Ok(())
    }

    pub fn reject(&mut self, reason: SignalReason, now: DateTime<Utc>) -> Result<(), BotError> {
        self.advance(SignalStatus::Rejected, now)?;
        self.reason = Some(reason);
        Ok(())
    }

    /// Mark the signal as being submitted to the venue with the given order.
    pub fn begin_execution(
        &mut self,
        size: Decimal,
        limit_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), BotError> {
        self.advance(SignalStatus::Executing, now)?;
        self.order_size = Some(size);
        self.limit_price = Some(limit_price);
        Ok(())
    }

    pub fn mark_executed(&mut self, now: DateTime<Utc>) -> Result<(), BotError> {
        self.advance(SignalStatus::Executed, now)?;
        self.reason = None;
        Ok(())
    }

    pub fn fail(&mut self, reason: SignalReason, now: DateTime<Utc>) -> Result<(), BotError> {
        self.advance(SignalStatus::Failed, now)?;
        self.reason = Some(reason);
        Ok(())
    }

    /// Failed because the venue outcome is unknown.
    pub fn is_ambiguous(&self) -> bool {
        self.status == SignalStatus::Failed
            && matches!(self.reason, Some(SignalReason::ExecutionAmbiguous { .. }))
    }
}
