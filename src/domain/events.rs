//! Pipeline events broadcast to observers (metrics, notifiers).

use rust_decimal::Decimal;
use serde::Serialize;

use super::account::AccountId;
use super::agent::AgentId;
use super::market::{MarketId, Outcome};
use super::position::PositionId;
use super::signal::{SignalId, SignalReason};

/// Something observable happened in an agent's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    AgentStarted {
        agent_id: AgentId,
    },
    AgentStopped {
        agent_id: AgentId,
    },
    AgentError {
        agent_id: AgentId,
        error: String,
    },
    SignalDetected {
        agent_id: AgentId,
        signal_id: SignalId,
        market_id: MarketId,
        outcome: Outcome,
        price: Decimal,
        discount: Decimal,
    },
    SignalVerified {
        agent_id: AgentId,
        signal_id: SignalId,
        confidence: f64,
    },
    SignalRejected {
        agent_id: AgentId,
        signal_id: SignalId,
        reason: SignalReason,
    },
    SignalExecuted {
        agent_id: AgentId,
        signal_id: SignalId,
        position_id: PositionId,
    },
    SignalFailed {
        agent_id: AgentId,
        signal_id: SignalId,
        reason: SignalReason,
    },
    PositionOpened {
        account_id: AccountId,
        position_id: PositionId,
        market_id: MarketId,
        size: Decimal,
        entry_price: Decimal,
    },
    PositionClosed {
        account_id: AccountId,
        position_id: PositionId,
        market_id: MarketId,
        realized_pnl: Decimal,
        /// Settlement paid out on the side we bought.
        won: bool,
    },
    PositionError {
        account_id: AccountId,
        position_id: PositionId,
        note: String,
    },
    PositionStale {
        account_id: AccountId,
        position_id: PositionId,
        hours_open: i64,
    },
}

impl BotEvent {
    /// Short label used as a metrics dimension.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AgentStarted { .. } => "agent_started",
            Self::AgentStopped { .. } => "agent_stopped",
            Self::AgentError { .. } => "agent_error",
            Self::SignalDetected { .. } => "signal_detected",
            Self::SignalVerified { .. } => "signal_verified",
            Self::SignalRejected { .. } => "signal_rejected",
            Self::SignalExecuted { .. } => "signal_executed",
            Self::SignalFailed { .. } => "signal_failed",
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionClosed { .. } => "position_closed",
            Self::PositionError { .. } => "position_error",
            Self::PositionStale { .. } => "position_stale",
        }
    }
}
