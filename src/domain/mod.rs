//! Domain layer - Core business logic and models.
//!
//! Records, lifecycle state machines and the pure signal detector.
//! No I/O here (hexagonal architecture inner ring).
//! All types are serializable and testable in isolation.

pub mod account;
pub mod agent;
pub mod detector;
pub mod error;
pub mod events;
pub mod market;
pub mod position;
pub mod signal;

// Re-export core types for convenience
pub use account::{Account, AccountId, TRADING_ASSET};
pub use agent::{Agent, AgentId, AgentStatus, StrategyConfig};
pub use error::BotError;
pub use events::BotEvent;
pub use market::{Market, MarketId, Outcome, OutcomeQuote, ResolutionStatus, TokenId};
pub use position::{Position, PositionId, PositionStatus};
pub use signal::{
    RiskRejection, Signal, SignalId, SignalReason, SignalStatus, VerificationResult,
};
