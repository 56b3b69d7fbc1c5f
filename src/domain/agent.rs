//! Trading agents and their strategy configuration.
//!
//! An agent binds one strategy to one account and owns one scan loop while
//! `Running`. Its status is the only field mutated from outside the loop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::error::BotError;

pub type AgentId = String;

/// Runtime status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Idle,
    Running,
    Stopped,
    Error,
}

impl AgentStatus {
    /// Legal state machine edges. Any state may fall into `Error`;
    /// `Error -> Running` is an operator restart.
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle | Self::Stopped | Self::Error, Self::Running)
                | (Self::Running, Self::Stopped)
                | (_, Self::Error)
        )
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

const fn default_min_discount() -> Decimal {
    dec!(0.01)
}
const fn default_max_price() -> Decimal {
    dec!(0.99)
}
const fn default_max_slippage() -> Decimal {
    dec!(0.02)
}
const fn default_max_hours_since_end() -> u32 {
    24
}
const fn default_confidence_threshold() -> f64 {
    0.95
}
const fn default_position_size() -> Decimal {
    dec!(100)
}
const fn default_max_position_size() -> Decimal {
    dec!(500)
}
const fn default_max_total_exposure() -> Decimal {
    dec!(1500)
}
const fn default_max_concurrent_positions() -> usize {
    3
}
const fn default_cooldown_secs() -> u64 {
    60
}
const fn default_scan_interval_secs() -> u64 {
    30
}
const fn default_max_consecutive_failures() -> u32 {
    5
}

/// Oracle-latency strategy parameters. Every field has a default so an
/// `[agents.strategy]` table may be partial or empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Minimum `1 - price` for a market to qualify.
    #[serde(default = "default_min_discount")]
    pub min_discount: Decimal,
    /// Never pay more than this per share.
    #[serde(default = "default_max_price")]
    pub max_price: Decimal,
    /// Limit price headroom above the observed price.
    #[serde(default = "default_max_slippage")]
    pub max_slippage: Decimal,
    /// Markets ended longer ago than this are ignored.
    #[serde(default = "default_max_hours_since_end")]
    pub max_hours_since_end: u32,
    /// Markets must have ended at least this long ago.
    #[serde(default)]
    pub min_hours_since_end: u32,
    /// Minimum verifier confidence to trade.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Base order size in USDC.
    #[serde(default = "default_position_size")]
    pub position_size: Decimal,
    /// Hard cap per position in USDC.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: Decimal,
    /// Scale `position_size` by verifier confidence.
    #[serde(default)]
    pub scale_size_by_confidence: bool,
    /// Cap on open + pending exposure per account.
    #[serde(default = "default_max_total_exposure")]
    pub max_total_exposure: Decimal,
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,
    /// Minimum gap between two executed trades on the account.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    /// Consecutive failed cycles before the agent goes to `Error`.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    /// Minimum book liquidity in USDC.
    #[serde(default)]
    pub min_liquidity: Decimal,
    /// If non-empty, only these categories are scanned.
    #[serde(default)]
    pub focus_categories: Vec<String>,
    #[serde(default)]
    pub ignore_categories: Vec<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_discount: default_min_discount(),
            max_price: default_max_price(),
            max_slippage: default_max_slippage(),
            max_hours_since_end: default_max_hours_since_end(),
            min_hours_since_end: 0,
            confidence_threshold: default_confidence_threshold(),
            position_size: default_position_size(),
            max_position_size: default_max_position_size(),
            scale_size_by_confidence: false,
            max_total_exposure: default_max_total_exposure(),
            max_concurrent_positions: default_max_concurrent_positions(),
            cooldown_secs: default_cooldown_secs(),
            scan_interval_secs: default_scan_interval_secs(),
            max_consecutive_failures: default_max_consecutive_failures(),
            min_liquidity: Decimal::ZERO,
            focus_categories: Vec::new(),
            ignore_categories: Vec::new(),
        }
    }
}

impl StrategyConfig {
    /// Reject configurations the pipeline cannot run safely.
    pub fn validate(&self) -> Result<(), BotError> {
        let fail = |msg: String| Err(BotError::FatalConfig(msg));
        if self.min_discount <= Decimal::ZERO || self.min_discount >= Decimal::ONE {
            return fail(format!("min_discount must be in (0, 1), got {}", self.min_discount));
        }
        if self.max_price <= Decimal::ZERO || self.max_price > Decimal::ONE {
            return fail(format!("max_price must be in (0, 1], got {}", self.max_price));
        }
        if self.max_slippage < Decimal::ZERO {
            return fail(format!("max_slippage must be >= 0, got {}", self.max_slippage));
        }
        if self.min_hours_since_end > self.max_hours_since_end {
            return fail(format!(
                "min_hours_since_end {} exceeds max_hours_since_end {}",
                self.min_hours_since_end, self.max_hours_since_end
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return fail(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.position_size <= Decimal::ZERO {
            return fail(format!("position_size must be > 0, got {}", self.position_size));
        }
        if self.position_size > self.max_position_size {
            return fail(format!(
                "position_size {} exceeds max_position_size {}",
                self.position_size, self.max_position_size
            ));
        }
        if self.max_total_exposure <= Decimal::ZERO {
            return fail("max_total_exposure must be > 0".into());
        }
        if self.max_concurrent_positions == 0 {
            return fail("max_concurrent_positions must be >= 1".into());
        }
        if self.scan_interval_secs == 0 {
            return fail("scan_interval_secs must be >= 1".into());
        }
        if self.max_consecutive_failures == 0 {
            return fail("max_consecutive_failures must be >= 1".into());
        }
        Ok(())
    }

    /// Order size for a verified signal.
    pub fn requested_size(&self, confidence: f64) -> Decimal {
        if !self.scale_size_by_confidence {
            return self.position_size;
        }
        let factor = Decimal::from_f64(confidence.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO);
        (self.position_size * factor).round_dp(2)
    }

    /// Worst price accepted for an order on a side observed at `observed`.
    pub fn limit_price(&self, observed: Decimal) -> Decimal {
        (observed * (Decimal::ONE + self.max_slippage))
            .round_dp(4)
            .min(self.max_price)
    }
}

/// A configured trading agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub account_id: AccountId,
    #[serde(default)]
    pub strategy: StrategyConfig,
    pub status: AgentStatus,
    #[serde(default)]
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Agent {
    pub fn new(id: AgentId, name: String, account_id: AccountId, strategy: StrategyConfig) -> Self {
        Self {
            id,
            name,
            account_id,
            strategy,
            status: AgentStatus::Idle,
            last_heartbeat: None,
            last_error: None,
            started_at: None,
            stopped_at: None,
        }
    }

    /// Move to `next`, stamping the matching timestamp.
    pub fn transition(&mut self, next: AgentStatus, now: DateTime<Utc>) -> Result<(), BotError> {
        if !self.status.can_transition(next) {
            return Err(BotError::InvalidTransition {
                kind: "agent",
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        match next {
            AgentStatus::Running => {
                self.started_at = Some(now);
                self.stopped_at = None;
                self.last_error = None;
            }
            AgentStatus::Stopped | AgentStatus::Error => self.stopped_at = Some(now),
            AgentStatus::Idle => {}
        }
        self.status = next;
        Ok(())
    }
}
