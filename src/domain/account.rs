//! Trading accounts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::agent::AgentId;

pub type AccountId = String;

/// Asset every order is paid in.
pub const TRADING_ASSET: &str = "USDC";

/// A funded account. Balances are refreshed by an external sync job and
/// only read by the bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// On-chain wallet address.
    pub address: String,
    /// Last synced balance per asset symbol.
    #[serde(default)]
    pub balances: BTreeMap<String, Decimal>,
    /// Agents trading from this account.
    #[serde(default)]
    pub agent_ids: Vec<AgentId>,
    #[serde(default)]
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Account {
    /// USDC balance, zero when never synced.
    pub fn trading_balance(&self) -> Decimal {
        self.balances
            .get(TRADING_ASSET)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_trading_balance_defaults_to_zero() {
        let mut account = Account {
            id: "acct".into(),
            address: "0xabc".into(),
            balances: BTreeMap::new(),
            agent_ids: vec![],
            last_synced_at: None,
        };
        assert_eq!(account.trading_balance(), Decimal::ZERO);
        account.balances.insert("USDC".into(), dec!(250));
        account.balances.insert("MATIC".into(), dec!(3));
        assert_eq!(account.trading_balance(), dec!(250));
    }
}
