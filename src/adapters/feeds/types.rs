//! Gamma API response types.
//!
//! Gamma encodes list fields (`outcomes`, `outcomePrices`, `clobTokenIds`)
//! as JSON strings inside the JSON document, so they are decoded in a
//! second pass.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::Deserialize;
use tracing::debug;

use crate::domain::market::{Market, Outcome, OutcomeQuote, ResolutionStatus};

/// One market as listed by `GET /markets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GammaMarket {
    pub condition_id: String,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed: bool,
    /// JSON-encoded outcome names, e.g. `["Yes", "No"]`.
    #[serde(default)]
    pub outcomes: Option<String>,
    /// JSON-encoded outcome prices, e.g. `["0.85", "0.15"]`.
    #[serde(default)]
    pub outcome_prices: Option<String>,
    /// JSON-encoded CLOB token ids.
    #[serde(default)]
    pub clob_token_ids: Option<String>,
    #[serde(default)]
    pub liquidity_num: Option<f64>,
    /// UMA oracle state, "resolved" once settled.
    #[serde(default)]
    pub uma_resolution_status: Option<String>,
}

fn decode_list(raw: Option<&str>, field: &str, market: &str) -> Vec<String> {
    raw.and_then(|s| {
        serde_json::from_str::<Vec<String>>(s)
            .map_err(|e| debug!(error = %e, raw = %s, market, field, "Failed to decode Gamma list"))
            .ok()
    })
    .unwrap_or_default()
}

impl GammaMarket {
    pub fn outcome_names(&self) -> Vec<String> {
        decode_list(self.outcomes.as_deref(), "outcomes", &self.condition_id)
    }

    pub fn prices(&self) -> Vec<Decimal> {
        decode_list(self.outcome_prices.as_deref(), "outcomePrices", &self.condition_id)
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect()
    }

    pub fn token_ids(&self) -> Vec<String> {
        decode_list(self.clob_token_ids.as_deref(), "clobTokenIds", &self.condition_id)
    }

    pub fn is_resolved(&self) -> bool {
        self.closed
            && self
                .uma_resolution_status
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("resolved"))
    }

    /// Resolution status at `now`.
    pub fn status(&self, now: DateTime<Utc>) -> ResolutionStatus {
        if self.is_resolved() {
            ResolutionStatus::Resolved
        } else if self.end_date.is_some_and(|end| end <= now) {
            ResolutionStatus::EndedUnresolved
        } else {
            ResolutionStatus::Active
        }
    }

    /// `(outcome, price)` pairs for the binary YES/NO sides.
    pub fn priced_outcomes(&self) -> Vec<(Outcome, Decimal)> {
        self.outcome_names()
            .iter()
            .zip(self.prices())
            .filter_map(|(name, price)| Outcome::from_label(name).map(|o| (o, price)))
            .collect()
    }

    /// Convert to a domain snapshot. `None` when the outcome lists don't
    /// line up (non-binary or malformed market).
    pub fn into_market(self, now: DateTime<Utc>) -> Option<Market> {
        let names = self.outcome_names();
        let prices = self.prices();
        let tokens = self.token_ids();
        if names.is_empty() || names.len() != prices.len() || names.len() != tokens.len() {
            return None;
        }
        let outcomes: Vec<OutcomeQuote> = names
            .iter()
            .zip(prices)
            .zip(tokens)
            .filter_map(|((name, price), token_id)| {
                Some(OutcomeQuote {
                    outcome: Outcome::from_label(name)?,
                    token_id,
                    price,
                    truth_confidence: None,
                })
            })
            .collect();
        if outcomes.len() != names.len() {
            return None;
        }
        let status = self.status(now);
        Some(Market {
            question: self.question.unwrap_or_default(),
            category: self.category,
            end_time: self.end_date,
            status,
            outcomes,
            liquidity: self
                .liquidity_num
                .and_then(Decimal::from_f64)
                .unwrap_or_default(),
            id: self.condition_id,
        })
    }
}
