//! Oracle-latency signal detection.
//!
//! Scans a batch of market snapshots for markets whose real-world event is
//! over but which still trade the (apparent) winning side at a discount to
//! its 1.00 settlement value. Pure function of its inputs.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use super::agent::{Agent, StrategyConfig};
use super::market::{Market, OutcomeQuote, ResolutionStatus};
use super::signal::Signal;

/// Detect signals for `agent` in `markets`.
///
/// At most one signal per market. Output is ordered by discount descending,
/// then market id.
pub fn detect(markets: &[Market], agent: &Agent, now: DateTime<Utc>) -> Vec<Signal> {
    let cfg = &agent.strategy;
    let mut seen = HashSet::new();
    let mut signals: Vec<Signal> = markets
        .iter()
        .filter(|m| passes_prefilters(m, cfg))
        .filter(|m| within_window(m, cfg, now))
        .filter_map(|m| {
            let quote = winning_side(&m.outcomes)?;
            if !is_discounted(quote.price, cfg.min_discount) {
                return None;
            }
            if !seen.insert(m.id.as_str()) {
                return None;
            }
            Some(Signal::detected(
                agent.id.clone(),
                agent.account_id.clone(),
                m.id.clone(),
                m.question.clone(),
                m.category.clone(),
                quote.outcome,
                quote.token_id.clone(),
                quote.price,
                now,
            ))
        })
        .collect();

    signals.sort_by(|a, b| {
        b.discount
            .cmp(&a.discount)
            .then_with(|| a.market_id.cmp(&b.market_id))
    });
    signals
}

/// The outcome believed to have won.
///
/// Highest upstream truth confidence when any quote carries one, otherwise
/// the highest price. Ties go to the first listed outcome.
pub fn winning_side(quotes: &[OutcomeQuote]) -> Option<&OutcomeQuote> {
    if quotes.iter().any(|q| q.truth_confidence.is_some()) {
        first_max_by(quotes.iter().filter(|q| q.truth_confidence.is_some()), |a, b| {
            a.truth_confidence.unwrap_or(0.0) > b.truth_confidence.unwrap_or(0.0)
        })
    } else {
        first_max_by(quotes.iter(), |a, b| a.price > b.price)
    }
}

/// Keeps the earliest element unless a later one is strictly better.
fn first_max_by<'a, I, F>(iter: I, better: F) -> Option<&'a OutcomeQuote>
where
    I: Iterator<Item = &'a OutcomeQuote>,
    F: Fn(&OutcomeQuote, &OutcomeQuote) -> bool,
{
    iter.fold(None, |best, q| match best {
        Some(b) if !better(q, b) => Some(b),
        _ => Some(q),
    })
}

/// Price strictly inside `(0, 1 - min_discount)`.
pub fn is_discounted(price: Decimal, min_discount: Decimal) -> bool {
    price > Decimal::ZERO && price < Decimal::ONE - min_discount
}

/// Ended, unresolved, and inside `[min_hours, max_hours]` since the end.
fn within_window(market: &Market, cfg: &StrategyConfig, now: DateTime<Utc>) -> bool {
    if market.status != ResolutionStatus::EndedUnresolved {
        return false;
    }
    let Some(elapsed) = market.elapsed_since_end(now) else {
        return false;
    };
    elapsed <= Duration::hours(i64::from(cfg.max_hours_since_end))
        && elapsed >= Duration::hours(i64::from(cfg.min_hours_since_end))
}

/// Category and liquidity filters.
fn passes_prefilters(market: &Market, cfg: &StrategyConfig) -> bool {
    if market.liquidity < cfg.min_liquidity {
        return false;
    }
    let category = market.category.as_deref().unwrap_or_default();
    let listed = |list: &[String]| list.iter().any(|c| c.eq_ignore_ascii_case(category));
    if !cfg.focus_categories.is_empty() && !listed(&cfg.focus_categories) {
        return false;
    }
    !listed(&cfg.ignore_categories)
}
