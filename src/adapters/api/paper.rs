//! Paper Venue — In-process Execution for Dry Runs
//!
//! Implements `ExecutionVenue` without touching the network. Orders fill
//! immediately at the observed price when it is within the limit and are
//! recorded by idempotency key, so a resubmitted key returns the original
//! report instead of filling twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::ports::execution::{ExecutionVenue, OrderReport, OrderRequest, OrderState};

/// Simulated venue used when `bot.dry_run` is set.
#[derive(Default)]
pub struct PaperVenue {
    orders: Mutex<HashMap<String, OrderReport>>,
    submissions: AtomicUsize,
}

impl PaperVenue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `submit_order` calls received, duplicates included.
    pub fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExecutionVenue for PaperVenue {
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReport> {
        self.submissions.fetch_add(1, Ordering::Relaxed);
        let mut orders = self.orders.lock().await;
        if let Some(existing) = orders.get(&order.idempotency_key) {
            return Ok(existing.clone());
        }

        let report = if order.expected_price <= order.limit_price {
            OrderReport {
                idempotency_key: order.idempotency_key.clone(),
                state: OrderState::Filled,
                fill_price: Some(order.expected_price),
                filled_size: Some(order.size),
                reason: None,
            }
        } else {
            OrderReport {
                idempotency_key: order.idempotency_key.clone(),
                state: OrderState::Rejected,
                fill_price: None,
                filled_size: None,
                reason: Some("price above limit".into()),
            }
        };
        info!(
            key = %order.idempotency_key,
            market = %order.market_id,
            state = ?report.state,
            price = %order.expected_price,
            size = %order.size,
            "Paper order"
        );
        orders.insert(order.idempotency_key.clone(), report.clone());
        Ok(report)
    }

    async fn query_order(&self, idempotency_key: &str) -> Result<Option<OrderReport>> {
        Ok(self.orders.lock().await.get(idempotency_key).cloned())
    }

    async fn cancel_order(&self, _idempotency_key: &str) -> Result<bool> {
        // Paper orders never rest on a book.
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::domain::market::Outcome;

    fn order(key: &str, expected: rust_decimal::Decimal) -> OrderRequest {
        OrderRequest {
            idempotency_key: key.into(),
            market_id: "m".into(),
            token_id: "t".into(),
            outcome: Outcome::Yes,
            size: dec!(100),
            limit_price: dec!(0.87),
            expected_price: expected,
        }
    }

    #[tokio::test]
    async fn test_fills_at_observed_price() {
        let venue = PaperVenue::new();
        let r = venue.submit_order(&order("k1", dec!(0.85))).await.unwrap();
        assert_eq!(r.state, OrderState::Filled);
        assert_eq!(r.fill_price, Some(dec!(0.85)));
        assert!(venue.query_order("k1").await.unwrap().is_some());
        assert!(venue.query_order("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resubmitted_key_returns_original() {
        let venue = PaperVenue::new();
        let first = venue.submit_order(&order("k1", dec!(0.85))).await.unwrap();
        let second = venue.submit_order(&order("k1", dec!(0.80))).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(venue.submission_count(), 2);
    }

    #[tokio::test]
    async fn test_rejects_above_limit() {
        let venue = PaperVenue::new();
        let r = venue.submit_order(&order("k2", dec!(0.9))).await.unwrap();
        assert_eq!(r.state, OrderState::Rejected);
    }
}
