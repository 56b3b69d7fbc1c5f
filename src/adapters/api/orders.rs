//! CLOB Execution Venue — Adapter for Order Placement
//!
//! Implements the `ExecutionVenue` port using the shared `ClobClient`
//! for authenticated requests. Orders are fill-or-kill buys carrying the
//! signal id as client order id, so any later lookup or cancel goes by
//! that key.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use super::client::ClobClient;
use super::types::{CancelOrderResponse, CreateOrderRequest, CreateOrderResponse, OrderLookup};
use crate::adapters::retry::RetryPolicy;
use crate::ports::execution::{ExecutionVenue, OrderReport, OrderRequest, OrderState};

/// Live CLOB venue.
pub struct ClobVenue {
    client: Arc<ClobClient>,
    /// Policy for lookups and cancels. Submission is always one attempt.
    query_policy: RetryPolicy,
}

impl ClobVenue {
    pub fn new(client: Arc<ClobClient>, query_policy: RetryPolicy) -> Self {
        Self {
            client,
            query_policy,
        }
    }
}

/// Map a venue status string onto the port's three states.
pub fn map_status(status: &str) -> OrderState {
    match status.to_ascii_lowercase().as_str() {
        "matched" | "filled" | "mined" | "confirmed" => OrderState::Filled,
        "live" | "delayed" | "pending" | "open" => OrderState::Pending,
        _ => OrderState::Rejected,
    }
}

fn report(
    key: &str,
    state: OrderState,
    price: Option<Decimal>,
    size: Option<Decimal>,
    reason: Option<String>,
) -> OrderReport {
    OrderReport {
        idempotency_key: key.to_string(),
        state,
        fill_price: price.filter(|_| state == OrderState::Filled),
        filled_size: size.filter(|_| state == OrderState::Filled),
        reason,
    }
}

#[async_trait]
impl ExecutionVenue for ClobVenue {
    #[instrument(skip(self, order), fields(key = %order.idempotency_key, market = %order.market_id))]
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderReport> {
        let payload = CreateOrderRequest {
            token_id: order.token_id.clone(),
            price: order.limit_price.round_dp(2).to_string(),
            size: order.size.round_dp(2).to_string(),
            side: "BUY",
            order_type: "FOK",
            client_order_id: order.idempotency_key.clone(),
        };
        let body = serde_json::to_string(&payload)?;

        let raw = self
            .client
            .post("/order", &body, &RetryPolicy::single_attempt())
            .await
            .context("Failed to place order via CLOB")?;
        let resp: CreateOrderResponse =
            serde_json::from_value(raw).context("Unexpected CLOB order response")?;

        let state = if resp.success {
            resp.status.as_deref().map_or(OrderState::Pending, map_status)
        } else {
            OrderState::Rejected
        };

        match state {
            OrderState::Filled => info!(order_id = ?resp.order_id, price = ?resp.price, "Order filled"),
            OrderState::Pending => info!(order_id = ?resp.order_id, "Order accepted, not yet matched"),
            OrderState::Rejected => warn!(reason = ?resp.error_msg, "Order rejected by CLOB"),
        }

        Ok(report(
            &order.idempotency_key,
            state,
            resp.price.or(Some(order.limit_price)),
            resp.size_matched.or(Some(order.size)),
            resp.error_msg,
        ))
    }

    async fn query_order(&self, idempotency_key: &str) -> Result<Option<OrderReport>> {
        let path = format!("/order/client/{idempotency_key}");
        let Some(raw) = self.client.get(&path, &self.query_policy).await? else {
            return Ok(None);
        };
        let lookup: OrderLookup =
            serde_json::from_value(raw).context("Unexpected CLOB order lookup")?;
        let state = map_status(&lookup.status);
        Ok(Some(report(
            idempotency_key,
            state,
            lookup.price,
            lookup.size_matched,
            lookup.error_msg,
        )))
    }

    async fn cancel_order(&self, idempotency_key: &str) -> Result<bool> {
        let path = format!("/order/client/{idempotency_key}");
        let Some(raw) = self.client.delete(&path, &self.query_policy).await? else {
            return Ok(false);
        };
        let resp: CancelOrderResponse =
            serde_json::from_value(raw).context("Unexpected CLOB cancel response")?;
        Ok(resp.canceled.iter().any(|k| k == idempotency_key))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("MATCHED"), OrderState::Filled);
        assert_eq!(map_status("live"), OrderState::Pending);
        assert_eq!(map_status("delayed"), OrderState::Pending);
        assert_eq!(map_status("unmatched"), OrderState::Rejected);
        assert_eq!(map_status("CANCELED"), OrderState::Rejected);
    }

    #[test]
    fn test_report_drops_fill_fields_unless_filled() {
        let r = report("k", OrderState::Rejected, Some(dec!(0.9)), Some(dec!(10)), None);
        assert!(r.fill_price.is_none());
        let r = report("k", OrderState::Filled, Some(dec!(0.9)), Some(dec!(10)), None);
        assert_eq!(r.fill_price, Some(dec!(0.9)));
    }

    #[test]
    fn test_lookup_parses_string_decimals() {
        let raw = serde_json::json!({
            "clientOrderId": "k",
            "status": "matched",
            "price": "0.86",
            "sizeMatched": "100"
        });
        let lookup: OrderLookup = serde_json::from_value(raw).unwrap();
        assert_eq!(lookup.price, Some(dec!(0.86)));
        assert_eq!(map_status(&lookup.status), OrderState::Filled);
    }
}
