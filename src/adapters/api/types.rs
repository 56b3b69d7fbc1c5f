//! CLOB API Request/Response Types
//!
//! Serialization types for the subset of the Polymarket CLOB REST API the
//! bot uses: fill-or-kill buy orders keyed by a client order id.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order request payload for the CLOB API.
#[derive(Debug, Clone, Serialize)]
pub struct CreateOrderRequest {
  #[serde(rename = "tokenID")]
  pub token_id: String,
  /// Limit price, 2 decimals.
  pub price: String,
  /// Size in USDC, 2 decimals.
  pub size: String,
  /// Always "BUY".
  pub side: &'static str,
  /// Always "FOK".
  #[serde(rename = "type")]
  pub order_type: &'static str,
  /// Client idempotency key.
  #[serde(rename = "clientOrderId")]
  pub client_order_id: String,
}

/// Response from order creation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderResponse {
  #[serde(default)]
  pub success: bool,
  #[serde(rename = "orderID", default)]
  pub order_id: Option<String>,
  #[serde(rename = "errorMsg", default)]
  pub error_msg: Option<String>,
  /// "matched", "live", "delayed", "unmatched".
  #[serde(default)]
  pub status: Option<String>,
  /// Average fill price.
  #[serde(default, with = "rust_decimal::serde::str_option")]
  pub price: Option<Decimal>,
  #[serde(rename = "sizeMatched", default, with = "rust_decimal::serde::str_option")]
  pub size_matched: Option<Decimal>,
}

/// Order as returned by `GET /order/client/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderLookup {
  #[serde(rename = "clientOrderId", default)]
  pub client_order_id: Option<String>,
  pub status: String,
  #[serde(default, with = "rust_decimal::serde::str_option")]
  pub price: Option<Decimal>,
  #[serde(rename = "sizeMatched", default, with = "rust_decimal::serde::str_option")]
  pub size_matched: Option<Decimal>,
  #[serde(rename = "errorMsg", default)]
  pub error_msg: Option<String>,
}

/// Cancel response.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrderResponse {
  /// Client ids the venue cancelled.
  #[serde(default)]
  pub canceled: Vec<String>,
}
