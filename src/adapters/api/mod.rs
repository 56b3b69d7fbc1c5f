//! Polymarket CLOB API Adapter
//!
//! Implements the HTTP client for interacting with the Polymarket
//! Central Limit Order Book (CLOB) REST API, plus the in-process paper
//! venue used for dry runs.
//!
//! Sub-modules:
//! - `auth`: HMAC-SHA256 request signing
//! - `client`: HTTP client with per-call retry policies
//! - `orders`: `ExecutionVenue` over the live CLOB
//! - `paper`: `ExecutionVenue` that fills in memory
//! - `types`: API request/response type definitions

pub mod auth;
pub mod client;
pub mod orders;
pub mod paper;
pub mod types;

pub use orders::ClobVenue;
pub use paper::PaperVenue;
