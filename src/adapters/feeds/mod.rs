//! Market Data Feed Adapters - Market Snapshots and Settlement
//!
//! Provides the REST-polled Gamma feed:
//! - `gamma`: `MarketFeed` + `SettlementSource` over the Gamma API
//! - `types`: Gamma response decoding

pub mod gamma;
pub mod types;

pub use gamma::{GammaClient, GammaConfig};
