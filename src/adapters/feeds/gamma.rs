//! Gamma REST Feed - Market Snapshots and Resolutions
//!
//! Polls the Polymarket Gamma API for markets whose end date falls in the
//! scan window, and answers settlement queries from the same endpoint.
//! Stateless: each call returns fresh snapshots.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use super::types::GammaMarket;
use crate::adapters::retry::{self, RetryPolicy};
use crate::domain::market::Market;
use crate::ports::market_feed::MarketFeed;
use crate::ports::settlement::{Resolution, SettlementSource};

/// Connection settings for the Gamma client.
#[derive(Debug, Clone)]
pub struct GammaConfig {
    pub base_url: String,
    pub timeout: Duration,
    /// Page size for `/markets`.
    pub page_limit: usize,
    /// How far back (by end date) to list markets.
    pub lookback_hours: u32,
    pub retry: RetryPolicy,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gamma-api.polymarket.com".to_string(),
            timeout: Duration::from_secs(10),
            page_limit: 500,
            lookback_hours: 48,
            retry: RetryPolicy::single_attempt(),
        }
    }
}

/// Gamma API client implementing `MarketFeed` and `SettlementSource`.
pub struct GammaClient {
    http: Client,
    config: GammaConfig,
}

impl GammaClient {
    pub fn new(config: GammaConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build Gamma HTTP client")?;
        Ok(Self { http, config })
    }

    async fn get_json<T: DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.config.base_url, path_and_query);
        let url = url.as_str();
        retry::retry_async(&self.config.retry, "gamma", move || async move {
            let response = self
                .http
                .get(url)
                .send()
                .await
                .map_err(|e| retry::transport_error("feed", &e))?;
            let status = response.status();
            if status != StatusCode::OK {
                let body = response.text().await.unwrap_or_default();
                return Err(self.config.retry.status_error("feed", status, &body));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| retry::transport_error("feed", &e))
        })
        .await
    }

    async fn market_by_condition(&self, market_id: &str) -> Result<Option<GammaMarket>> {
        let markets: Vec<GammaMarket> = self
            .get_json(&format!("/markets?condition_ids={market_id}"))
            .await?;
        Ok(markets.into_iter().find(|m| m.condition_id == market_id))
    }
}

#[async_trait]
impl MarketFeed for GammaClient {
    #[instrument(skip(self))]
    async fn fetch_markets(&self) -> Result<Vec<Market>> {
        let now = Utc::now();
        let since = now - chrono::Duration::hours(i64::from(self.config.lookback_hours));
        let query = format!(
            "/markets?closed=false&limit={}&end_date_min={}&end_date_max={}",
            self.config.page_limit,
            since.to_rfc3339(),
            now.to_rfc3339(),
        );
        let raw: Vec<GammaMarket> = self.get_json(&query).await?;
        let total = raw.len();
        let markets: Vec<Market> = raw.into_iter().filter_map(|m| m.into_market(now)).collect();
        debug!(total, usable = markets.len(), "Fetched Gamma markets");
        Ok(markets)
    }

    async fn fetch_market(&self, market_id: &str) -> Result<Option<Market>> {
        let now = Utc::now();
        Ok(self
            .market_by_condition(market_id)
            .await?
            .and_then(|m| m.into_market(now)))
    }
}

#[async_trait]
impl SettlementSource for GammaClient {
    async fn resolution(&self, market_id: &str) -> Result<Resolution> {
        let Some(market) = self.market_by_condition(market_id).await? else {
            return Ok(Resolution::Pending);
        };
        if !market.is_resolved() {
            return Ok(Resolution::Pending);
        }
        Ok(Resolution::Resolved {
            payouts: market.priced_outcomes(),
        })
    }
}
