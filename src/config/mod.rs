//! Configuration Module - TOML-based Bot Configuration
//!
//! Loads and validates configuration from `config.toml` with
//! environment variable overrides via `.env` files.
//! Endpoints, limits and agent strategies are externalized here;
//! secrets (venue credentials, AI API key) only come from the environment.

pub mod loader;
pub mod seed;

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::adapters::persistence::store::DEFAULT_SIGNAL_RETENTION;
use crate::adapters::retry::RetryPolicy;
use crate::domain::StrategyConfig;
use crate::usecases::PipelineSettings;

/// Top-level bot configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the bot begins operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Bot identity and metadata.
  pub bot: BotConfig,
  /// Polymarket API endpoints.
  #[serde(default)]
  pub api: ApiConfig,
  /// AI outcome verifier.
  pub verifier: VerifierConfig,
  /// Retry schedules per class of outbound call.
  #[serde(default)]
  pub retry: RetryConfig,
  /// Position monitor cadence and thresholds.
  #[serde(default)]
  pub monitor: MonitorConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Funded accounts seeded into the store.
  #[serde(default)]
  pub accounts: Vec<AccountConfig>,
  /// Agents seeded into the store.
  #[serde(default)]
  pub agents: Vec<AgentConfig>,
}

/// Bot identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
  /// Human-readable bot name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
  /// Enable dry-run mode (paper venue, no real orders).
  #[serde(default)]
  pub dry_run: bool,
}

/// API endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// CLOB REST API base URL.
  #[serde(default = "default_clob_url")]
  pub clob_url: String,
  /// Gamma market data API base URL.
  #[serde(default = "default_gamma_url")]
  pub gamma_url: String,
  /// Request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Maximum concurrent CLOB requests.
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent: usize,
  /// Markets per Gamma listing page.
  #[serde(default = "default_page_limit")]
  pub page_limit: usize,
  /// How far back (by end date) the feed lists markets.
  #[serde(default = "default_lookback_hours")]
  pub lookback_hours: u32,
  /// Wait before a resting order is re-queried and cancelled.
  #[serde(default = "default_confirm_window_ms")]
  pub confirm_window_ms: u64,
}

/// AI verifier configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifierConfig {
  /// Chat-completions endpoint.
  #[serde(default = "default_verifier_url")]
  pub api_url: String,
  pub model: String,
  /// Environment variable holding the API key.
  #[serde(default = "default_api_key_env")]
  pub api_key_env: String,
  #[serde(default = "default_max_tokens")]
  pub max_tokens: usize,
  /// Per-call timeout in seconds.
  #[serde(default = "default_verifier_timeout")]
  pub timeout_seconds: u64,
  /// Process-wide request budget.
  #[serde(default = "default_requests_per_minute")]
  pub requests_per_minute: u32,
  /// Maximum calls in flight per cycle.
  #[serde(default = "default_fan_out")]
  pub fan_out: usize,
}

/// Retry schedules. Order submission is never retried and has no entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetryConfig {
  /// Market listing and settlement lookups.
  #[serde(default)]
  pub feed: RetryPolicy,
  /// AI verifier calls.
  #[serde(default)]
  pub verifier: RetryPolicy,
  /// Order lookups and cancels during reconciliation.
  #[serde(default)]
  pub reconcile: RetryPolicy,
}

/// Position monitor configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
  /// Seconds between settlement checks.
  #[serde(default = "default_poll_interval")]
  pub poll_interval_seconds: u64,
  /// Hours after which an open position is flagged stale.
  #[serde(default = "default_stale_after_hours")]
  pub stale_after_hours: u32,
  /// Rejected/failed signals listed per agent status report.
  #[serde(default = "default_status_history")]
  pub status_history: usize,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for `state.json` and the audit log.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
  /// Keep records in memory only.
  #[serde(default)]
  pub ephemeral: bool,
  /// Rejected/failed signals kept per agent; older ones live only in the audit log.
  #[serde(default = "default_signal_retention")]
  pub signal_retention: usize,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

/// A funded account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
  pub id: String,
  /// Wallet address.
  pub address: String,
  /// Initial balances, used only when the store has no record yet.
  #[serde(default)]
  pub balances: BTreeMap<String, Decimal>,
}

/// A trading agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
  pub id: String,
  pub name: String,
  pub account_id: String,
  /// Start the agent when the bot starts.
  #[serde(default)]
  pub autostart: bool,
  #[serde(default)]
  pub strategy: StrategyConfig,
}

impl AppConfig {
  /// Timeouts and knobs for the use-case layer.
  pub fn pipeline_settings(&self) -> PipelineSettings {
    let api_timeout = Duration::from_secs(self.api.timeout_seconds);
    PipelineSettings {
      feed_timeout: api_timeout,
      verify_timeout: Duration::from_secs(self.verifier.timeout_seconds),
      venue_timeout: api_timeout,
      settlement_timeout: api_timeout,
      verify_fan_out: self.verifier.fan_out,
      confirm_window: Duration::from_millis(self.api.confirm_window_ms),
      stale_after: chrono::Duration::hours(i64::from(self.monitor.stale_after_hours)),
      status_history: self.monitor.status_history,
    }
  }
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      clob_url: default_clob_url(),
      gamma_url: default_gamma_url(),
      timeout_seconds: default_timeout(),
      max_concurrent: default_max_concurrent(),
      page_limit: default_page_limit(),
      lookback_hours: default_lookback_hours(),
      confirm_window_ms: default_confirm_window_ms(),
    }
  }
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      poll_interval_seconds: default_poll_interval(),
      stale_after_hours: default_stale_after_hours(),
      status_history: default_status_history(),
    }
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
      ephemeral: false,
      signal_retention: default_signal_retention(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_clob_url() -> String {
  "https://clob.polymarket.com".to_string()
}

fn default_gamma_url() -> String {
  "https://gamma-api.polymarket.com".to_string()
}

fn default_timeout() -> u64 {
  10
}

fn default_max_concurrent() -> usize {
  10
}

fn default_page_limit() -> usize {
  500
}

fn default_lookback_hours() -> u32 {
  48
}

fn default_confirm_window_ms() -> u64 {
  2_000
}

fn default_verifier_url() -> String {
  "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_api_key_env() -> String {
  "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> usize {
  300
}

fn default_verifier_timeout() -> u64 {
  30
}

fn default_requests_per_minute() -> u32 {
  30
}

fn default_fan_out() -> usize {
  4
}

fn default_poll_interval() -> u64 {
  60
}

fn default_stale_after_hours() -> u32 {
  72
}

fn default_status_history() -> usize {
  20
}

fn default_data_dir() -> String {
  "data".to_string()
}

fn default_signal_retention() -> usize {
  DEFAULT_SIGNAL_RETENTION
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}
