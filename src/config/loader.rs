//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    accounts = config.accounts.len(),
    agents = config.agents.len(),
    dry_run = config.bot.dry_run,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-empty endpoints and positive timeouts
/// - Single-attempt feed and verifier calls
/// - Unique account and agent ids
/// - Agents bound to a configured account
/// - Valid strategy parameters per agent
fn validate_config(config: &AppConfig) -> Result<()> {
  // API validation
  anyhow::ensure!(!config.api.clob_url.is_empty(), "CLOB API URL must not be empty");
  anyhow::ensure!(!config.api.gamma_url.is_empty(), "Gamma API URL must not be empty");
  anyhow::ensure!(config.api.timeout_seconds > 0, "api.timeout_seconds must be positive");
  anyhow::ensure!(config.api.max_concurrent > 0, "api.max_concurrent must be positive");

  // Verifier validation
  anyhow::ensure!(!config.verifier.model.is_empty(), "verifier.model must not be empty");
  anyhow::ensure!(
    config.verifier.timeout_seconds > 0,
    "verifier.timeout_seconds must be positive"
  );
  anyhow::ensure!(
    config.verifier.requests_per_minute > 0,
    "verifier.requests_per_minute must be positive"
  );
  anyhow::ensure!(config.verifier.fan_out > 0, "verifier.fan_out must be positive");

  // A failed scan or verification waits for the next cycle
  anyhow::ensure!(
    config.retry.feed.max_attempts == 1,
    "retry.feed.max_attempts must be 1"
  );
  anyhow::ensure!(
    config.retry.verifier.max_attempts == 1,
    "retry.verifier.max_attempts must be 1"
  );
  anyhow::ensure!(
    config.retry.reconcile.max_attempts > 0,
    "retry.reconcile.max_attempts must be positive"
  );

  // Monitor validation
  anyhow::ensure!(
    config.monitor.poll_interval_seconds > 0,
    "monitor.poll_interval_seconds must be positive"
  );

  anyhow::ensure!(
    config.persistence.signal_retention >= config.monitor.status_history,
    "persistence.signal_retention must be at least monitor.status_history"
  );

  // Accounts and agents
  let mut accounts = HashSet::new();
  for account in &config.accounts {
    anyhow::ensure!(!account.id.is_empty(), "Account with empty id");
    anyhow::ensure!(
      accounts.insert(account.id.as_str()),
      "Duplicate account id {}",
      account.id
    );
  }

  let mut agents = HashSet::new();
  for agent in &config.agents {
    anyhow::ensure!(!agent.id.is_empty(), "Agent with empty id");
    anyhow::ensure!(agents.insert(agent.id.as_str()), "Duplicate agent id {}", agent.id);
    anyhow::ensure!(
      accounts.contains(agent.account_id.as_str()),
      "Agent {} references unknown account {}",
      agent.id,
      agent.account_id
    );
    agent
      .strategy
      .validate()
      .with_context(|| format!("Agent {} has an invalid strategy", agent.id))?;
  }

  Ok(())
}
