//! Record Seeding - Config to Store
//!
//! Writes the accounts and agents named in `config.toml` into the record
//! store at startup. Existing records keep their runtime state: synced
//! balances stay untouched and an agent keeps its status, so a previous
//! `Running` agent is picked up by `AgentOrchestrator::resume`.

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::info;

use super::AppConfig;
use crate::domain::{Account, Agent};
use crate::ports::repository::Repository;

/// Ids of agents configured with `autostart = true`.
pub async fn seed_records(repo: &dyn Repository, config: &AppConfig) -> Result<Vec<String>> {
  let mut agents_by_account: BTreeMap<&str, Vec<String>> = BTreeMap::new();
  for agent in &config.agents {
    agents_by_account
      .entry(agent.account_id.as_str())
      .or_default()
      .push(agent.id.clone());
  }

  for entry in &config.accounts {
    let agent_ids = agents_by_account.remove(entry.id.as_str()).unwrap_or_default();
    let account = match repo.get_account(&entry.id).await? {
      Some(mut existing) => {
        existing.address = entry.address.clone();
        existing.agent_ids = agent_ids;
        existing
      }
      None => Account {
        id: entry.id.clone(),
        address: entry.address.clone(),
        balances: entry.balances.clone(),
        agent_ids,
        last_synced_at: None,
      },
    };
    repo.upsert_account(&account).await?;
  }

  let mut autostart = Vec::new();
  for entry in &config.agents {
    let agent = match repo.get_agent(&entry.id).await? {
      Some(mut existing) => {
        existing.name = entry.name.clone();
        existing.account_id = entry.account_id.clone();
        existing.strategy = entry.strategy.clone();
        existing
      }
      None => Agent::new(
        entry.id.clone(),
        entry.name.clone(),
        entry.account_id.clone(),
        entry.strategy.clone(),
      ),
    };
    repo.upsert_agent(&agent).await?;
    if entry.autostart {
      autostart.push(agent.id);
    }
  }

  info!(
    accounts = config.accounts.len(),
    agents = config.agents.len(),
    autostart = autostart.len(),
    "Records seeded from configuration"
  );
  Ok(autostart)
}
