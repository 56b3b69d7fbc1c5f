//! Agent Orchestrator - Control Surface
//!
//! Starts, stops and reports on agents. Each running agent owns exactly
//! one spawned `AgentRunner` task and a `watch` channel used to ask it to
//! stop. Agent status is written here and, when the loop dies on its
//! own, by the task's exit handler.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::agent_loop::{AgentExit, AgentRunner};
use super::order_executor::OrderExecutor;
use super::risk_manager::{ExposureSnapshot, RiskManager};
use super::{EventSender, PipelineSettings, Services, emit};
use crate::domain::{
  Agent, AgentId, AgentStatus, BotError, BotEvent, Position, Signal, SignalStatus,
};
use crate::ports::repository::Repository;

/// Everything an operator needs to know about one agent.
#[derive(Debug, Clone)]
pub struct AgentStatusReport {
  pub agent: Agent,
  /// Whether a loop task is alive for the agent.
  pub task_alive: bool,
  /// Open positions opened by this agent.
  pub open_positions: Vec<Position>,
  /// Subset of `open_positions` past the stale threshold.
  pub stale_positions: Vec<Position>,
  /// Most recent rejected or failed signals, newest first.
  pub recent_failures: Vec<Signal>,
  /// Pending exposure of the agent's account.
  pub exposure: ExposureSnapshot,
}

struct RunningAgent {
  stop: watch::Sender<bool>,
  handle: JoinHandle<()>,
}

/// Owns the agent loop tasks.
pub struct AgentOrchestrator {
  services: Services,
  risk: Arc<RiskManager>,
  executor: Arc<OrderExecutor>,
  settings: PipelineSettings,
  running: Mutex<HashMap<AgentId, RunningAgent>>,
}

impl AgentOrchestrator {
  pub fn new(
    services: Services,
    risk: Arc<RiskManager>,
    executor: Arc<OrderExecutor>,
    settings: PipelineSettings,
  ) -> Self {
    Self {
      services,
      risk,
      executor,
      settings,
      running: Mutex::new(HashMap::new()),
    }
  }

  async fn load(&self, agent_id: &str) -> Result<Agent> {
    self
      .services
      .repo
      .get_agent(agent_id)
      .await?
      .ok_or_else(|| {
        BotError::NotFound {
          kind: "agent",
          id: agent_id.to_string(),
        }
        .into()
      })
  }

  /// Move an agent to `Running` and spawn its loop.
  ///
  /// # Errors
  /// Fails with `InvalidTransition` when the loop is already running,
  /// `FatalConfig` when the strategy is invalid (the agent is then left in
  /// `Error`), and `NotFound` for an unknown agent or account.
  pub async fn start(&self, agent_id: &str) -> Result<Agent> {
    let mut running = self.running.lock().await;
    if let Some(task) = running.get(agent_id) {
      if !task.handle.is_finished() {
        return Err(
          BotError::InvalidTransition {
            kind: "agent",
            from: AgentStatus::Running.to_string(),
            to: AgentStatus::Running.to_string(),
          }
          .into(),
        );
      }
    }
    running.remove(agent_id);

    let repo = &self.services.repo;
    let mut agent = self.load(agent_id).await?;
    let now = Utc::now();

    if let Err(e) = agent.strategy.validate() {
      let message = e.to_string();
      agent.transition(AgentStatus::Error, now)?;
      agent.last_error = Some(message.clone());
      repo.upsert_agent(&agent).await?;
      error!(agent_id, error = %message, "Refusing to start agent");
      emit(
        &self.services.events,
        BotEvent::AgentError {
          agent_id: agent.id.clone(),
          error: message,
        },
      );
      return Err(e.into());
    }
    if repo.get_account(&agent.account_id).await?.is_none() {
      return Err(
        BotError::NotFound {
          kind: "account",
          id: agent.account_id.clone(),
        }
        .into(),
      );
    }

    if agent.status == AgentStatus::Running {
      // Persisted as running by a previous process.
      info!(agent_id, "Resuming agent left running");
      agent.transition(AgentStatus::Stopped, now)?;
    }
    agent.transition(AgentStatus::Running, now)?;
    repo.upsert_agent(&agent).await?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = AgentRunner::new(
      agent.id.clone(),
      self.services.clone(),
      self.risk.clone(),
      self.executor.clone(),
      self.settings.clone(),
      stop_rx,
    );
    let repo = repo.clone();
    let events = self.services.events.clone();
    let id = agent.id.clone();
    let handle = tokio::spawn(async move {
      if let AgentExit::Failed(reason) = runner.run().await {
        if let Err(e) = record_failure(repo.as_ref(), &events, &id, &reason).await {
          error!(agent_id = %id, error = %e, "Failed to record agent error");
        }
      }
    });
    running.insert(
      agent.id.clone(),
      RunningAgent {
        stop: stop_tx,
        handle,
      },
    );

    info!(agent_id, account_id = %agent.account_id, "Agent started");
    emit(
      &self.services.events,
      BotEvent::AgentStarted {
        agent_id: agent.id.clone(),
      },
    );
    Ok(agent)
  }

  /// Ask the loop to stop, wait for it, and persist `Stopped`.
  ///
  /// An order in flight is allowed to finish.
  pub async fn stop(&self, agent_id: &str) -> Result<Agent> {
    let agent = self.load(agent_id).await?;
    // Guard ends with this statement; the join below runs unlocked.
    let task = self.running.lock().await.remove(agent_id);

    match task {
      Some(task) => {
        let _ = task.stop.send(true);
        if let Err(e) = task.handle.await {
          warn!(agent_id, error = %e, "Agent task ended abnormally");
        }
      }
      None if agent.status != AgentStatus::Running => {
        return Err(
          BotError::InvalidTransition {
            kind: "agent",
            from: agent.status.to_string(),
            to: AgentStatus::Stopped.to_string(),
          }
          .into(),
        );
      }
      None => {}
    }

    // The loop may have failed on its own while we waited.
    let mut agent = self.load(agent_id).await?;
    if agent.status == AgentStatus::Running {
      agent.transition(AgentStatus::Stopped, Utc::now())?;
      self.services.repo.upsert_agent(&agent).await?;
      info!(agent_id, "Agent stopped");
      emit(
        &self.services.events,
        BotEvent::AgentStopped {
          agent_id: agent.id.clone(),
        },
      );
    }
    Ok(agent)
  }

  /// Stop every running agent.
  pub async fn stop_all(&self) {
    let ids: Vec<AgentId> = self.running.lock().await.keys().cloned().collect();
    for id in ids {
      if let Err(e) = self.stop(&id).await {
        warn!(agent_id = %id, error = %e, "Failed to stop agent");
      }
    }
  }

  /// Restart agents a previous process left in `Running`.
  pub async fn resume(&self) -> Result<Vec<AgentId>> {
    let mut resumed = Vec::new();
    for agent in self.services.repo.agents_by_status(AgentStatus::Running).await? {
      match self.start(&agent.id).await {
        Ok(_) => resumed.push(agent.id),
        Err(e) => warn!(agent_id = %agent.id, error = %e, "Failed to resume agent"),
      }
    }
    Ok(resumed)
  }

  /// Status, positions and recent failures of one agent.
  pub async fn status(&self, agent_id: &str) -> Result<AgentStatusReport> {
    let repo = &self.services.repo;
    let agent = self.load(agent_id).await?;
    let task_alive = self
      .running
      .lock()
      .await
      .get(agent_id)
      .is_some_and(|t| !t.handle.is_finished());

    let mut open_positions = Vec::new();
    for position in repo.positions_for_account(&agent.account_id).await? {
      if !position.is_open() {
        continue;
      }
      let owned = repo
        .get_signal(position.signal_id)
        .await?
        .is_some_and(|s| s.agent_id == agent.id);
      if owned {
        open_positions.push(position);
      }
    }
    let now = Utc::now();
    let stale_positions = open_positions
      .iter()
      .filter(|p| p.is_stale(now, self.settings.stale_after))
      .cloned()
      .collect();

    let mut recent_failures: Vec<Signal> = repo
      .signals_by_status(SignalStatus::Rejected)
      .await?
      .into_iter()
      .chain(repo.signals_by_status(SignalStatus::Failed).await?)
      .filter(|s| s.agent_id == agent.id)
      .collect();
    recent_failures.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    recent_failures.truncate(self.settings.status_history);

    let exposure = self.risk.snapshot(&agent.account_id).await;
    Ok(AgentStatusReport {
      agent,
      task_alive,
      open_positions,
      stale_positions,
      recent_failures,
      exposure,
    })
  }
}

async fn record_failure(
  repo: &dyn Repository,
  events: &EventSender,
  agent_id: &str,
  reason: &str,
) -> Result<()> {
  let Some(mut agent) = repo.get_agent(agent_id).await? else {
    return Ok(());
  };
  agent.transition(AgentStatus::Error, Utc::now())?;
  agent.last_error = Some(reason.to_string());
  repo.upsert_agent(&agent).await?;
  error!(agent_id, reason, "Agent entered error state");
  emit(
    events,
    BotEvent::AgentError {
      agent_id: agent.id.clone(),
      error: reason.to_string(),
    },
  );
  Ok(())
}
