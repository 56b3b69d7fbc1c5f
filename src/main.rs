//! Oracle Latency Bot — Entry Point
//!
//! Initializes configuration, logging and adapters, seeds the record
//! store and starts the configured agents. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate (path from argv[1] or BOT_CONFIG)
//! 2. Init tracing (JSON structured logging)
//! 3. Open the record store (state.json + audit log)
//! 4. Create Gamma client (market feed + settlement source)
//! 5. Create LLM verifier (API key from env)
//! 6. Create execution venue: paper in dry-run, CLOB otherwise
//!    (POLY_API_KEY, POLY_API_SECRET, POLY_PASSPHRASE)
//! 7. Seed accounts/agents, restore pending reservations, resume agents
//! 8. Spawn position monitor, metrics and health servers
//! 9. Wait for SIGINT → stop agents (in-flight orders finish) → shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use oracle_latency_bot::adapters::api::auth::ClobAuth;
use oracle_latency_bot::adapters::api::client::{ClobClient, ClobClientConfig};
use oracle_latency_bot::adapters::api::orders::ClobVenue;
use oracle_latency_bot::adapters::api::paper::PaperVenue;
use oracle_latency_bot::adapters::feeds::gamma::{GammaClient, GammaConfig};
use oracle_latency_bot::adapters::metrics::health::{HealthServer, HealthState};
use oracle_latency_bot::adapters::metrics::prometheus::MetricsRegistry;
use oracle_latency_bot::adapters::persistence::store::JsonStore;
use oracle_latency_bot::adapters::verifier::llm::{LlmSettings, LlmVerifier};
use oracle_latency_bot::config::{self, AppConfig};
use oracle_latency_bot::domain::{BotError, BotEvent};
use oracle_latency_bot::ports::execution::ExecutionVenue;
use oracle_latency_bot::ports::repository::Repository;
use oracle_latency_bot::ports::settlement::SettlementSource;
use oracle_latency_bot::usecases::order_executor::OrderExecutor;
use oracle_latency_bot::usecases::orchestrator::AgentOrchestrator;
use oracle_latency_bot::usecases::position_monitor::PositionMonitor;
use oracle_latency_bot::usecases::risk_manager::RiskManager;
use oracle_latency_bot::usecases::Services;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOT_CONFIG").ok())
        .unwrap_or_else(|| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.bot.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.bot.name,
        version = env!("CARGO_PKG_VERSION"),
        dry_run = config.bot.dry_run,
        agents = config.agents.len(),
        "Starting Oracle Latency Bot"
    );

    // ── 3. Record store ─────────────────────────────────────
    let repo: Arc<dyn Repository> = if config.persistence.ephemeral {
        warn!("Ephemeral persistence — records are lost on exit");
        Arc::new(JsonStore::ephemeral().with_signal_retention(config.persistence.signal_retention))
    } else {
        Arc::new(
            JsonStore::open(Path::new(&config.persistence.data_dir))
                .await
                .context("Failed to open record store")?
                .with_signal_retention(config.persistence.signal_retention),
        )
    };

    // ── 4–6. Adapters ───────────────────────────────────────
    let gamma = Arc::new(
        GammaClient::new(GammaConfig {
            base_url: config.api.gamma_url.clone(),
            timeout: Duration::from_secs(config.api.timeout_seconds),
            page_limit: config.api.page_limit,
            lookback_hours: config.api.lookback_hours,
            retry: config.retry.feed.clone(),
        })
        .context("Failed to create Gamma client")?,
    );
    let verifier = Arc::new(build_verifier(&config)?);
    let venue = build_venue(&config)?;

    // ── Shutdown and event channels ─────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let (events, _events_rx) = broadcast::channel::<BotEvent>(EVENT_CHANNEL_CAPACITY);

    let settings = config.pipeline_settings();
    let settlement: Arc<dyn SettlementSource> = gamma.clone();
    let services = Services {
        feed: gamma,
        verifier,
        venue: venue.clone(),
        settlement: settlement.clone(),
        repo: repo.clone(),
        events: events.clone(),
    };
    let risk = Arc::new(RiskManager::new(repo.clone()));
    let executor = Arc::new(OrderExecutor::new(
        venue,
        repo.clone(),
        events.clone(),
        settings.venue_timeout,
        settings.confirm_window,
    ));

    // Metrics subscribe before anything can emit.
    let mut handles = Vec::new();
    if config.metrics.enabled {
        let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);
        handles.push(tokio::spawn(
            Arc::clone(&metrics).run(events.subscribe(), shutdown_tx.subscribe()),
        ));
        let bind = config.metrics.bind_address.clone();
        let metrics_shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move {
            if let Err(e) = metrics.serve(bind, metrics_shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        }));
    }

    let health = HealthState::new(repo.clone());
    let health_server = HealthServer::new(health.clone(), config.metrics.health_port);
    let health_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        if let Err(e) = health_server.run(health_shutdown).await {
            error!(error = %e, "Health server failed");
        }
    }));

    // ── 7. Seed, recover, resume ────────────────────────────
    let autostart = config::seed::seed_records(repo.as_ref(), &config)
        .await
        .context("Failed to seed records")?;
    let restored = executor
        .recover(&risk)
        .await
        .context("Failed to restore pending orders")?;
    if restored > 0 {
        warn!(restored, "Orders with unknown outcome will be reconciled before trading");
    }

    let orchestrator = AgentOrchestrator::new(services, risk.clone(), executor, settings.clone());
    let resumed = orchestrator.resume().await?;
    for agent_id in autostart.iter().filter(|id| !resumed.contains(*id)) {
        if let Err(e) = orchestrator.start(agent_id).await {
            if BotError::is_fatal(&e) {
                error!(agent_id = %agent_id, error = %e, "Agent refused to start");
            } else {
                warn!(agent_id = %agent_id, error = %e, "Failed to autostart agent");
            }
        }
    }

    // ── 8. Position monitor ─────────────────────────────────
    let monitor = Arc::new(PositionMonitor::new(
        settlement,
        repo.clone(),
        risk,
        events.clone(),
        Duration::from_secs(config.monitor.poll_interval_seconds),
        settings.settlement_timeout,
        settings.stale_after,
    ));
    handles.push(tokio::spawn(monitor.run(shutdown_tx.subscribe())));

    health.mark_started();
    info!(resumed = resumed.len(), "All tasks spawned — bot is running");

    // ── 9. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    orchestrator.stop_all().await;
    let _ = shutdown_tx.send(());
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

fn build_verifier(config: &AppConfig) -> Result<LlmVerifier> {
    let api_key = std::env::var(&config.verifier.api_key_env)
        .map_err(|_| BotError::FatalConfig(format!("{} is not set", config.verifier.api_key_env)))?;
    LlmVerifier::new(LlmSettings {
        api_url: config.verifier.api_url.clone(),
        api_key,
        model: config.verifier.model.clone(),
        max_tokens: config.verifier.max_tokens,
        timeout: Duration::from_secs(config.verifier.timeout_seconds),
        requests_per_minute: config.verifier.requests_per_minute,
        retry: config.retry.verifier.clone(),
    })
    .context("Failed to create verifier")
}

fn build_venue(config: &AppConfig) -> Result<Arc<dyn ExecutionVenue>> {
    if config.bot.dry_run {
        warn!("Dry-run mode — orders go to the paper venue, NO real orders placed");
        return Ok(Arc::new(PaperVenue::new()));
    }
    let auth = Arc::new(ClobAuth::from_env().context("Failed to load CLOB credentials from env")?);
    let client = Arc::new(
        ClobClient::new(
            auth,
            ClobClientConfig {
                base_url: config.api.clob_url.clone(),
                timeout: Duration::from_secs(config.api.timeout_seconds),
                max_concurrent: config.api.max_concurrent,
            },
        )
        .context("Failed to create CLOB client")?,
    );
    Ok(Arc::new(ClobVenue::new(client, config.retry.reconcile.clone())))
}
