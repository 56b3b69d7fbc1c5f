//! Prometheus Metrics Registry - Pipeline Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Metrics are driven entirely by the `BotEvent` broadcast channel, so
//! the pipeline never calls into this module directly.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::BotEvent;

/// Centralized Prometheus metrics for the bot.
///
/// All metrics follow the naming convention `oracle_bot_*`.
pub struct MetricsRegistry {
    registry: Registry,
    /// Events seen, by kind.
    pub events: IntCounterVec,
    /// 1 while the agent is running, 0 otherwise.
    pub agent_running: IntGaugeVec,
    /// Verifier confidence of every verified signal.
    pub verification_confidence: Histogram,
    /// Currently open positions per account.
    pub open_positions: IntGaugeVec,
    /// Cumulative realized P&L per account (USDC).
    pub realized_pnl: GaugeVec,
    /// Stale positions flagged per account.
    pub stale_positions: IntCounterVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new("oracle_bot_events_total", "Pipeline events by kind"),
            &["kind"],
        )?;

        let agent_running = IntGaugeVec::new(
            Opts::new("oracle_bot_agent_running", "Agent running (1) or not (0)"),
            &["agent"],
        )?;

        let verification_confidence = Histogram::with_opts(
            HistogramOpts::new(
                "oracle_bot_verification_confidence",
                "Verifier confidence of verified signals",
            )
            .buckets(vec![0.5, 0.8, 0.9, 0.95, 0.97, 0.99, 1.0]),
        )?;

        let open_positions = IntGaugeVec::new(
            Opts::new("oracle_bot_open_positions", "Open positions per account"),
            &["account"],
        )?;

        let realized_pnl = GaugeVec::new(
            Opts::new(
                "oracle_bot_realized_pnl_usdc",
                "Cumulative realized PnL in USDC since start",
            ),
            &["account"],
        )?;

        let stale_positions = IntCounterVec::new(
            Opts::new(
                "oracle_bot_stale_positions_total",
                "Positions flagged as open past the stale threshold",
            ),
            &["account"],
        )?;

        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(agent_running.clone()))?;
        registry.register(Box::new(verification_confidence.clone()))?;
        registry.register(Box::new(open_positions.clone()))?;
        registry.register(Box::new(realized_pnl.clone()))?;
        registry.register(Box::new(stale_positions.clone()))?;

        Ok(Self {
            registry,
            events,
            agent_running,
            verification_confidence,
            open_positions,
            realized_pnl,
            stale_positions,
        })
    }

    /// Fold one event into the metrics.
    pub fn observe(&self, event: &BotEvent) {
        self.events.with_label_values(&[event.kind()]).inc();
        match event {
            BotEvent::AgentStarted { agent_id } => {
                self.agent_running.with_label_values(&[agent_id.as_str()]).set(1);
            }
            BotEvent::AgentStopped { agent_id } | BotEvent::AgentError { agent_id, .. } => {
                self.agent_running.with_label_values(&[agent_id.as_str()]).set(0);
            }
            BotEvent::SignalVerified { confidence, .. } => {
                self.verification_confidence.observe(*confidence);
            }
            BotEvent::PositionOpened { account_id, .. } => {
                self.open_positions.with_label_values(&[account_id.as_str()]).inc();
            }
            BotEvent::PositionClosed {
                account_id,
                realized_pnl,
                ..
            } => {
                self.open_positions.with_label_values(&[account_id.as_str()]).dec();
                self.realized_pnl
                    .with_label_values(&[account_id.as_str()])
                    .add(realized_pnl.to_f64().unwrap_or(0.0));
            }
            BotEvent::PositionError { account_id, .. } => {
                self.open_positions.with_label_values(&[account_id.as_str()]).dec();
            }
            BotEvent::PositionStale { account_id, .. } => {
                self.stale_positions.with_label_values(&[account_id.as_str()]).inc();
            }
            _ => {}
        }
    }

    /// Consume the event channel until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<BotEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                event = events.recv() => match event {
                    Ok(event) => self.observe(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Metrics consumer lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn test_position_events_move_gauges() {
        let m = MetricsRegistry::new().unwrap();
        let id = Uuid::new_v4();
        m.observe(&BotEvent::PositionOpened {
            account_id: "acct".into(),
            position_id: id,
            market_id: "m".into(),
            size: dec!(100),
            entry_price: dec!(0.85),
        });
        assert_eq!(m.open_positions.with_label_values(&["acct"]).get(), 1);
        m.observe(&BotEvent::PositionClosed {
            account_id: "acct".into(),
            position_id: id,
            market_id: "m".into(),
            realized_pnl: dec!(15),
            won: true,
        });
        assert_eq!(m.open_positions.with_label_values(&["acct"]).get(), 0);
        assert!((m.realized_pnl.with_label_values(&["acct"]).get() - 15.0).abs() < 1e-9);
        assert!(m.render().unwrap().contains("oracle_bot_events_total"));
    }
}
