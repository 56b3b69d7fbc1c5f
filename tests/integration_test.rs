//! Integration Tests - End-to-end Pipeline Testing
//!
//! Tests the interaction between usecases, ports, and mock adapters.
//! Uses mockall for trait mocking and tokio::test for async tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mockall::mock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{broadcast, watch};

use oracle_latency_bot::adapters::api::PaperVenue;
use oracle_latency_bot::adapters::persistence::JsonStore;
use oracle_latency_bot::domain::{
    Account, Agent, AgentStatus, BotError, Market, Outcome, OutcomeQuote, PositionStatus,
    ResolutionStatus, RiskRejection, Signal, SignalReason, SignalStatus, StrategyConfig,
    VerificationResult,
};
use oracle_latency_bot::ports::execution::{OrderReport, OrderRequest, OrderState};
use oracle_latency_bot::ports::repository::Repository;
use oracle_latency_bot::ports::settlement::Resolution;
use oracle_latency_bot::ports::verifier::{OutcomeVerifier, Verdict, VerificationRequest};
use oracle_latency_bot::usecases::agent_loop::AgentRunner;
use oracle_latency_bot::usecases::order_executor::OrderExecutor;
use oracle_latency_bot::usecases::orchestrator::AgentOrchestrator;
use oracle_latency_bot::usecases::position_monitor::PositionMonitor;
use oracle_latency_bot::usecases::risk_manager::RiskManager;
use oracle_latency_bot::usecases::{PipelineSettings, Services};

// ---- Mock Definitions ----

mock! {
    pub Feed {}

    #[async_trait::async_trait]
    impl oracle_latency_bot::ports::market_feed::MarketFeed for Feed {
        async fn fetch_markets(&self) -> anyhow::Result<Vec<Market>>;
        async fn fetch_market(&self, market_id: &str) -> anyhow::Result<Option<Market>>;
    }
}

mock! {
    pub Verifier {}

    #[async_trait::async_trait]
    impl oracle_latency_bot::ports::verifier::OutcomeVerifier for Verifier {
        async fn verify(&self, request: &VerificationRequest) -> anyhow::Result<Verdict>;
    }
}

mock! {
    pub Venue {}

    #[async_trait::async_trait]
    impl oracle_latency_bot::ports::execution::ExecutionVenue for Venue {
        async fn submit_order(&self, order: &OrderRequest) -> anyhow::Result<OrderReport>;
        async fn query_order(&self, idempotency_key: &str) -> anyhow::Result<Option<OrderReport>>;
        async fn cancel_order(&self, idempotency_key: &str) -> anyhow::Result<bool>;
    }
}

mock! {
    pub Settlement {}

    #[async_trait::async_trait]
    impl oracle_latency_bot::ports::settlement::SettlementSource for Settlement {
        async fn resolution(&self, market_id: &str) -> anyhow::Result<Resolution>;
    }
}

/// Answers after a fixed delay, keeping a cycle in flight.
struct SlowVerifier {
    delay: Duration,
}

#[async_trait::async_trait]
impl OutcomeVerifier for SlowVerifier {
    async fn verify(&self, _request: &VerificationRequest) -> anyhow::Result<Verdict> {
        tokio::time::sleep(self.delay).await;
        Ok(Verdict {
            confidence: 0.99,
            rationale: "result published".into(),
        })
    }
}

// ---- Fixtures ----

fn ended_market(id: &str, yes_price: Decimal) -> Market {
    Market {
        id: id.into(),
        question: format!("Did {id} happen?"),
        category: Some("Sports".into()),
        end_time: Some(Utc::now() - chrono::Duration::hours(2)),
        status: ResolutionStatus::EndedUnresolved,
        outcomes: vec![
            OutcomeQuote {
                outcome: Outcome::Yes,
                token_id: format!("{id}-yes"),
                price: yes_price,
                truth_confidence: None,
            },
            OutcomeQuote {
                outcome: Outcome::No,
                token_id: format!("{id}-no"),
                price: Decimal::ONE - yes_price,
                truth_confidence: None,
            },
        ],
        liquidity: dec!(10000),
    }
}

fn feed_of(markets: Vec<Market>) -> MockFeed {
    let mut feed = MockFeed::new();
    feed.expect_fetch_markets()
        .returning(move || Ok(markets.clone()));
    feed
}

fn verifier_with(confidence: f64) -> MockVerifier {
    let mut verifier = MockVerifier::new();
    verifier.expect_verify().returning(move |_| {
        Ok(Verdict {
            confidence,
            rationale: "event concluded".into(),
        })
    });
    verifier
}

fn filled(key: &str, price: Decimal, size: Decimal) -> OrderReport {
    OrderReport {
        idempotency_key: key.into(),
        state: OrderState::Filled,
        fill_price: Some(price),
        filled_size: Some(size),
        reason: None,
    }
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        feed_timeout: Duration::from_secs(1),
        verify_timeout: Duration::from_secs(1),
        venue_timeout: Duration::from_secs(1),
        settlement_timeout: Duration::from_secs(1),
        verify_fan_out: 2,
        confirm_window: Duration::ZERO,
        stale_after: chrono::Duration::hours(72),
        status_history: 10,
    }
}

async fn seed(repo: &Arc<dyn Repository>, balance: Decimal, agents: &[(&str, StrategyConfig)]) {
    let mut balances = BTreeMap::new();
    balances.insert("USDC".to_string(), balance);
    repo.upsert_account(&Account {
        id: "acct".into(),
        address: "0xabc".into(),
        balances,
        agent_ids: agents.iter().map(|(id, _)| id.to_string()).collect(),
        last_synced_at: None,
    })
    .await
    .unwrap();
    for (id, strategy) in agents {
        let agent = Agent::new(id.to_string(), id.to_string(), "acct".into(), strategy.clone());
        repo.upsert_agent(&agent).await.unwrap();
    }
}

struct Pipeline {
    services: Services,
    risk: Arc<RiskManager>,
    executor: Arc<OrderExecutor>,
    _stop: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Pipeline {
    fn new(
        repo: Arc<dyn Repository>,
        feed: MockFeed,
        verifier: impl OutcomeVerifier,
        venue: Arc<dyn oracle_latency_bot::ports::execution::ExecutionVenue>,
        settlement: MockSettlement,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let services = Services {
            feed: Arc::new(feed),
            verifier: Arc::new(verifier),
            venue: venue.clone(),
            settlement: Arc::new(settlement),
            repo: repo.clone(),
            events: events.clone(),
        };
        let s = settings();
        let risk = Arc::new(RiskManager::new(repo.clone()));
        let executor = Arc::new(OrderExecutor::new(
            venue,
            repo,
            events,
            s.venue_timeout,
            s.confirm_window,
        ));
        let (stop, stop_rx) = watch::channel(false);
        Self {
            services,
            risk,
            executor,
            _stop: stop,
            stop_rx,
        }
    }

    fn runner(&self, agent_id: &str) -> AgentRunner {
        AgentRunner::new(
            agent_id.into(),
            self.services.clone(),
            self.risk.clone(),
            self.executor.clone(),
            settings(),
            self.stop_rx.clone(),
        )
    }

    async fn agent(&self, agent_id: &str) -> Agent {
        self.services.repo.get_agent(agent_id).await.unwrap().unwrap()
    }
}

// ---- End-to-end ----

#[tokio::test]
async fn test_discounted_market_is_traded_and_settled() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    seed(&repo, dec!(1000), &[("closer", StrategyConfig::default())]).await;

    let mut settlement = MockSettlement::new();
    settlement.expect_resolution().returning(|_| {
        Ok(Resolution::Resolved {
            payouts: vec![(Outcome::Yes, dec!(1.00)), (Outcome::No, dec!(0))],
        })
    });
    let venue = Arc::new(PaperVenue::new());
    let pipeline = Pipeline::new(
        repo.clone(),
        feed_of(vec![ended_market("m1", dec!(0.85))]),
        verifier_with(0.98),
        venue.clone(),
        settlement,
    );

    let agent = pipeline.agent("closer").await;
    let report = pipeline.runner("closer").cycle(&agent).await.unwrap();
    assert_eq!(report.detected, 1);
    assert_eq!(report.verified, 1);
    assert_eq!(report.executed, 1);

    let open = repo.positions_by_status(PositionStatus::Open).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].entry_price, dec!(0.85));
    assert_eq!(open[0].size, dec!(100));
    let signal = repo.get_signal(open[0].signal_id).await.unwrap().unwrap();
    assert_eq!(signal.status, SignalStatus::Executed);
    assert_eq!(signal.limit_price, Some(dec!(0.867)));

    let monitor = PositionMonitor::new(
        pipeline.services.settlement.clone(),
        repo.clone(),
        pipeline.risk.clone(),
        pipeline.services.events.clone(),
        Duration::from_secs(60),
        Duration::from_secs(1),
        chrono::Duration::hours(72),
    );
    let polled = monitor.poll_once().await.unwrap();
    assert_eq!(polled.closed, 1);

    let closed = repo.positions_by_status(PositionStatus::Closed).await.unwrap();
    assert_eq!(closed[0].realized_pnl, Some(dec!(15.00)));
    assert_eq!(pipeline.risk.snapshot("acct").await.realized_pnl, dec!(15.00));
    assert_eq!(venue.submission_count(), 1);
}

#[tokio::test]
async fn test_low_confidence_opens_nothing() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    seed(&repo, dec!(1000), &[("closer", StrategyConfig::default())]).await;
    let mut venue = MockVenue::new();
    venue.expect_submit_order().never();

    let pipeline = Pipeline::new(
        repo.clone(),
        feed_of(vec![ended_market("m1", dec!(0.85))]),
        verifier_with(0.90),
        Arc::new(venue),
        MockSettlement::new(),
    );
    let agent = pipeline.agent("closer").await;
    let report = pipeline.runner("closer").cycle(&agent).await.unwrap();
    assert_eq!(report.verified, 0);

    assert!(repo.positions_for_account("acct").await.unwrap().is_empty());
    let rejected = repo.signals_by_status(SignalStatus::Rejected).await.unwrap();
    assert_eq!(rejected.len(), 1);
    assert!(matches!(
        rejected[0].reason,
        Some(SignalReason::ConfidenceBelowThreshold { .. })
    ));
    assert_eq!(rejected[0].confidence(), Some(0.90));
}

#[tokio::test]
async fn test_second_trade_in_cycle_hits_cooldown() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    let strategy = StrategyConfig {
        cooldown_secs: 60,
        ..StrategyConfig::default()
    };
    seed(&repo, dec!(1000), &[("closer", strategy)]).await;

    let pipeline = Pipeline::new(
        repo.clone(),
        feed_of(vec![
            ended_market("m1", dec!(0.85)),
            ended_market("m2", dec!(0.90)),
        ]),
        verifier_with(0.99),
        Arc::new(PaperVenue::new()),
        MockSettlement::new(),
    );
    let agent = pipeline.agent("closer").await;
    let report = pipeline.runner("closer").cycle(&agent).await.unwrap();
    assert_eq!(report.executed, 1);
    assert_eq!(report.risk_rejected, 1);

    // Largest discount goes first.
    let open = repo.positions_by_status(PositionStatus::Open).await.unwrap();
    assert_eq!(open[0].market_id, "m1");
    let rejected = repo.signals_by_status(SignalStatus::Rejected).await.unwrap();
    assert!(matches!(
        rejected[0].reason,
        Some(SignalReason::Risk {
            rejection: RiskRejection::Cooldown { .. }
        })
    ));
}

#[tokio::test]
async fn test_concurrent_agents_open_one_position_per_market() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    let strategy = StrategyConfig {
        cooldown_secs: 0,
        ..StrategyConfig::default()
    };
    seed(&repo, dec!(1000), &[("a1", strategy.clone()), ("a2", strategy)]).await;

    let pipeline = Pipeline::new(
        repo.clone(),
        feed_of(vec![ended_market("m1", dec!(0.85))]),
        verifier_with(0.99),
        Arc::new(PaperVenue::new()),
        MockSettlement::new(),
    );
    let (agent1, agent2) = (pipeline.agent("a1").await, pipeline.agent("a2").await);
    let (runner1, runner2) = (pipeline.runner("a1"), pipeline.runner("a2"));
    let (r1, r2) = tokio::join!(runner1.cycle(&agent1), runner2.cycle(&agent2));
    let (r1, r2) = (r1.unwrap(), r2.unwrap());

    let open = repo.positions_by_status(PositionStatus::Open).await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(r1.executed + r2.executed, 1);
    let snapshot = pipeline.risk.snapshot("acct").await;
    assert_eq!(snapshot.pending_count, 0);
}

// ---- Ambiguous submissions ----

#[tokio::test]
async fn test_ambiguous_submit_is_reconciled_not_resubmitted() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    seed(&repo, dec!(1000), &[("closer", StrategyConfig::default())]).await;

    let mut venue = MockVenue::new();
    venue
        .expect_submit_order()
        .times(1)
        .returning(|_| Err(BotError::transient("venue", "connection reset").into()));
    venue
        .expect_query_order()
        .times(1)
        .returning(|key| Ok(Some(filled(key, dec!(0.85), dec!(100)))));

    let mut verifier = MockVerifier::new();
    verifier.expect_verify().times(1).returning(|_| {
        Ok(Verdict {
            confidence: 0.98,
            rationale: "final whistle".into(),
        })
    });

    let pipeline = Pipeline::new(
        repo.clone(),
        feed_of(vec![ended_market("m1", dec!(0.85))]),
        verifier,
        Arc::new(venue),
        MockSettlement::new(),
    );
    let agent = pipeline.agent("closer").await;
    let runner = pipeline.runner("closer");

    let first = runner.cycle(&agent).await.unwrap();
    assert_eq!(first.ambiguous, 1);
    let failed = repo.signals_by_status(SignalStatus::Failed).await.unwrap();
    assert!(failed[0].is_ambiguous());
    let snapshot = pipeline.risk.snapshot("acct").await;
    assert_eq!((snapshot.pending_count, snapshot.ambiguous_count), (1, 1));

    // Next cycle resolves the order first, then skips the held market.
    let second = runner.cycle(&agent).await.unwrap();
    assert_eq!(second.detected, 1);
    assert_eq!(second.skipped_held, 1);

    let open = repo.positions_by_status(PositionStatus::Open).await.unwrap();
    assert_eq!(open.len(), 1);
    let signal = repo.get_signal(open[0].signal_id).await.unwrap().unwrap();
    assert_eq!(signal.status, SignalStatus::Executed);
    assert_eq!(signal.reason, None);
    assert_eq!(pipeline.risk.snapshot("acct").await.pending_count, 0);
}

#[tokio::test]
async fn test_restart_queries_instead_of_resubmitting() {
    let dir = tempfile::tempdir().unwrap();
    let signal_id;
    {
        let repo: Arc<dyn Repository> = Arc::new(JsonStore::open(dir.path()).await.unwrap());
        seed(&repo, dec!(1000), &[("closer", StrategyConfig::default())]).await;
        let now = Utc::now();
        let mut signal = Signal::detected(
            "closer".into(),
            "acct".into(),
            "m1".into(),
            "Did m1 happen?".into(),
            None,
            Outcome::Yes,
            "m1-yes".into(),
            dec!(0.85),
            now,
        );
        signal
            .verify(
                VerificationResult {
                    signal_id: signal.id,
                    confidence: 0.98,
                    rationale: "final".into(),
                    verified_at: now,
                },
                now,
            )
            .unwrap();
        signal.begin_execution(dec!(100), dec!(0.867), now).unwrap();
        repo.create_signal(&signal).await.unwrap();
        signal_id = signal.id;
    }

    // Process restarts with the order still marked in flight.
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::open(dir.path()).await.unwrap());
    let mut venue = MockVenue::new();
    venue.expect_submit_order().never();
    venue
        .expect_query_order()
        .times(1)
        .returning(|key| Ok(Some(filled(key, dec!(0.85), dec!(100)))));

    let pipeline = Pipeline::new(
        repo.clone(),
        MockFeed::new(),
        MockVerifier::new(),
        Arc::new(venue),
        MockSettlement::new(),
    );
    assert_eq!(pipeline.executor.recover(&pipeline.risk).await.unwrap(), 1);
    let snapshot = pipeline.risk.snapshot("acct").await;
    assert_eq!(snapshot.pending_total, dec!(100));

    let mut lock = pipeline.risk.lock_account("acct").await;
    let report = pipeline.executor.reconcile(&mut lock).await.unwrap();
    assert_eq!(report.filled, 1);
    drop(lock);

    let position = repo.position_for_signal(signal_id).await.unwrap().unwrap();
    assert_eq!(position.entry_price, dec!(0.85));
    assert_eq!(pipeline.risk.snapshot("acct").await.pending_count, 0);
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let repo: Arc<dyn Repository> = Arc::new(JsonStore::open(dir.path()).await.unwrap());
        seed(&repo, dec!(1000), &[("closer", StrategyConfig::default())]).await;
        let pipeline = Pipeline::new(
            repo.clone(),
            feed_of(vec![ended_market("m1", dec!(0.85))]),
            verifier_with(0.98),
            Arc::new(PaperVenue::new()),
            MockSettlement::new(),
        );
        let agent = pipeline.agent("closer").await;
        pipeline.runner("closer").cycle(&agent).await.unwrap();
    }

    let repo = JsonStore::open(dir.path()).await.unwrap();
    let open = repo.positions_by_status(PositionStatus::Open).await.unwrap();
    assert_eq!(open.len(), 1);
    let executed = repo.signals_by_status(SignalStatus::Executed).await.unwrap();
    assert_eq!(executed[0].id, open[0].signal_id);
    assert!(repo.get_agent("closer").await.unwrap().is_some());
}

// ---- Orchestrator ----

fn orchestrator(repo: Arc<dyn Repository>, feed: MockFeed) -> AgentOrchestrator {
    orchestrator_with(repo, feed, verifier_with(0.99))
}

fn orchestrator_with(
    repo: Arc<dyn Repository>,
    feed: MockFeed,
    verifier: impl OutcomeVerifier,
) -> AgentOrchestrator {
    let pipeline = Pipeline::new(
        repo,
        feed,
        verifier,
        Arc::new(PaperVenue::new()),
        MockSettlement::new(),
    );
    AgentOrchestrator::new(pipeline.services, pipeline.risk, pipeline.executor, settings())
}

#[tokio::test]
async fn test_orchestrator_start_status_stop() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    seed(&repo, dec!(1000), &[("closer", StrategyConfig::default())]).await;
    let orchestrator = orchestrator(repo.clone(), feed_of(vec![]));

    let agent = orchestrator.start("closer").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Running);
    assert!(orchestrator.start("closer").await.is_err());

    let status = orchestrator.status("closer").await.unwrap();
    assert!(status.task_alive);
    assert!(status.open_positions.is_empty());

    let agent = orchestrator.stop("closer").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Stopped);
    assert!(!orchestrator.status("closer").await.unwrap().task_alive);
    assert!(orchestrator.stop("closer").await.is_err());
}

#[tokio::test]
async fn test_invalid_strategy_puts_agent_in_error() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    let strategy = StrategyConfig {
        min_discount: dec!(1.5),
        ..StrategyConfig::default()
    };
    seed(&repo, dec!(1000), &[("closer", strategy)]).await;
    let orchestrator = orchestrator(repo.clone(), MockFeed::new());

    let err = orchestrator.start("closer").await.unwrap_err();
    assert!(BotError::is_fatal(&err));
    let agent = repo.get_agent("closer").await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Error);
    assert!(agent.last_error.is_some());
}

#[tokio::test]
async fn test_consecutive_failures_put_agent_in_error() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    let strategy = StrategyConfig {
        max_consecutive_failures: 1,
        ..StrategyConfig::default()
    };
    seed(&repo, dec!(1000), &[("closer", strategy)]).await;
    let mut feed = MockFeed::new();
    feed.expect_fetch_markets()
        .returning(|| Err(BotError::transient("feed", "503 from gamma").into()));
    let orchestrator = orchestrator(repo.clone(), feed);

    orchestrator.start("closer").await.unwrap();
    let mut status = orchestrator.status("closer").await.unwrap();
    for _ in 0..50 {
        if status.agent.status == AgentStatus::Error && !status.task_alive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = orchestrator.status("closer").await.unwrap();
    }
    assert_eq!(status.agent.status, AgentStatus::Error);
    assert!(status.agent.last_error.unwrap().contains("consecutive"));
    assert!(!status.task_alive);
}

#[tokio::test]
async fn test_stopping_one_agent_leaves_others_controllable() {
    let repo: Arc<dyn Repository> = Arc::new(JsonStore::ephemeral());
    let strategy = StrategyConfig {
        cooldown_secs: 0,
        ..StrategyConfig::default()
    };
    seed(&repo, dec!(1000), &[("a1", strategy.clone()), ("a2", strategy)]).await;
    let orchestrator = Arc::new(orchestrator_with(
        repo.clone(),
        feed_of(vec![ended_market("m1", dec!(0.85))]),
        SlowVerifier {
            delay: Duration::from_millis(800),
        },
    ));

    orchestrator.start("a1").await.unwrap();
    orchestrator.start("a2").await.unwrap();
    // Let a1's first cycle reach the verifier.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.stop("a1").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopping.is_finished());

    let status = tokio::time::timeout(Duration::from_millis(300), orchestrator.status("a2"))
        .await
        .expect("status blocked behind another agent's stop")
        .unwrap();
    assert_eq!(status.agent.status, AgentStatus::Running);
    assert!(status.task_alive);

    let stopped = stopping.await.unwrap().unwrap();
    assert_eq!(stopped.status, AgentStatus::Stopped);
    orchestrator.stop("a2").await.unwrap();
}
