//! End-to-end cycles: roster -> executor -> fusion -> storage -> evolution,
//! driven by the scheduler and by the manual trigger endpoint.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use common::{EvolutionKind, NewsHeadline, SignalDirection};
use monitoring::{router, CycleTrigger, EvolutionTracker, HealthConfig, HealthState, HealthStatus};
use research_agents::{
    build_roster, AgentExecutor, AgentSignal, AgentsConfig, ExecutorConfig, MarketContext, Orchestrator, Roster,
    Scheduler,
};
use signal_generation::{FusionConfig, InMemoryStorage, SignalFusionEngine, SignalStorage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn market() -> MarketContext {
    MarketContext::new("election-2028", "Will the incumbent win the election?", 0.5)
        .with_tags(["politics"])
        .with_headlines(vec![
            NewsHeadline::new("Campaign celebrates fundraising success", 60.0),
            NewsHeadline::new("Election poll shows growth in support", 55.0),
            NewsHeadline::new("Senate vote seen as victory for the campaign", 50.0),
        ])
}

fn orchestrator(roster: Roster, storage: Arc<InMemoryStorage>, health: Arc<HealthState>) -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new(
        roster,
        AgentExecutor::new(ExecutorConfig { timeout_ms: 200 }),
        SignalFusionEngine::new(FusionConfig::default()),
        EvolutionTracker::default(),
        storage,
    )
    .with_health(health);
    orchestrator.add_markets(vec![market()]);
    Arc::new(orchestrator)
}

#[tokio::test]
async fn test_reference_roster_produces_fused_signal() {
    let storage = Arc::new(InMemoryStorage::new());
    let health = Arc::new(HealthState::new(HealthConfig::default()));
    let orchestrator = orchestrator(build_roster(&AgentsConfig::default()), storage.clone(), health);

    let report = orchestrator.run_cycle("election-2028").await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.summary.succeeded, 2);

    let fused = report.fused.unwrap();
    assert_eq!(fused.contributing_agents, vec!["baseline".to_string(), "sentiment".to_string()]);
    // Sentiment is bullish, the baseline anchors at the market price
    assert!(fused.fused_probability > 0.5);
    assert!(fused.fused_probability < 0.65);
    assert_eq!(fused.market_probability, Some(0.5));
    assert!(fused.edge.unwrap() > 0.0);

    let stats = storage.stats().await.unwrap();
    assert_eq!(stats.total_signals, 2);
    assert_eq!(stats.total_fused, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scheduled_cycles_with_a_hanging_producer() {
    let storage = Arc::new(InMemoryStorage::new());
    let health = Arc::new(HealthState::new(HealthConfig::default()));

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let roster = Roster::new()
        .with_fn("trend", move |ctx: Arc<MarketContext>| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                // Turns bearish from the second cycle on
                let (p, d) = if n == 0 {
                    (0.72, SignalDirection::Bullish)
                } else {
                    (0.35, SignalDirection::Bearish)
                };
                Ok::<_, anyhow::Error>(vec![AgentSignal::new("trend", ctx.market_id.clone(), p, 0.8, d)
                    .with_drivers(["polling"])
                    .with_reasoning("polling average")])
            }
        })
        .with_fn("hangs", |_ctx: Arc<MarketContext>| async move {
            tokio::time::sleep(Duration::from_secs(3_600)).await;
            Ok::<Vec<AgentSignal>, anyhow::Error>(Vec::new())
        });

    let orchestrator = orchestrator(roster, storage.clone(), Arc::clone(&health));
    let cycle_orchestrator = Arc::clone(&orchestrator);
    let scheduler = Scheduler::new(move || {
        let orchestrator = Arc::clone(&cycle_orchestrator);
        async move { orchestrator.run_scheduled_cycle().await.map(|_| ()) }
    });

    scheduler.start(1_000).unwrap();
    health.set_scheduler_running(true, 1_000);
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    scheduler.stop().await;

    // Fires at 0s, 1s and 2s; each is bounded by the 200ms producer timeout
    assert_eq!(scheduler.cycles_started(), 3);
    assert_eq!(scheduler.skipped_fires(), 0);

    let events = storage.evolution_events("election-2028").await.unwrap();
    assert!(events.iter().any(|e| e.kind == EvolutionKind::DirectionChange));
    assert!(events.iter().all(|e| e.agent_name == "trend"));

    let audit = storage.audit_trail("election-2028").await.unwrap();
    let timeouts = audit
        .iter()
        .filter(|e| e.data["agent"] == "hangs" && e.data["timed_out"] == true)
        .count();
    assert_eq!(timeouts, 3);

    let latest = storage.latest_fused("election-2028").await.unwrap().unwrap();
    assert_eq!(latest.contributing_agents, vec!["trend".to_string()]);
    assert_eq!(health.get_health().await.status, HealthStatus::Healthy);
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_manual_trigger_over_http() {
    let storage = Arc::new(InMemoryStorage::new());
    let health = Arc::new(HealthState::new(HealthConfig::default()));
    let orchestrator = orchestrator(build_roster(&AgentsConfig::default()), storage.clone(), Arc::clone(&health));
    health.set_scheduler_running(true, 60_000);

    let trigger: Arc<dyn CycleTrigger> = orchestrator;
    let app = router(Arc::clone(&health), Some(trigger));
    let post = |uri: &str| Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap();

    let response = app.clone().oneshot(post("/analyze/election-2028")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary = body_json(response).await;
    assert_eq!(summary["market_id"], "election-2028");
    assert_eq!(summary["persisted"], true);

    let response = app.clone().oneshot(post("/analyze/unknown")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["cycles_completed"], 1);
    assert!(storage.latest_fused("election-2028").await.unwrap().is_some());
}
