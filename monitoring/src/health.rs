//! Health check HTTP surface
//!
//! Provides the liveness/health probes for process supervision and an
//! optional endpoint that runs one ad hoc analysis cycle for a market.

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Configuration for the health surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub bind_addr: SocketAddr,
    /// Cycles are considered stale after this many scheduler intervals without one
    pub stale_after_intervals: u32,
    /// Consecutive failed cycles before the service reports unhealthy
    pub unhealthy_after_failures: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            stale_after_intervals: 3,
            unhealthy_after_failures: 3,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub cycles_completed: u64,
    pub consecutive_failures: u32,
    pub components: Vec<ComponentHealth>,
}

/// Shared state updated by the scheduler and the cycle coordinator
pub struct HealthState {
    config: HealthConfig,
    started_at: DateTime<Utc>,
    scheduler_running: AtomicBool,
    interval_ms: AtomicU64,
    cycles_completed: AtomicU64,
    consecutive_failures: AtomicU32,
    last_cycle: RwLock<Option<CycleRecord>>,
}

#[derive(Debug, Clone, Copy)]
struct CycleRecord {
    at: DateTime<Utc>,
    success: bool,
}

impl HealthState {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            started_at: Utc::now(),
            scheduler_running: AtomicBool::new(false),
            interval_ms: AtomicU64::new(0),
            cycles_completed: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            last_cycle: RwLock::new(None),
        }
    }

    /// Record whether the periodic scheduler is active and at what interval
    pub fn set_scheduler_running(&self, running: bool, interval_ms: u64) {
        self.scheduler_running.store(running, Ordering::SeqCst);
        self.interval_ms.store(interval_ms, Ordering::SeqCst);
    }

    pub async fn record_cycle(&self, success: bool) {
        self.record_cycle_at(success, Utc::now()).await;
    }

    pub async fn record_cycle_at(&self, success: bool, at: DateTime<Utc>) {
        *self.last_cycle.write().await = Some(CycleRecord { at, success });
        self.cycles_completed.fetch_add(1, Ordering::SeqCst);
        if success {
            self.consecutive_failures.store(0, Ordering::SeqCst);
        } else {
            let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!("Analysis cycle failed ({} consecutive)", failures);
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let now = Utc::now();
        let mut components = Vec::new();

        let running = self.scheduler_running.load(Ordering::SeqCst);
        let interval_ms = self.interval_ms.load(Ordering::SeqCst);
        components.push(ComponentHealth {
            name: "scheduler".to_string(),
            status: if running { HealthStatus::Healthy } else { HealthStatus::Unhealthy },
            message: if running {
                Some(format!("interval {}ms", interval_ms))
            } else {
                Some("Scheduler not running".to_string())
            },
            last_check: Some(now),
        });

        let last_cycle = *self.last_cycle.read().await;
        let failures = self.consecutive_failures();
        let stale_after = std::time::Duration::from_millis(
            interval_ms.saturating_mul(self.config.stale_after_intervals as u64),
        );
        let reference = last_cycle.map(|c| c.at).unwrap_or(self.started_at);
        let since = (now - reference).to_std().unwrap_or_default();
        let stale = running && interval_ms > 0 && since > stale_after;

        let (cycle_status, message) = if failures >= self.config.unhealthy_after_failures {
            (HealthStatus::Unhealthy, Some(format!("{} consecutive failed cycles", failures)))
        } else if last_cycle.map_or(false, |c| !c.success) {
            (HealthStatus::Degraded, Some("Last cycle failed".to_string()))
        } else if stale {
            (HealthStatus::Degraded, Some("No recent cycle".to_string()))
        } else {
            (HealthStatus::Healthy, None)
        };
        components.push(ComponentHealth {
            name: "analysis_cycles".to_string(),
            status: cycle_status,
            message,
            last_check: last_cycle.map(|c| c.at),
        });

        let status = components
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthResponse {
            status,
            timestamp: now,
            uptime_seconds: (now - self.started_at).num_seconds().max(0) as u64,
            cycles_completed: self.cycles_completed.load(Ordering::SeqCst),
            consecutive_failures: failures,
            components,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

/// Errors a manual trigger can report back to the HTTP caller
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Entry point the manual-trigger endpoint uses to run one ad hoc cycle
#[async_trait]
pub trait CycleTrigger: Send + Sync {
    async fn trigger(&self, market_id: &str) -> Result<serde_json::Value, TriggerError>;
}

#[derive(Clone)]
struct AppState {
    health: Arc<HealthState>,
    trigger: Option<Arc<dyn CycleTrigger>>,
}

/// Build the router; the analyze route is only mounted when a trigger is given
pub fn router(health: Arc<HealthState>, trigger: Option<Arc<dyn CycleTrigger>>) -> Router {
    let has_trigger = trigger.is_some();
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler));

    if has_trigger {
        app = app.route("/analyze/:market_id", post(analyze_handler));
    }

    app.with_state(AppState { health, trigger })
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    trigger: Option<Arc<dyn CycleTrigger>>,
    addr: SocketAddr,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, addr: SocketAddr) -> Self {
        Self {
            state,
            trigger: None,
            addr,
        }
    }

    pub fn with_trigger(mut self, trigger: Arc<dyn CycleTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = router(Arc::clone(&self.state), self.trigger.clone());

        info!("Starting health server on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!("Health server error: {}", e))?;

        Ok(())
    }

    /// Get shared state for updating from other components
    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

/// Full health check endpoint
async fn health_handler(State(app): State<AppState>) -> impl IntoResponse {
    let health = app.health.get_health().await;
    (health.status.status_code(), Json(health))
}

/// Liveness probe - is the process alive?
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Run one ad hoc cycle outside the schedule
async fn analyze_handler(State(app): State<AppState>, Path(market_id): Path<String>) -> impl IntoResponse {
    let Some(trigger) = app.trigger else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "manual trigger disabled"})));
    };

    info!("Manual analysis requested for market {}", market_id);
    match trigger.trigger(&market_id).await {
        Ok(summary) => (StatusCode::OK, Json(summary)),
        Err(TriggerError::UnknownMarket(id)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": format!("unknown market {}", id)})),
        ),
        Err(TriggerError::Failed(e)) => {
            error!("Manual analysis of {} failed: {:#}", market_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": e.to_string()})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Duration;
    use tower::ServiceExt;

    struct StubTrigger;

    #[async_trait]
    impl CycleTrigger for StubTrigger {
        async fn trigger(&self, market_id: &str) -> Result<serde_json::Value, TriggerError> {
            match market_id {
                "known" => Ok(serde_json::json!({"market_id": market_id, "fused": true})),
                "broken" => Err(TriggerError::Failed(anyhow::anyhow!("storage offline"))),
                other => Err(TriggerError::UnknownMarket(other.to_string())),
            }
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_states() {
        let state = HealthState::default();

        // Scheduler not started
        assert_eq!(state.get_health().await.status, HealthStatus::Unhealthy);

        state.set_scheduler_running(true, 60_000);
        assert_eq!(state.get_health().await.status, HealthStatus::Healthy);

        state.record_cycle(false).await;
        assert_eq!(state.get_health().await.status, HealthStatus::Degraded);

        state.record_cycle(false).await;
        state.record_cycle(false).await;
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.consecutive_failures, 3);

        state.record_cycle(true).await;
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.cycles_completed, 4);
    }

    #[tokio::test]
    async fn test_stale_cycles_degrade() {
        let state = HealthState::default();
        state.set_scheduler_running(true, 1_000);
        state.record_cycle_at(true, Utc::now() - Duration::seconds(10)).await;

        assert_eq!(state.get_health().await.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_health_endpoint_status_codes() {
        let state = Arc::new(HealthState::default());
        let app = router(Arc::clone(&state), None);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["status"], "unhealthy");

        state.set_scheduler_running(true, 60_000);
        state.record_cycle(false).await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "degraded");
    }

    #[tokio::test]
    async fn test_analyze_endpoint() {
        let state = Arc::new(HealthState::default());
        let app = router(state, Some(Arc::new(StubTrigger)));

        let post = |uri: &str| Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap();

        let response = app.clone().oneshot(post("/analyze/known")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["fused"], true);

        let response = app.clone().oneshot(post("/analyze/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(post("/analyze/broken")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_analyze_route_absent_without_trigger() {
        let app = router(Arc::new(HealthState::default()), None);
        let response = app
            .oneshot(Request::builder().method("POST").uri("/analyze/known").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
