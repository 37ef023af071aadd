//! Orchestrator - runs one analysis cycle per tracked market
//!
//! A cycle is a fixed pipeline over an explicit accumulator:
//! execute producers -> fuse -> persist -> track evolution -> flush audit.
//! Each stage returns a [`StageUpdate`] that is merged into the cycle's
//! [`CycleState`] before the next stage runs, so stages stay independent and
//! the merge rules are the only place state is combined.

use crate::agent::Roster;
use crate::executor::{filter_successful_signals, AgentExecutor};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    AgentSignal, AuditEntry, AuditLog, EvolutionEvent, ExecutionResult, ExecutionSummary, FusedSignal,
    MarketContext,
};
use dashmap::DashMap;
use monitoring::{CycleTrigger, EvolutionTracker, HealthState, TriggerError};
use serde::Serialize;
use serde_json::{json, Value};
use signal_generation::{SignalFusionEngine, SignalStorage};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const EXECUTION_STAGE: &str = "agent_execution";
pub const PERSISTENCE_STAGE: &str = "persistence";
pub const EVOLUTION_STAGE: &str = "evolution_tracking";

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error("Storage error: {0:#}")]
    Storage(anyhow::Error),
}

/// Accumulated state of one cycle
#[derive(Debug, Default)]
pub struct CycleState {
    pub execution_results: Vec<ExecutionResult>,
    pub signals: Vec<AgentSignal>,
    pub fused: Option<FusedSignal>,
    pub audit: AuditLog,
    pub evolution_events: Vec<EvolutionEvent>,
    pub metadata: BTreeMap<String, Value>,
}

/// What one stage contributes to the cycle state
#[derive(Debug, Default)]
pub struct StageUpdate {
    pub execution_results: Vec<ExecutionResult>,
    pub signals: Vec<AgentSignal>,
    pub fused: Option<FusedSignal>,
    pub audit: AuditLog,
    pub evolution_events: Vec<EvolutionEvent>,
    pub metadata: BTreeMap<String, Value>,
}

impl StageUpdate {
    fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

impl CycleState {
    /// Merge a stage's output.
    ///
    /// Lists and the audit log are appended, the fused result is replaced when
    /// the update carries one, and metadata is a key-wise union where the
    /// update wins.
    pub fn merge(&mut self, update: StageUpdate) {
        self.execution_results.extend(update.execution_results);
        self.signals.extend(update.signals);
        if let Some(fused) = update.fused {
            self.fused = Some(fused);
        }
        self.audit.extend(update.audit);
        self.evolution_events.extend(update.evolution_events);
        self.metadata.extend(update.metadata);
    }
}

/// Outcome of one market's cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub market_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub summary: ExecutionSummary,
    pub execution_results: Vec<ExecutionResult>,
    pub fused: Option<FusedSignal>,
    pub evolution_events: Vec<EvolutionEvent>,
    pub audit: Vec<AuditEntry>,
    pub metadata: BTreeMap<String, Value>,
    /// False when any write to storage failed
    pub persisted: bool,
}

impl CycleReport {
    /// A cycle counts as successful when it fused a result and stored it
    pub fn succeeded(&self) -> bool {
        self.fused.is_some() && self.persisted
    }

    /// Turn a report whose results could not be stored into an error
    pub fn ensure_persisted(self) -> Result<Self, OrchestratorError> {
        if self.persisted {
            Ok(self)
        } else {
            Err(OrchestratorError::Storage(anyhow::anyhow!(
                "cycle {} for {} ran but its results could not be stored",
                self.cycle_id,
                self.market_id
            )))
        }
    }

    /// Compact view returned by the manual trigger
    pub fn summary_json(&self) -> Value {
        json!({
            "cycle_id": self.cycle_id,
            "market_id": self.market_id,
            "started_at": self.started_at,
            "duration_ms": self.duration_ms,
            "agents": self.summary,
            "fused": self.fused,
            "evolution_events": self.evolution_events.len(),
            "audit_entries": self.audit.len(),
            "persisted": self.persisted,
        })
    }
}

/// Orchestrator - coordinates producers, fusion, persistence and evolution tracking
pub struct Orchestrator {
    roster: Roster,
    executor: AgentExecutor,
    fusion: SignalFusionEngine,
    tracker: EvolutionTracker,
    storage: Arc<dyn SignalStorage>,
    health: Option<Arc<HealthState>>,

    // Market cache
    markets: DashMap<String, Arc<MarketContext>>,
    // One in-flight cycle per market, scheduled or manual
    cycle_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    pub fn new(
        roster: Roster,
        executor: AgentExecutor,
        fusion: SignalFusionEngine,
        tracker: EvolutionTracker,
        storage: Arc<dyn SignalStorage>,
    ) -> Self {
        Self {
            roster,
            executor,
            fusion,
            tracker,
            storage,
            health: None,
            markets: DashMap::new(),
            cycle_locks: DashMap::new(),
        }
    }

    /// Report cycle outcomes to the health surface
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn storage(&self) -> Arc<dyn SignalStorage> {
        Arc::clone(&self.storage)
    }

    /// Add or replace tracked markets
    pub fn add_markets(&self, markets: Vec<MarketContext>) {
        let count = markets.len();
        for market in markets {
            self.markets.insert(market.market_id.clone(), Arc::new(market));
        }
        info!("Tracking {} new market(s), {} total", count, self.markets.len());
    }

    pub fn remove_market(&self, market_id: &str) -> bool {
        self.markets.remove(market_id).is_some()
    }

    pub fn market(&self, market_id: &str) -> Option<Arc<MarketContext>> {
        self.markets.get(market_id).map(|m| Arc::clone(m.value()))
    }

    /// Tracked market ids, sorted
    pub fn market_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.markets.iter().map(|m| m.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Run one cycle for a tracked market
    pub async fn run_cycle(&self, market_id: &str) -> Result<CycleReport, OrchestratorError> {
        let context = self
            .market(market_id)
            .ok_or_else(|| OrchestratorError::UnknownMarket(market_id.to_string()))?;
        let report = self.analyze(context).await;
        self.record_health(report.succeeded()).await;
        Ok(report)
    }

    /// Run one cycle for every tracked market, one after another.
    ///
    /// Fails when any market's results could not be stored, so the scheduler
    /// reports it; markets that merely produced no fused result do not fail.
    /// Health sees one outcome per call, successful only if every market was.
    pub async fn run_scheduled_cycle(&self) -> anyhow::Result<Vec<CycleReport>> {
        let ids = self.market_ids();
        if ids.is_empty() {
            debug!("No markets tracked, nothing to analyze");
            return Ok(Vec::new());
        }

        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            // A market removed mid-cycle is skipped
            if let Some(context) = self.market(&id) {
                reports.push(self.analyze(context).await);
            }
        }

        self.record_health(reports.iter().all(CycleReport::succeeded)).await;

        let unpersisted: Vec<&str> = reports
            .iter()
            .filter(|r| !r.persisted)
            .map(|r| r.market_id.as_str())
            .collect();
        if !unpersisted.is_empty() {
            anyhow::bail!("Failed to persist cycle results for {}", unpersisted.join(", "));
        }

        Ok(reports)
    }

    async fn record_health(&self, success: bool) {
        if let Some(health) = &self.health {
            health.record_cycle(success).await;
        }
    }

    fn cycle_lock(&self, market_id: &str) -> Arc<Mutex<()>> {
        let entry = self.cycle_locks.entry(market_id.to_string()).or_default();
        Arc::clone(entry.value())
    }

    /// Run the full pipeline for one market. Never fails; problems end up in the report.
    ///
    /// Cycles for the same market wait for each other.
    pub async fn analyze(&self, context: Arc<MarketContext>) -> CycleReport {
        let lock = self.cycle_lock(&context.market_id);
        let _guard = lock.lock().await;

        let cycle_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!("Cycle {} starting for market {}", cycle_id, context.market_id);

        let mut state = CycleState::default();
        state.metadata.insert("cycle_id".to_string(), json!(cycle_id));

        let update = self.execute_stage(&context).await;
        state.merge(update);
        let update = self.fuse_stage(&context, &state.signals);
        state.merge(update);
        let update = self.persist_stage(&context, &state).await;
        state.merge(update);
        let update = self.evolution_stage(&context, &state.signals).await;
        state.merge(update);

        let mut persisted = !state
            .metadata
            .get("persistence_failed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // Audit goes last so it covers every stage
        if let Err(e) = self.storage.append_audit(state.audit.entries()).await {
            error!("Failed to store audit trail for {}: {:#}", context.market_id, e);
            persisted = false;
        }

        let report = CycleReport {
            cycle_id,
            market_id: context.market_id.clone(),
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            summary: ExecutionSummary::from_results(&state.execution_results),
            execution_results: state.execution_results,
            fused: state.fused,
            evolution_events: state.evolution_events,
            audit: state.audit.into_entries(),
            metadata: state.metadata,
            persisted,
        };

        match &report.fused {
            Some(fused) => info!(
                "Cycle {} for {} finished in {}ms: probability {:.3}, confidence {:.3}, {} evolution event(s)",
                cycle_id,
                report.market_id,
                report.duration_ms,
                fused.fused_probability,
                fused.fused_confidence,
                report.evolution_events.len()
            ),
            None => warn!(
                "Cycle {} for {} finished in {}ms without a fused result",
                cycle_id, report.market_id, report.duration_ms
            ),
        }

        report
    }

    async fn execute_stage(&self, context: &Arc<MarketContext>) -> StageUpdate {
        let results = self.executor.run(&self.roster, Arc::clone(context)).await;
        let signals = filter_successful_signals(&results);

        let mut audit = AuditLog::new();
        for result in &results {
            audit.append(
                AuditEntry::new(
                    EXECUTION_STAGE,
                    result.success,
                    result.duration_ms,
                    json!({
                        "agent": result.agent_name,
                        "timed_out": result.timed_out,
                        "error": result.error,
                        "signals": result.signals.len(),
                    }),
                )
                .for_market(context.market_id.clone()),
            );
        }

        let summary = ExecutionSummary::from_results(&results);
        StageUpdate {
            execution_results: results,
            signals,
            audit,
            ..Default::default()
        }
        .with_metadata("execution", json!(summary))
    }

    fn fuse_stage(&self, context: &MarketContext, signals: &[AgentSignal]) -> StageUpdate {
        let mut audit = AuditLog::new();
        let fused = self.fusion.fuse_for_market(context, signals, &mut audit);
        StageUpdate {
            fused,
            audit,
            ..Default::default()
        }
    }

    async fn persist_stage(&self, context: &MarketContext, state: &CycleState) -> StageUpdate {
        let started = Instant::now();
        match self.persist(state).await {
            Ok(stored) => {
                debug!("Stored {} record(s) for {}", stored, context.market_id);
                let mut audit = AuditLog::new();
                audit.append(
                    AuditEntry::new(
                        PERSISTENCE_STAGE,
                        true,
                        started.elapsed().as_millis() as u64,
                        json!({ "records": stored }),
                    )
                    .for_market(context.market_id.clone()),
                );
                StageUpdate {
                    audit,
                    ..Default::default()
                }
            }
            Err(e) => {
                error!("Failed to persist cycle results for {}: {:#}", context.market_id, e);
                let mut audit = AuditLog::new();
                audit.append(
                    AuditEntry::new(
                        PERSISTENCE_STAGE,
                        false,
                        started.elapsed().as_millis() as u64,
                        json!({ "error": format!("{:#}", e) }),
                    )
                    .for_market(context.market_id.clone()),
                );
                StageUpdate {
                    audit,
                    ..Default::default()
                }
                .with_metadata("persistence_failed", json!(true))
            }
        }
    }

    async fn persist(&self, state: &CycleState) -> anyhow::Result<usize> {
        let mut stored = 0;
        if let Some(fused) = &state.fused {
            self.storage
                .store_fused(fused)
                .await
                .context("Failed to store fused signal")?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Compare every new signal with its producer's history, then store them all.
    ///
    /// Nothing from this cycle is stored until every comparison is done, so
    /// signals only ever meet earlier cycles' history.
    async fn evolution_stage(&self, context: &MarketContext, signals: &[AgentSignal]) -> StageUpdate {
        let started = Instant::now();
        let mut events = Vec::new();
        let mut errors = Vec::new();

        for signal in signals {
            match self.tracker.track(signal, self.storage.as_ref()).await {
                Ok(found) => events.extend(found),
                Err(e) => {
                    warn!("Evolution tracking failed for {}: {:#}", signal.agent_name, e);
                    errors.push(format!("{}: {:#}", signal.agent_name, e));
                }
            }
        }
        for signal in signals {
            if let Err(e) = self.storage.store_signal(signal).await {
                error!("Failed to store signal from {}: {:#}", signal.agent_name, e);
                errors.push(format!("{}: {:#}", signal.agent_name, e));
            }
        }

        let mut audit = AuditLog::new();
        audit.append(
            AuditEntry::new(
                EVOLUTION_STAGE,
                errors.is_empty(),
                started.elapsed().as_millis() as u64,
                json!({
                    "signals": signals.len(),
                    "events": events.len(),
                    "errors": errors,
                }),
            )
            .for_market(context.market_id.clone()),
        );

        let update = StageUpdate {
            evolution_events: events,
            audit,
            ..Default::default()
        };
        if errors.is_empty() {
            update
        } else {
            update.with_metadata("persistence_failed", json!(true))
        }
    }
}

impl From<OrchestratorError> for TriggerError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::UnknownMarket(id) => TriggerError::UnknownMarket(id),
            OrchestratorError::Storage(e) => TriggerError::Failed(e),
        }
    }
}

#[async_trait]
impl CycleTrigger for Orchestrator {
    async fn trigger(&self, market_id: &str) -> Result<Value, TriggerError> {
        let report = self.run_cycle(market_id).await?.ensure_persisted()?;
        Ok(report.summary_json())
    }
}
