//! Agent Executor - runs the roster concurrently under a per-producer time budget
//!
//! Each producer runs in its own task. Whichever comes first of its result,
//! its error, or its timeout finalizes its [`ExecutionResult`]; a timed-out
//! task is detached and anything it produces later is discarded. Results are
//! always returned in roster order and the executor itself never fails.

use crate::agent::{Agent, Roster};
use chrono::Utc;
use common::{AgentSignal, ExecutionResult, ExecutionSummary, MarketContext};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Per-producer time budget in milliseconds
    pub timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { timeout_ms: 120_000 }
    }
}

impl ExecutorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Runs a roster with the configured timeout
#[derive(Debug, Clone, Default)]
pub struct AgentExecutor {
    config: ExecutorConfig,
}

impl AgentExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run every producer of the roster against one market
    pub async fn run(&self, roster: &Roster, context: Arc<MarketContext>) -> Vec<ExecutionResult> {
        execute_in_parallel(roster, context, self.config.timeout()).await
    }
}

/// Run one producer, bounded by `timeout`.
///
/// Never fails: errors, panics and timeouts are folded into the result.
pub async fn execute_with_timeout(
    name: &str,
    agent: Arc<dyn Agent>,
    context: Arc<MarketContext>,
    timeout: Duration,
) -> ExecutionResult {
    let started_at = Utc::now();
    let start = Instant::now();
    let market_id = context.market_id.clone();

    debug!("Starting producer {} for market {}", name, market_id);

    let task = tokio::spawn(async move { agent.analyze(context).await });

    // Dropping the join handle on timeout detaches the task
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(signals))) => {
            let signals = collect_signals(name, &market_id, signals);
            let elapsed = start.elapsed();
            debug!(
                "Producer {} finished in {}ms with {} signal(s)",
                name,
                elapsed.as_millis(),
                signals.len()
            );
            ExecutionResult::succeeded(name, signals, started_at, elapsed)
        }
        Ok(Ok(Err(e))) => {
            warn!("Producer {} failed on {}: {:#}", name, market_id, e);
            ExecutionResult::failed(name, format!("{:#}", e), started_at, start.elapsed())
        }
        Ok(Err(join_error)) => {
            let message = if join_error.is_panic() {
                format!("{} panicked: {}", name, panic_message(join_error.into_panic()))
            } else {
                format!("{} was cancelled", name)
            };
            warn!("Producer {} aborted on {}: {}", name, market_id, message);
            ExecutionResult::failed(name, message, started_at, start.elapsed())
        }
        Err(_) => {
            warn!(
                "Producer {} timed out on {} after {}ms",
                name,
                market_id,
                timeout.as_millis()
            );
            ExecutionResult::timed_out(name, timeout, started_at, start.elapsed())
        }
    }
}

/// Run all producers concurrently; results come back in roster order
pub async fn execute_in_parallel(
    roster: &Roster,
    context: Arc<MarketContext>,
    timeout: Duration,
) -> Vec<ExecutionResult> {
    if roster.is_empty() {
        debug!("Empty roster, nothing to execute for {}", context.market_id);
        return Vec::new();
    }

    let started = Instant::now();
    let runs = roster.entries().iter().map(|entry| {
        execute_with_timeout(
            &entry.name,
            Arc::clone(&entry.agent),
            Arc::clone(&context),
            timeout,
        )
    });
    let results = join_all(runs).await;

    let summary = ExecutionSummary::from_results(&results);
    info!(
        "Executed {} producers for {} in {}ms: {} succeeded, {} failed, {} timed out",
        summary.total,
        context.market_id,
        started.elapsed().as_millis(),
        summary.succeeded,
        summary.failed,
        summary.timed_out
    );

    results
}

/// Signals of the successful results, in roster order
pub fn filter_successful_signals(results: &[ExecutionResult]) -> Vec<AgentSignal> {
    results
        .iter()
        .filter(|r| r.success)
        .flat_map(|r| r.signals.iter().cloned())
        .collect()
}

/// Stamp producer output with the roster name and market, dropping unusable signals
fn collect_signals(name: &str, market_id: &str, signals: Vec<AgentSignal>) -> Vec<AgentSignal> {
    signals
        .into_iter()
        .filter_map(|mut signal| {
            signal.agent_name = name.to_string();
            signal.market_id = market_id.to_string();
            let normalized = signal.normalized();
            if normalized.is_none() {
                warn!("Dropping signal from {} with missing probability or confidence", name);
            }
            normalized
        })
        .collect()
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
