//! Research Agents - multi-producer market analysis service
//!
//! This crate runs a roster of analysis producers against tracked markets on a
//! fixed cadence. It includes:
//! - Base Agent trait and roster for implementing producers
//! - Executor running the roster concurrently with per-producer timeouts
//! - Scheduler firing non-overlapping, start-aligned cycles
//! - Orchestrator wiring execution, fusion, persistence and evolution tracking
//! - Reference producers (Baseline, Sentiment)

pub mod agent;
pub mod baseline;
pub mod config;
pub mod executor;
pub mod orchestrator;
pub mod scheduler;
pub mod sentiment;

// Re-export commonly used types
pub use agent::{Agent, FnAgent, Roster, RosterEntry};
pub use baseline::{BaselineAgent, BaselineAgentConfig};
pub use config::{AgentsConfig, SchedulerConfig, ServiceConfig, DEFAULT_CONFIG_PATH};
pub use executor::{
    execute_in_parallel, execute_with_timeout, filter_successful_signals, AgentExecutor, ExecutorConfig,
};
pub use orchestrator::{CycleReport, CycleState, Orchestrator, OrchestratorError, StageUpdate};
pub use scheduler::{CycleFailure, CycleFn, Scheduler, SchedulerError, SchedulerState};
pub use sentiment::{SentimentAgent, SentimentAgentConfig, SentimentScore};

// Re-export common types for convenience
pub use common::{AgentSignal, ExecutionResult, FusedSignal, MarketContext, NewsHeadline, SignalDirection};

use std::sync::Arc;

/// Assemble the roster from the enabled reference producers, in a fixed order
pub fn build_roster(agents: &AgentsConfig) -> Roster {
    let mut roster = Roster::new();
    if agents.baseline.enabled {
        roster = roster.with_agent(Arc::new(BaselineAgent::new(agents.baseline.clone())));
    }
    if agents.sentiment.enabled {
        roster = roster.with_agent(Arc::new(SentimentAgent::new(agents.sentiment.clone())));
    }
    roster
}
