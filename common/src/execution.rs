use crate::signal::AgentSignal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of running one producer for one cycle.
///
/// Finalized exactly once: when the producer returns, fails, or its timeout
/// elapses, whichever comes first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub agent_name: String,
    pub success: bool,
    #[serde(default)]
    pub signals: Vec<AgentSignal>,
    pub error: Option<String>,
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn succeeded(
        agent_name: impl Into<String>,
        signals: Vec<AgentSignal>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            success: true,
            signals,
            error: None,
            timed_out: false,
            started_at,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(
        agent_name: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            success: false,
            signals: Vec::new(),
            error: Some(error.into()),
            timed_out: false,
            started_at,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn timed_out(
        agent_name: impl Into<String>,
        timeout: Duration,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let agent_name = agent_name.into();
        let error = format!("{} timed out after {}ms", agent_name, timeout.as_millis());
        Self {
            agent_name,
            success: false,
            signals: Vec::new(),
            error: Some(error),
            timed_out: true,
            started_at,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// The primary signal of a successful run
    pub fn signal(&self) -> Option<&AgentSignal> {
        self.signals.first()
    }
}

/// Tally of a batch of execution results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub signals: usize,
}

impl ExecutionSummary {
    pub fn from_results(results: &[ExecutionResult]) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Default::default()
        };
        for result in results {
            if result.success {
                summary.succeeded += 1;
                summary.signals += result.signals.len();
            } else if result.timed_out {
                summary.timed_out += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}
