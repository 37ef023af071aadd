use anyhow::{Context, Result};
use chrono::Utc;
use common::{AgentSignal, EvolutionEvent, EvolutionKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use signal_generation::SignalStorage;
use std::collections::HashSet;
use tracing::{debug, info};

/// Differences within this tolerance of a threshold count as equal to it
const THRESHOLD_EPSILON: f64 = 1e-9;

/// Configuration for evolution tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Absolute probability change that counts as a shift (exclusive)
    pub probability_shift_threshold: f64,
    /// Absolute confidence change that counts as material (exclusive)
    pub confidence_change_threshold: f64,
    /// Key-driver overlap ratio below which reasoning is considered to have evolved
    pub driver_overlap_threshold: f64,
    /// Fixed magnitude reported for reasoning evolution
    pub reasoning_magnitude: f64,
    /// How many historical signals to load per comparison
    pub history_limit: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            probability_shift_threshold: 0.1,
            confidence_change_threshold: 0.2,
            driver_overlap_threshold: 0.5,
            reasoning_magnitude: 0.5,
            history_limit: 10,
        }
    }
}

/// Evolution Tracker - flags material changes in a producer's opinion over time
pub struct EvolutionTracker {
    config: EvolutionConfig,
}

impl EvolutionTracker {
    pub fn new(config: EvolutionConfig) -> Self {
        Self { config }
    }

    pub fn new_with_defaults() -> Self {
        Self::new(EvolutionConfig::default())
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    /// Compare a new signal against its producer's history (most recent first).
    ///
    /// If the history already contains the new signal itself (it was persisted
    /// before tracking ran), that entry is skipped.
    pub fn compare(&self, signal: &AgentSignal, history: &[AgentSignal]) -> Vec<EvolutionEvent> {
        let previous = match history.iter().find(|h| *h != signal) {
            Some(previous) => previous,
            None => {
                debug!("First observation of {} on {}", signal.agent_name, signal.market_id);
                return Vec::new();
            }
        };

        let mut events = Vec::new();

        if let Some(event) = self.check_direction(signal, previous) {
            events.push(event);
        }
        if let Some(event) = self.check_probability(signal, previous) {
            events.push(event);
        }
        if let Some(event) = self.check_confidence(signal, previous) {
            events.push(event);
        }
        if let Some(event) = self.check_reasoning(signal, previous) {
            events.push(event);
        }

        for event in &events {
            info!("Evolution detected: {}", event.description);
        }

        events
    }

    /// Load history from storage, compare, and append any events to storage
    pub async fn track(&self, signal: &AgentSignal, storage: &dyn SignalStorage) -> Result<Vec<EvolutionEvent>> {
        // One extra in case the new signal has already been written back
        let history = storage
            .history(&signal.agent_name, &signal.market_id, self.config.history_limit + 1)
            .await
            .with_context(|| format!("Failed to load history for {} on {}", signal.agent_name, signal.market_id))?;

        let events = self.compare(signal, &history);
        if !events.is_empty() {
            storage
                .append_evolution(&events)
                .await
                .context("Failed to store evolution events")?;
        }
        Ok(events)
    }

    fn check_direction(&self, signal: &AgentSignal, previous: &AgentSignal) -> Option<EvolutionEvent> {
        if signal.direction == previous.direction {
            return None;
        }

        Some(self.event(
            EvolutionKind::DirectionChange,
            signal,
            json!(previous.direction),
            json!(signal.direction),
            1.0,
            format!(
                "{} changed direction on {}: {} -> {}",
                signal.agent_name, signal.market_id, previous.direction, signal.direction
            ),
        ))
    }

    fn check_probability(&self, signal: &AgentSignal, previous: &AgentSignal) -> Option<EvolutionEvent> {
        let shift = (signal.probability - previous.probability).abs();
        if shift <= self.config.probability_shift_threshold + THRESHOLD_EPSILON {
            return None;
        }

        Some(self.event(
            EvolutionKind::ProbabilityShift,
            signal,
            json!(previous.probability),
            json!(signal.probability),
            shift,
            format!(
                "{} probability on {} shifted {:.1}pp ({:.1}% -> {:.1}%)",
                signal.agent_name,
                signal.market_id,
                shift * 100.0,
                previous.probability * 100.0,
                signal.probability * 100.0
            ),
        ))
    }

    fn check_confidence(&self, signal: &AgentSignal, previous: &AgentSignal) -> Option<EvolutionEvent> {
        let change = (signal.confidence - previous.confidence).abs();
        if change <= self.config.confidence_change_threshold + THRESHOLD_EPSILON {
            return None;
        }

        Some(self.event(
            EvolutionKind::ConfidenceChange,
            signal,
            json!(previous.confidence),
            json!(signal.confidence),
            change,
            format!(
                "{} confidence on {} changed by {:.2} ({:.2} -> {:.2})",
                signal.agent_name, signal.market_id, change, previous.confidence, signal.confidence
            ),
        ))
    }

    fn check_reasoning(&self, signal: &AgentSignal, previous: &AgentSignal) -> Option<EvolutionEvent> {
        let overlap = driver_overlap(&previous.key_drivers, &signal.key_drivers)?;
        if overlap >= self.config.driver_overlap_threshold {
            return None;
        }

        Some(self.event(
            EvolutionKind::ReasoningEvolution,
            signal,
            json!(previous.key_drivers),
            json!(signal.key_drivers),
            self.config.reasoning_magnitude,
            format!(
                "{} key drivers on {} evolved (overlap {:.0}%)",
                signal.agent_name,
                signal.market_id,
                overlap * 100.0
            ),
        ))
    }

    fn event(
        &self,
        kind: EvolutionKind,
        signal: &AgentSignal,
        previous_value: serde_json::Value,
        new_value: serde_json::Value,
        magnitude: f64,
        description: String,
    ) -> EvolutionEvent {
        EvolutionEvent {
            kind,
            agent_name: signal.agent_name.clone(),
            market_id: signal.market_id.clone(),
            detected_at: Utc::now(),
            previous_value,
            new_value,
            magnitude,
            description,
        }
    }
}

impl Default for EvolutionTracker {
    fn default() -> Self {
        Self::new_with_defaults()
    }
}

/// Overlap ratio of two driver lists: shared drivers over the larger set.
///
/// Returns `None` when both are empty (nothing to compare), and `Some(0.0)`
/// when exactly one is empty.
pub fn driver_overlap(previous: &[String], current: &[String]) -> Option<f64> {
    let normalize = |drivers: &[String]| -> HashSet<String> {
        drivers
            .iter()
            .map(|d| d.trim().to_lowercase())
            .filter(|d| !d.is_empty())
            .collect()
    };
    let previous = normalize(previous);
    let current = normalize(current);

    match (previous.is_empty(), current.is_empty()) {
        (true, true) => None,
        (true, false) | (false, true) => Some(0.0),
        (false, false) => {
            let shared = previous.intersection(&current).count();
            Some(shared as f64 / previous.len().max(current.len()) as f64)
        }
    }
}
