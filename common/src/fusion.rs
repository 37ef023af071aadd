use crate::signal::SignalDirection;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Aggregate estimate produced once per cycle from the surviving signals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedSignal {
    pub id: Uuid,
    pub market_id: String,
    pub fused_probability: f64,
    pub fused_confidence: f64,
    /// 1.0 when every producer agrees, falling with average pairwise disagreement
    pub signal_alignment: f64,
    pub direction: SignalDirection,
    pub conflicting_signals: Vec<SignalConflict>,
    pub contributing_agents: Vec<String>,
    /// One entry per distinct contributing producer, summing to 1.0
    pub agent_weights: BTreeMap<String, f64>,
    pub market_probability: Option<f64>,
    pub edge: Option<f64>,
    pub metadata: FusionMetadata,
    pub created_at: DateTime<Utc>,
}

/// A pair of producers whose probabilities disagree beyond the conflict threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConflict {
    pub agent_a: String,
    pub agent_b: String,
    pub disagreement: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionMetadata {
    pub probability_range: f64,
    pub min_probability: f64,
    pub max_probability: f64,
    pub extreme_divergence: bool,
    pub direction_counts: DirectionCounts,
    pub signal_count: usize,
    pub data_quality_score: f64,
    pub used_fallback_weights: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionCounts {
    pub bullish: usize,
    pub bearish: usize,
    pub neutral: usize,
}

impl DirectionCounts {
    pub fn record(&mut self, direction: SignalDirection) {
        match direction {
            SignalDirection::Bullish => self.bullish += 1,
            SignalDirection::Bearish => self.bearish += 1,
            SignalDirection::Neutral => self.neutral += 1,
        }
    }
}
