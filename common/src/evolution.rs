use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionKind {
    DirectionChange,
    ProbabilityShift,
    ConfidenceChange,
    ReasoningEvolution,
}

impl fmt::Display for EvolutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvolutionKind::DirectionChange => "direction_change",
            EvolutionKind::ProbabilityShift => "probability_shift",
            EvolutionKind::ConfidenceChange => "confidence_change",
            EvolutionKind::ReasoningEvolution => "reasoning_evolution",
        };
        f.write_str(name)
    }
}

/// A material change in one producer's opinion relative to its own history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionEvent {
    pub kind: EvolutionKind,
    pub agent_name: String,
    pub market_id: String,
    pub detected_at: DateTime<Utc>,
    pub previous_value: serde_json::Value,
    pub new_value: serde_json::Value,
    pub magnitude: f64,
    pub description: String,
}
