use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Categorical stance of a producer relative to the market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl SignalDirection {
    /// Derive a direction from an estimate versus the market baseline.
    ///
    /// Differences within `band` of the baseline are neutral.
    pub fn from_edge(estimate: f64, baseline: f64, band: f64) -> Self {
        let edge = estimate - baseline;
        if edge > band {
            SignalDirection::Bullish
        } else if edge < -band {
            SignalDirection::Bearish
        } else {
            SignalDirection::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalDirection::Bullish => "bullish",
            SignalDirection::Bearish => "bearish",
            SignalDirection::Neutral => "neutral",
        }
    }
}

impl fmt::Display for SignalDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One producer's opinion about one market at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSignal {
    pub agent_name: String,
    pub market_id: String,
    pub probability: f64, // 0.0 to 1.0
    pub confidence: f64,  // 0.0 to 1.0
    pub direction: SignalDirection,
    #[serde(default)]
    pub key_drivers: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl AgentSignal {
    /// Create a signal, clamping probability and confidence into [0, 1].
    ///
    /// Non-finite inputs are kept as-is so [`AgentSignal::is_valid`] can
    /// reject them later.
    pub fn new(
        agent_name: impl Into<String>,
        market_id: impl Into<String>,
        probability: f64,
        confidence: f64,
        direction: SignalDirection,
    ) -> Self {
        Self {
            agent_name: agent_name.into(),
            market_id: market_id.into(),
            probability: clamp_unit(probability),
            confidence: clamp_unit(confidence),
            direction,
            key_drivers: Vec::new(),
            reasoning: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_drivers<I, S>(mut self, drivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_drivers = drivers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// A signal whose probability or confidence is missing (NaN/inf) is invalid
    pub fn is_valid(&self) -> bool {
        self.probability.is_finite() && self.confidence.is_finite()
    }

    /// Returns the signal with both scores clamped, or `None` if it is invalid
    pub fn normalized(mut self) -> Option<Self> {
        if !self.is_valid() {
            return None;
        }
        self.probability = self.probability.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        Some(self)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_scores() {
        let signal = AgentSignal::new("a", "m", 1.7, -0.2, SignalDirection::Bullish);
        assert_eq!(signal.probability, 1.0);
        assert_eq!(signal.confidence, 0.0);
        assert!(signal.is_valid());
    }

    #[test]
    fn test_nan_probability_is_invalid() {
        let signal = AgentSignal::new("a", "m", f64::NAN, 0.5, SignalDirection::Neutral);
        assert!(!signal.is_valid());
        assert!(signal.normalized().is_none());
    }

    #[test]
    fn test_normalized_clamps_mutated_fields() {
        let mut signal = AgentSignal::new("a", "m", 0.5, 0.5, SignalDirection::Neutral);
        signal.confidence = 3.0;
        let signal = signal.normalized().unwrap();
        assert_eq!(signal.confidence, 1.0);
    }

    #[test]
    fn test_direction_from_edge() {
        assert_eq!(SignalDirection::from_edge(0.70, 0.50, 0.05), SignalDirection::Bullish);
        assert_eq!(SignalDirection::from_edge(0.30, 0.50, 0.05), SignalDirection::Bearish);
        assert_eq!(SignalDirection::from_edge(0.52, 0.50, 0.05), SignalDirection::Neutral);
    }

    #[test]
    fn test_missing_confidence_fails_to_deserialize() {
        let parsed: Result<AgentSignal, _> = serde_json::from_value(serde_json::json!({
            "agent_name": "a",
            "market_id": "m",
            "probability": 0.4,
            "direction": "bearish",
            "created_at": "2024-01-01T00:00:00Z"
        }));
        assert!(parsed.is_err());
    }
}
