// Signal Validators
// Screens producer signals before they reach fusion

use common::AgentSignal;
use tracing::debug;

/// Trait for pre-fusion signal validators
pub trait SignalValidator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, signal: &AgentSignal) -> bool;
}

/// Rejects signals whose probability or confidence is missing or out of range
#[derive(Debug, Clone, Default)]
pub struct RangeValidator;

impl SignalValidator for RangeValidator {
    fn name(&self) -> &'static str {
        "range"
    }

    fn validate(&self, signal: &AgentSignal) -> bool {
        let in_range = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        let passes = in_range(signal.probability) && in_range(signal.confidence);
        if !passes {
            debug!(
                "Range validation failed for {}: p={} c={}",
                signal.agent_name, signal.probability, signal.confidence
            );
        }
        passes
    }
}

/// Configuration for confidence validator
#[derive(Debug, Clone)]
pub struct MinConfidenceConfig {
    /// Minimum confidence level (0.0 to 1.0)
    pub min_confidence: f64,
}

impl Default for MinConfidenceConfig {
    fn default() -> Self {
        Self { min_confidence: 0.0 }
    }
}

/// Drops signals whose self-reported confidence is below a floor
pub struct MinConfidenceValidator {
    config: MinConfidenceConfig,
}

impl MinConfidenceValidator {
    pub fn new(config: MinConfidenceConfig) -> Self {
        Self { config }
    }
}

impl SignalValidator for MinConfidenceValidator {
    fn name(&self) -> &'static str {
        "min_confidence"
    }

    fn validate(&self, signal: &AgentSignal) -> bool {
        let passes = signal.confidence >= self.config.min_confidence;
        debug!(
            "Confidence validation for {}: {:.2} >= {:.2}? {}",
            signal.agent_name, signal.confidence, self.config.min_confidence, passes
        );
        passes
    }
}

/// Passes a signal only if every inner validator passes it
#[derive(Default)]
pub struct CompositeValidator {
    validators: Vec<Box<dyn SignalValidator>>,
}

impl CompositeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, validator: Box<dyn SignalValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Keep the signals that pass, in input order
    pub fn filter<'a>(&self, signals: &'a [AgentSignal]) -> Vec<&'a AgentSignal> {
        signals.iter().filter(|s| self.validate(s)).collect()
    }
}

impl SignalValidator for CompositeValidator {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn validate(&self, signal: &AgentSignal) -> bool {
        for validator in &self.validators {
            if !validator.validate(signal) {
                debug!("Signal from {} rejected by {}", signal.agent_name, validator.name());
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SignalDirection;

    fn signal(p: f64, c: f64) -> AgentSignal {
        AgentSignal::new("agent", "m", p, c, SignalDirection::Neutral)
    }

    #[test]
    fn test_range_validator_rejects_nan() {
        assert!(RangeValidator.validate(&signal(0.4, 0.6)));
        assert!(!RangeValidator.validate(&signal(f64::NAN, 0.6)));
        assert!(!RangeValidator.validate(&signal(0.4, f64::INFINITY)));
    }

    #[test]
    fn test_composite_filters_in_order() {
        let composite = CompositeValidator::new()
            .add(Box::new(RangeValidator))
            .add(Box::new(MinConfidenceValidator::new(MinConfidenceConfig { min_confidence: 0.3 })));

        let signals = vec![signal(0.2, 0.9), signal(0.5, 0.1), signal(f64::NAN, 0.9), signal(0.8, 0.3)];
        let kept = composite.filter(&signals);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].probability, 0.2);
        assert_eq!(kept[1].probability, 0.8);
    }
}
