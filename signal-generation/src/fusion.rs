// Signal Fusion Engine
// Merges the surviving producer signals of one cycle into a single estimate

use super::validators::{CompositeValidator, MinConfidenceConfig, MinConfidenceValidator, RangeValidator};
use super::weights::resolve_weights;
use chrono::Utc;
use common::{
    AgentSignal, AuditEntry, AuditLog, DirectionCounts, FusedSignal, FusionMetadata, MarketContext,
    SignalConflict, SignalDirection,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const FUSION_STAGE: &str = "signal_fusion";

/// Alignment reported when fewer than two producers contribute; leaves confidence unscaled
const NEUTRAL_ALIGNMENT: f64 = 0.5;

/// Configuration for the fusion engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Raw `producer -> weight` table; anything unusable degrades to equal weights
    pub base_weights: Option<serde_json::Value>,
    /// Probability range above which the cycle is flagged as extremely divergent
    pub divergence_threshold: f64,
    /// Pairwise disagreement above which two producers are recorded as conflicting
    pub conflict_threshold: f64,
    /// How strongly alignment scales the fused confidence (0 disables scaling)
    pub alignment_influence: f64,
    /// Lower bound of the fused probability
    pub min_probability: f64,
    /// Upper bound of the fused probability
    pub max_probability: f64,
    /// Signals below this self-reported confidence are left out of fusion
    pub min_signal_confidence: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            base_weights: None,
            divergence_threshold: 0.7,
            conflict_threshold: 0.2,
            alignment_influence: 0.2,
            min_probability: 0.01,
            max_probability: 0.99,
            min_signal_confidence: 0.0,
        }
    }
}

impl FusionConfig {
    /// Probability bounds, reset to defaults when the configured pair is unusable
    fn probability_bounds(&self) -> (f64, f64) {
        let (lo, hi) = (self.min_probability, self.max_probability);
        if lo.is_finite() && hi.is_finite() && 0.0 < lo && lo < hi && hi < 1.0 {
            (lo, hi)
        } else {
            let defaults = FusionConfig::default();
            warn!("Invalid fused probability bounds [{}, {}], using defaults", lo, hi);
            (defaults.min_probability, defaults.max_probability)
        }
    }
}

/// Signal fusion engine
pub struct SignalFusionEngine {
    config: FusionConfig,
    validator: CompositeValidator,
}

impl SignalFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        let validator = CompositeValidator::new()
            .add(Box::new(RangeValidator))
            .add(Box::new(MinConfidenceValidator::new(MinConfidenceConfig {
                min_confidence: config.min_signal_confidence,
            })));

        Self { config, validator }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse signals without market context.
    ///
    /// Returns `None` when no valid signal is available. Exactly one audit
    /// entry is appended either way.
    pub fn fuse(&self, signals: &[AgentSignal], audit: &mut AuditLog) -> Option<FusedSignal> {
        let market_id = signals.first().map(|s| s.market_id.clone());
        self.fuse_inner(market_id, None, signals, audit)
    }

    /// Fuse signals for a market, recording the edge against its baseline
    pub fn fuse_for_market(
        &self,
        context: &MarketContext,
        signals: &[AgentSignal],
        audit: &mut AuditLog,
    ) -> Option<FusedSignal> {
        self.fuse_inner(
            Some(context.market_id.clone()),
            Some(context.baseline_probability),
            signals,
            audit,
        )
    }

    fn fuse_inner(
        &self,
        market_id: Option<String>,
        market_probability: Option<f64>,
        signals: &[AgentSignal],
        audit: &mut AuditLog,
    ) -> Option<FusedSignal> {
        let started = Instant::now();
        let valid = self.validator.filter(signals);

        if valid.is_empty() {
            warn!(
                "Fusion impossible for market {}: {} input signals, none valid",
                market_id.as_deref().unwrap_or("unknown"),
                signals.len()
            );
            let mut entry = AuditEntry::new(
                FUSION_STAGE,
                false,
                started.elapsed().as_millis() as u64,
                serde_json::json!({
                    "reason": "no valid signals",
                    "input_signals": signals.len(),
                }),
            );
            entry.market_id = market_id;
            audit.append(entry);
            return None;
        }

        if valid.len() < signals.len() {
            debug!("Dropped {} invalid signals before fusion", signals.len() - valid.len());
        }

        let fused = self.compute(market_id, market_probability, &valid);

        info!(
            "Fused {} signals for market {}: p={:.3} c={:.3} alignment={:.3} conflicts={}{}",
            fused.metadata.signal_count,
            fused.market_id,
            fused.fused_probability,
            fused.fused_confidence,
            fused.signal_alignment,
            fused.conflicting_signals.len(),
            if fused.metadata.extreme_divergence { " (extreme divergence)" } else { "" }
        );

        let mut entry = AuditEntry::new(
            FUSION_STAGE,
            true,
            started.elapsed().as_millis() as u64,
            serde_json::json!({
                "fused_signal_id": fused.id,
                "fused_probability": fused.fused_probability,
                "fused_confidence": fused.fused_confidence,
                "signal_alignment": fused.signal_alignment,
                "signal_count": fused.metadata.signal_count,
                "conflicts": fused.conflicting_signals.len(),
                "extreme_divergence": fused.metadata.extreme_divergence,
                "used_fallback_weights": fused.metadata.used_fallback_weights,
            }),
        );
        entry.market_id = Some(fused.market_id.clone());
        audit.append(entry);

        Some(fused)
    }

    fn compute(
        &self,
        market_id: Option<String>,
        market_probability: Option<f64>,
        signals: &[&AgentSignal],
    ) -> FusedSignal {
        let names: Vec<&str> = signals.iter().map(|s| s.agent_name.as_str()).collect();
        let resolved = resolve_weights(self.config.base_weights.as_ref(), &names);

        // A producer's weight is shared evenly among the signals it emitted
        let mut per_name_count: HashMap<&str, usize> = HashMap::new();
        for name in &names {
            *per_name_count.entry(*name).or_insert(0) += 1;
        }
        let signal_weights: Vec<f64> = signals
            .iter()
            .map(|s| resolved.get(&s.agent_name) / per_name_count[s.agent_name.as_str()] as f64)
            .collect();

        let weighted_probability: f64 = signals
            .iter()
            .zip(&signal_weights)
            .map(|(s, w)| s.probability * w)
            .sum();
        let weighted_confidence: f64 = signals
            .iter()
            .zip(&signal_weights)
            .map(|(s, w)| s.confidence * w)
            .sum();

        let min_probability = signals.iter().map(|s| s.probability).fold(f64::INFINITY, f64::min);
        let max_probability = signals.iter().map(|s| s.probability).fold(f64::NEG_INFINITY, f64::max);
        let probability_range = max_probability - min_probability;
        let extreme_divergence = probability_range > self.config.divergence_threshold;

        let (conflicting_signals, average_disagreement) = self.pairwise(signals);
        let signal_alignment = if per_name_count.len() < 2 {
            NEUTRAL_ALIGNMENT
        } else {
            (1.0 - average_disagreement).clamp(0.0, 1.0)
        };

        let fused_confidence = self.fused_confidence(
            weighted_confidence,
            signal_alignment,
            probability_range,
            extreme_divergence,
        );

        if extreme_divergence {
            warn!(
                "Extreme divergence: probability range {:.3} exceeds {:.3}, confidence penalized to {:.3}",
                probability_range, self.config.divergence_threshold, fused_confidence
            );
        }

        let (lo, hi) = self.config.probability_bounds();
        let fused_probability = weighted_probability.clamp(lo, hi);

        let mut direction_counts = DirectionCounts::default();
        for signal in signals {
            direction_counts.record(signal.direction);
        }

        let mut contributing_agents: Vec<String> = Vec::new();
        for name in &names {
            if !contributing_agents.iter().any(|a| a == name) {
                contributing_agents.push(name.to_string());
            }
        }

        FusedSignal {
            id: Uuid::new_v4(),
            market_id: market_id.unwrap_or_else(|| signals[0].market_id.clone()),
            fused_probability,
            fused_confidence,
            signal_alignment,
            direction: consensus_direction(signals, &signal_weights),
            conflicting_signals,
            contributing_agents,
            agent_weights: resolved.weights,
            market_probability,
            edge: market_probability.map(|baseline| fused_probability - baseline),
            metadata: FusionMetadata {
                probability_range,
                min_probability,
                max_probability,
                extreme_divergence,
                direction_counts,
                signal_count: signals.len(),
                data_quality_score: data_quality(signals),
                used_fallback_weights: resolved.used_fallback,
            },
            created_at: Utc::now(),
        }
    }

    /// Conflicting pairs and the average disagreement over all unordered pairs
    fn pairwise(&self, signals: &[&AgentSignal]) -> (Vec<SignalConflict>, f64) {
        let mut conflicts = Vec::new();
        let mut total = 0.0;
        let mut pairs = 0usize;

        for (i, a) in signals.iter().enumerate() {
            for b in &signals[i + 1..] {
                let disagreement = (a.probability - b.probability).abs();
                total += disagreement;
                pairs += 1;

                if disagreement > self.config.conflict_threshold {
                    debug!(
                        "Conflict between {} ({:.2}) and {} ({:.2}): {:.2}",
                        a.agent_name, a.probability, b.agent_name, b.probability, disagreement
                    );
                    conflicts.push(SignalConflict {
                        agent_a: a.agent_name.clone(),
                        agent_b: b.agent_name.clone(),
                        disagreement,
                    });
                }
            }
        }

        let average = if pairs > 0 { total / pairs as f64 } else { 0.0 };
        (conflicts, average)
    }

    /// Alignment moves confidence by up to `alignment_influence` either way
    /// around the neutral point 0.5. Extreme divergence halves the result and
    /// scales it by the unexplained share of the range, which keeps it below 0.5.
    fn fused_confidence(
        &self,
        weighted_confidence: f64,
        alignment: f64,
        probability_range: f64,
        extreme_divergence: bool,
    ) -> f64 {
        let influence = if self.config.alignment_influence.is_finite() {
            self.config.alignment_influence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let scaled = (weighted_confidence * (1.0 + influence * (2.0 * alignment - 1.0))).clamp(0.0, 1.0);

        if extreme_divergence {
            (scaled * 0.5 * (1.0 - probability_range)).clamp(0.0, 1.0)
        } else {
            scaled
        }
    }
}

impl Default for SignalFusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

/// Weighted direction vote; ties resolve to neutral
fn consensus_direction(signals: &[&AgentSignal], weights: &[f64]) -> SignalDirection {
    let mut bullish = 0.0;
    let mut bearish = 0.0;
    let mut neutral = 0.0;
    for (signal, weight) in signals.iter().zip(weights) {
        match signal.direction {
            SignalDirection::Bullish => bullish += weight,
            SignalDirection::Bearish => bearish += weight,
            SignalDirection::Neutral => neutral += weight,
        }
    }

    if bullish > bearish && bullish > neutral {
        SignalDirection::Bullish
    } else if bearish > bullish && bearish > neutral {
        SignalDirection::Bearish
    } else {
        SignalDirection::Neutral
    }
}

/// Mean completeness of the inputs: half for the scores, a quarter each for
/// reasoning and drivers
fn data_quality(signals: &[&AgentSignal]) -> f64 {
    let total: f64 = signals
        .iter()
        .map(|s| {
            let mut score = 0.5;
            if !s.reasoning.trim().is_empty() {
                score += 0.25;
            }
            if !s.key_drivers.is_empty() {
                score += 0.25;
            }
            score
        })
        .sum();
    total / signals.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signal(agent: &str, p: f64, c: f64) -> AgentSignal {
        let direction = SignalDirection::from_edge(p, 0.5, 0.05);
        AgentSignal::new(agent, "market-1", p, c, direction)
    }

    fn weight_sum(fused: &FusedSignal) -> f64 {
        fused.agent_weights.values().sum()
    }

    #[test]
    fn test_empty_input_returns_none_with_one_failed_entry() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine.fuse(&[], &mut audit);

        assert!(fused.is_none());
        assert_eq!(audit.len(), 1);
        let entry = audit.last().unwrap();
        assert!(!entry.success);
        assert_eq!(entry.stage, FUSION_STAGE);
    }

    #[test]
    fn test_all_invalid_input_is_treated_as_empty() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine.fuse(&[signal("a", f64::NAN, 0.5)], &mut audit);

        assert!(fused.is_none());
        assert_eq!(audit.failures().count(), 1);
    }

    #[test]
    fn test_single_signal() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine.fuse(&[signal("solo", 0.62, 0.8)], &mut audit).unwrap();

        assert!((fused.fused_probability - 0.62).abs() < 1e-9);
        // Nobody agreed with it, so its confidence is neither rewarded nor penalized
        assert_eq!(fused.signal_alignment, 0.5);
        assert!((fused.fused_confidence - 0.8).abs() < 1e-9);
        assert!(fused.conflicting_signals.is_empty());
        assert_eq!(fused.agent_weights.len(), 1);
        assert!((weight_sum(&fused) - 1.0).abs() < 1e-6);
        assert!(audit.last().unwrap().success);
    }

    #[test]
    fn test_bounds_hold_for_extreme_inputs() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let ones = engine.fuse(&[signal("a", 1.0, 1.0), signal("b", 1.0, 1.0)], &mut audit).unwrap();
        assert!(ones.fused_probability > 0.0 && ones.fused_probability < 1.0);
        assert!(ones.fused_confidence <= 1.0);

        let zeros = engine.fuse(&[signal("a", 0.0, 0.0), signal("b", 0.0, 0.0)], &mut audit).unwrap();
        assert!(zeros.fused_probability > 0.0 && zeros.fused_probability < 1.0);
        assert!(zeros.fused_confidence >= 0.0);
    }

    #[test]
    fn test_extreme_divergence_penalizes_confidence() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine
            .fuse(&[signal("bull", 0.9, 0.95), signal("bear", 0.1, 0.95)], &mut audit)
            .unwrap();

        assert!(fused.metadata.probability_range > 0.7);
        assert!(fused.metadata.extreme_divergence);
        assert!(fused.fused_confidence < 0.5);
    }

    #[test]
    fn test_conflict_detection() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine.fuse(&[signal("a", 0.3, 0.7), signal("b", 0.7, 0.7)], &mut audit).unwrap();

        assert!(!fused.metadata.extreme_divergence);
        assert_eq!(fused.conflicting_signals.len(), 1);
        let conflict = &fused.conflicting_signals[0];
        assert!(conflict.disagreement > 0.2);
        assert_eq!(conflict.agent_a, "a");
        assert_eq!(conflict.agent_b, "b");
    }

    #[test]
    fn test_disagreement_at_threshold_is_not_a_conflict() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine.fuse(&[signal("a", 0.5, 0.7), signal("b", 0.7, 0.7)], &mut audit).unwrap();

        assert!(fused.conflicting_signals.is_empty());
    }

    #[test]
    fn test_fallback_weighting_with_malformed_table() {
        let engine = SignalFusionEngine::new(FusionConfig {
            base_weights: Some(json!([1, 2, 3])),
            ..Default::default()
        });
        let mut audit = AuditLog::new();

        let fused = engine.fuse(&[signal("a", 0.4, 0.6), signal("b", 0.6, 0.6)], &mut audit).unwrap();

        assert_eq!(fused.agent_weights.len(), 2);
        assert!((weight_sum(&fused) - 1.0).abs() < 1e-6);
        assert!(fused.metadata.used_fallback_weights);
        assert!((fused.fused_probability - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_base_weights_shift_fused_probability() {
        let engine = SignalFusionEngine::new(FusionConfig {
            base_weights: Some(json!({"heavy": 3.0, "light": 1.0})),
            ..Default::default()
        });
        let mut audit = AuditLog::new();

        let fused = engine
            .fuse(&[signal("heavy", 0.8, 0.7), signal("light", 0.4, 0.7)], &mut audit)
            .unwrap();

        // 0.75 * 0.8 + 0.25 * 0.4
        assert!((fused.fused_probability - 0.7).abs() < 1e-9);
        assert!((fused.agent_weights["heavy"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_alignment_rewards_agreement() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let agreeing = engine
            .fuse(&[signal("a", 0.60, 0.6), signal("b", 0.62, 0.6)], &mut audit)
            .unwrap();
        let disagreeing = engine
            .fuse(&[signal("a", 0.30, 0.6), signal("b", 0.85, 0.6)], &mut audit)
            .unwrap();

        assert!(agreeing.signal_alignment > disagreeing.signal_alignment);
        assert!(agreeing.fused_confidence > 0.6);
        assert!(disagreeing.fused_confidence < agreeing.fused_confidence);
    }

    #[test]
    fn test_one_producer_with_several_signals_is_not_self_aligned() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine
            .fuse(&[signal("solo", 0.6, 0.7), signal("solo", 0.61, 0.7)], &mut audit)
            .unwrap();

        assert_eq!(fused.signal_alignment, 0.5);
        assert!((fused.fused_confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_producer_names_share_weight() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();

        let fused = engine
            .fuse(
                &[signal("twin", 0.2, 0.5), signal("twin", 0.4, 0.5), signal("other", 0.6, 0.5)],
                &mut audit,
            )
            .unwrap();

        assert_eq!(fused.agent_weights.len(), 2);
        assert_eq!(fused.contributing_agents, vec!["twin".to_string(), "other".to_string()]);
        // twin's half is split across its two signals: 0.25*0.2 + 0.25*0.4 + 0.5*0.6
        assert!((fused.fused_probability - 0.45).abs() < 1e-9);
    }

    #[test]
    fn test_fuse_for_market_records_edge_and_metadata() {
        let engine = SignalFusionEngine::default();
        let mut audit = AuditLog::new();
        let context = MarketContext::new("market-1", "Will it happen?", 0.40);

        let inputs = vec![
            signal("a", 0.60, 0.7).with_reasoning("strong polling").with_drivers(["polls"]),
            signal("b", 0.50, 0.7),
        ];
        let fused = engine.fuse_for_market(&context, &inputs, &mut audit).unwrap();

        assert_eq!(fused.market_probability, Some(0.40));
        assert!((fused.edge.unwrap() - 0.15).abs() < 1e-9);
        assert_eq!(fused.metadata.direction_counts.bullish, 1);
        assert_eq!(fused.metadata.direction_counts.neutral, 1);
        assert!((fused.metadata.data_quality_score - 0.75).abs() < 1e-9);
        assert_eq!(audit.last().unwrap().market_id.as_deref(), Some("market-1"));
    }

    #[test]
    fn test_min_signal_confidence_excludes_weak_signals() {
        let engine = SignalFusionEngine::new(FusionConfig {
            min_signal_confidence: 0.5,
            ..Default::default()
        });
        let mut audit = AuditLog::new();

        let fused = engine
            .fuse(&[signal("weak", 0.9, 0.2), signal("strong", 0.4, 0.8)], &mut audit)
            .unwrap();

        assert_eq!(fused.contributing_agents, vec!["strong".to_string()]);
        assert!((fused.fused_probability - 0.4).abs() < 1e-9);
    }
}
