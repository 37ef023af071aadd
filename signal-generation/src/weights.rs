// Producer weight resolution
// Turns a raw, possibly malformed base-weight table into normalized weights

use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Normalized weights for the distinct producers of one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWeights {
    /// One entry per distinct producer name, summing to 1.0
    pub weights: BTreeMap<String, f64>,
    /// True if configured weights could not be used for any producer
    pub used_fallback: bool,
}

impl ResolvedWeights {
    pub fn get(&self, agent_name: &str) -> f64 {
        self.weights.get(agent_name).copied().unwrap_or(0.0)
    }
}

/// Resolve per-producer weights from a base-weight table.
///
/// The table is expected to be a JSON object of `name -> non-negative number`.
/// A missing or non-object table yields equal weights for everyone. Entries
/// that are not finite non-negative numbers are ignored, and producers without
/// a usable entry receive the mean of the configured weights in play, so they
/// are treated as equal peers. Never fails.
pub fn resolve_weights(table: Option<&Value>, agent_names: &[&str]) -> ResolvedWeights {
    let mut distinct: Vec<&str> = Vec::new();
    for name in agent_names {
        if !distinct.contains(name) {
            distinct.push(name);
        }
    }

    if distinct.is_empty() {
        return ResolvedWeights {
            weights: BTreeMap::new(),
            used_fallback: false,
        };
    }

    let configured = match table {
        None | Some(Value::Null) => {
            warn!("No base weight table configured, using equal weights");
            return equal_weights(&distinct);
        }
        Some(Value::Object(map)) => map,
        Some(other) => {
            warn!("Malformed base weight table ({}), using equal weights", type_name(other));
            return equal_weights(&distinct);
        }
    };

    let mut known: Vec<(&str, f64)> = Vec::new();
    for name in &distinct {
        match configured.get(*name) {
            Some(value) => match value.as_f64() {
                Some(w) if w.is_finite() && w >= 0.0 => known.push((*name, w)),
                _ => warn!("Ignoring invalid base weight for {}: {}", name, value),
            },
            None => debug!("No base weight for {}, treating as equal peer", name),
        }
    }

    if known.is_empty() {
        return equal_weights(&distinct);
    }

    let peer_weight = known.iter().map(|(_, w)| w).sum::<f64>() / known.len() as f64;
    let raw: Vec<(&str, f64)> = distinct
        .iter()
        .map(|name| {
            let weight = known
                .iter()
                .find(|(known_name, _)| known_name == name)
                .map(|(_, w)| *w)
                .unwrap_or(peer_weight);
            (*name, weight)
        })
        .collect();

    let total: f64 = raw.iter().map(|(_, w)| w).sum();
    if !total.is_finite() || total <= 0.0 {
        warn!("Base weights sum to {}, using equal weights", total);
        return equal_weights(&distinct);
    }

    ResolvedWeights {
        weights: raw
            .into_iter()
            .map(|(name, w)| (name.to_string(), w / total))
            .collect(),
        used_fallback: false,
    }
}

fn equal_weights(names: &[&str]) -> ResolvedWeights {
    let weight = 1.0 / names.len() as f64;
    ResolvedWeights {
        weights: names.iter().map(|name| (name.to_string(), weight)).collect(),
        used_fallback: true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
