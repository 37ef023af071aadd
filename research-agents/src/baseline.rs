//! Baseline Agent - reports the market-implied probability as its own opinion
//!
//! Anchors the fused estimate to the current market price so that a single
//! opinionated producer cannot move it unopposed.

use crate::agent::Agent;
use async_trait::async_trait;
use common::{AgentSignal, MarketContext, SignalDirection};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineAgentConfig {
    pub enabled: bool,
    pub name: String,
    /// Confidence attached to the market price
    pub confidence: f64,
}

impl Default for BaselineAgentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            name: "baseline".to_string(),
            confidence: 0.5,
        }
    }
}

pub struct BaselineAgent {
    config: BaselineAgentConfig,
}

impl BaselineAgent {
    pub fn new(config: BaselineAgentConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Agent for BaselineAgent {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn analyze(&self, context: Arc<MarketContext>) -> anyhow::Result<Vec<AgentSignal>> {
        let signal = AgentSignal::new(
            self.config.name.clone(),
            context.market_id.clone(),
            context.baseline_probability,
            self.config.confidence,
            SignalDirection::Neutral,
        )
        .with_drivers(["market price"])
        .with_reasoning(format!(
            "Market currently prices YES at {:.1}%",
            context.baseline_probability * 100.0
        ));

        Ok(vec![signal])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_baseline_echoes_market_price() {
        let agent = BaselineAgent::new(BaselineAgentConfig::default());
        let ctx = Arc::new(MarketContext::new("m1", "Will the bill pass?", 0.37));

        let signals = agent.analyze(ctx).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].probability, 0.37);
        assert_eq!(signals[0].confidence, 0.5);
        assert_eq!(signals[0].direction, SignalDirection::Neutral);
        assert_eq!(signals[0].key_drivers, vec!["market price".to_string()]);
    }
}
