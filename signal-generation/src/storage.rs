// Signal Storage Interface
// Persistence sink for cycle outputs and the historical feed for evolution tracking

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{AgentSignal, AuditEntry, EvolutionEvent, FusedSignal};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Trait for storage backends
#[async_trait::async_trait]
pub trait SignalStorage: Send + Sync {
    /// Persist one producer signal
    async fn store_signal(&self, signal: &AgentSignal) -> Result<()>;

    /// Persist a cycle's fused signal
    async fn store_fused(&self, fused: &FusedSignal) -> Result<()>;

    /// Append audit entries, keeping their order
    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()>;

    /// Append evolution events, keeping their order
    async fn append_evolution(&self, events: &[EvolutionEvent]) -> Result<()>;

    /// Previously persisted signals of one producer for one market, most recent first
    async fn history(&self, agent_name: &str, market_id: &str, limit: usize) -> Result<Vec<AgentSignal>>;

    /// Most recent fused signal for a market
    async fn latest_fused(&self, market_id: &str) -> Result<Option<FusedSignal>>;

    /// Audit entries recorded for a market, in creation order
    async fn audit_trail(&self, market_id: &str) -> Result<Vec<AuditEntry>>;

    /// Evolution events recorded for a market, in creation order
    async fn evolution_events(&self, market_id: &str) -> Result<Vec<EvolutionEvent>>;

    /// Get storage statistics
    async fn stats(&self) -> Result<StorageStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_signals: usize,
    pub total_fused: usize,
    pub total_audit_entries: usize,
    pub total_evolution_events: usize,
    pub markets: usize,
    pub oldest_signal: Option<DateTime<Utc>>,
    pub newest_signal: Option<DateTime<Utc>>,
}

/// Retention limits of [`InMemoryStorage`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Records kept per key: per producer and market for signals, per market
    /// for fused signals, audit entries and evolution events. Oldest go first.
    pub retention: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { retention: 1_000 }
    }
}

#[derive(Default)]
struct Tables {
    // (agent_name, market_id) -> signals ordered by created_at
    signals: HashMap<(String, String), VecDeque<AgentSignal>>,
    fused: HashMap<String, VecDeque<FusedSignal>>,
    // Entries without a market are kept under None
    audit: HashMap<Option<String>, VecDeque<AuditEntry>>,
    evolution: HashMap<String, VecDeque<EvolutionEvent>>,
}

/// Append and drop the oldest records past `retention`
fn push_capped<T>(records: &mut VecDeque<T>, record: T, retention: usize) {
    records.push_back(record);
    while records.len() > retention {
        records.pop_front();
    }
}

/// In-memory storage (for testing and development)
///
/// Each key keeps at most `retention` records, so a long-running process
/// forgets old history instead of growing without limit.
pub struct InMemoryStorage {
    tables: tokio::sync::RwLock<Tables>,
    retention: usize,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_config(StorageConfig::default())
    }

    pub fn with_config(config: StorageConfig) -> Self {
        Self {
            tables: tokio::sync::RwLock::new(Tables::default()),
            retention: config.retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SignalStorage for InMemoryStorage {
    async fn store_signal(&self, signal: &AgentSignal) -> Result<()> {
        let mut tables = self.tables.write().await;
        let series = tables
            .signals
            .entry((signal.agent_name.clone(), signal.market_id.clone()))
            .or_default();
        // Sorted insert; equal timestamps stay in insertion order
        let at = series.partition_point(|s| s.created_at <= signal.created_at);
        series.insert(at, signal.clone());
        while series.len() > self.retention {
            series.pop_front();
        }
        Ok(())
    }

    async fn store_fused(&self, fused: &FusedSignal) -> Result<()> {
        let mut tables = self.tables.write().await;
        let series = tables.fused.entry(fused.market_id.clone()).or_default();
        push_capped(series, fused.clone(), self.retention);
        Ok(())
    }

    async fn append_audit(&self, entries: &[AuditEntry]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for entry in entries {
            let series = tables.audit.entry(entry.market_id.clone()).or_default();
            push_capped(series, entry.clone(), self.retention);
        }
        Ok(())
    }

    async fn append_evolution(&self, events: &[EvolutionEvent]) -> Result<()> {
        let mut tables = self.tables.write().await;
        for event in events {
            let series = tables.evolution.entry(event.market_id.clone()).or_default();
            push_capped(series, event.clone(), self.retention);
        }
        Ok(())
    }

    async fn history(&self, agent_name: &str, market_id: &str, limit: usize) -> Result<Vec<AgentSignal>> {
        let tables = self.tables.read().await;
        let key = (agent_name.to_string(), market_id.to_string());
        Ok(tables
            .signals
            .get(&key)
            .map(|series| series.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn latest_fused(&self, market_id: &str) -> Result<Option<FusedSignal>> {
        let tables = self.tables.read().await;
        Ok(tables.fused.get(market_id).and_then(|v| v.back().cloned()))
    }

    async fn audit_trail(&self, market_id: &str) -> Result<Vec<AuditEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .audit
            .get(&Some(market_id.to_string()))
            .map(|series| series.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn evolution_events(&self, market_id: &str) -> Result<Vec<EvolutionEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .evolution
            .get(market_id)
            .map(|series| series.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let tables = self.tables.read().await;

        let mut oldest_signal: Option<DateTime<Utc>> = None;
        let mut newest_signal: Option<DateTime<Utc>> = None;
        let mut markets: HashSet<&str> = HashSet::new();

        for ((_, market_id), signals) in &tables.signals {
            markets.insert(market_id.as_str());
            if let Some(first) = signals.front() {
                if oldest_signal.map_or(true, |t| first.created_at < t) {
                    oldest_signal = Some(first.created_at);
                }
            }
            if let Some(last) = signals.back() {
                if newest_signal.map_or(true, |t| last.created_at > t) {
                    newest_signal = Some(last.created_at);
                }
            }
        }
        markets.extend(tables.fused.keys().map(String::as_str));

        Ok(StorageStats {
            total_signals: tables.signals.values().map(VecDeque::len).sum(),
            total_fused: tables.fused.values().map(VecDeque::len).sum(),
            total_audit_entries: tables.audit.values().map(VecDeque::len).sum(),
            total_evolution_events: tables.evolution.values().map(VecDeque::len).sum(),
            markets: markets.len(),
            oldest_signal,
            newest_signal,
        })
    }
}
