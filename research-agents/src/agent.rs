//! Producer contract and roster
//!
//! Every analysis producer implements the [`Agent`] trait. A [`Roster`] is the
//! ordered list of producers run each cycle; its entry names are the names
//! results are reported under.

use async_trait::async_trait;
use common::{AgentSignal, MarketContext};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Base trait that all analysis producers must implement
///
/// A producer receives a read-only view of the market and resolves to zero or
/// more signals, or fails. It must not rely on being awaited to completion:
/// the executor abandons producers that exceed their time budget.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Self-reported name, used when the producer is added without an explicit one
    fn name(&self) -> &str;

    /// Analyze one market
    async fn analyze(&self, context: Arc<MarketContext>) -> anyhow::Result<Vec<AgentSignal>>;
}

/// Adapts an async closure into an [`Agent`]
///
/// Per-producer configuration is captured by the closure when the roster is
/// built, so nothing is looked up from shared state at analysis time.
pub struct FnAgent<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnAgent<F>
where
    F: Fn(Arc<MarketContext>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<AgentSignal>>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(Arc<MarketContext>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<AgentSignal>>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, context: Arc<MarketContext>) -> anyhow::Result<Vec<AgentSignal>> {
        (self.f)(context).await
    }
}

/// One named slot in the roster
#[derive(Clone)]
pub struct RosterEntry {
    pub name: String,
    pub agent: Arc<dyn Agent>,
}

impl fmt::Debug for RosterEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RosterEntry")
            .field("name", &self.name)
            .field("agent", &self.agent.name())
            .finish()
    }
}

/// Ordered list of producers run each cycle. Duplicate names are allowed.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a producer under its self-reported name
    pub fn with_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        let name = agent.name().to_string();
        self.entries.push(RosterEntry { name, agent });
        self
    }

    /// Add a producer under an explicit name
    pub fn with_entry(mut self, name: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        self.entries.push(RosterEntry {
            name: name.into(),
            agent,
        });
        self
    }

    /// Add an async closure as a producer
    pub fn with_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<MarketContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Vec<AgentSignal>>> + Send + 'static,
    {
        let name = name.into();
        let agent = Arc::new(FnAgent::new(name.clone(), f));
        self.with_entry(name, agent)
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
