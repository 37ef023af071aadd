//! Shared value objects for the market analysis workspace.
//!
//! Every type here is a plain value: created once per cycle stage and never
//! mutated afterwards. The only accumulating structure is [`AuditLog`], which
//! is append-only.

pub mod audit;
pub mod evolution;
pub mod execution;
pub mod fusion;
pub mod market;
pub mod signal;

pub use audit::{AuditEntry, AuditLog};
pub use evolution::{EvolutionEvent, EvolutionKind};
pub use execution::{ExecutionResult, ExecutionSummary};
pub use fusion::{DirectionCounts, FusedSignal, FusionMetadata, SignalConflict};
pub use market::{MarketContext, NewsHeadline};
pub use signal::{AgentSignal, SignalDirection};

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
