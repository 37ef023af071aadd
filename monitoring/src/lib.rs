//! Monitoring - opinion evolution tracking and the operational health surface

pub mod evolution;
pub mod health;

pub use evolution::{driver_overlap, EvolutionConfig, EvolutionTracker};
pub use health::{
    router, ComponentHealth, CycleTrigger, HealthConfig, HealthResponse, HealthServer, HealthState, HealthStatus,
    TriggerError,
};
