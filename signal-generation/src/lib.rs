// Signal Generation Framework
// Fuses producer opinions into one estimate and persists cycle outputs

pub mod fusion;
pub mod storage;
pub mod validators;
pub mod weights;

pub use fusion::{FusionConfig, SignalFusionEngine, FUSION_STAGE};
pub use storage::{InMemoryStorage, SignalStorage, StorageConfig, StorageStats};
pub use validators::{CompositeValidator, MinConfidenceConfig, MinConfidenceValidator, RangeValidator, SignalValidator};
pub use weights::{resolve_weights, ResolvedWeights};
