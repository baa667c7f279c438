// Shared types for the signal radar workspace
// Data model, error taxonomy, and the strategy weight table

pub mod error;
pub mod types;
pub mod weights;

pub use error::EngineError;
pub use types::{
    ExperimentAssignment, FeatureBundle, Instrument, MarketVenue, MessageBucket, OutcomeRecord,
    PipelineStage, PricePoint, PriceSeries, PriceSnapshot, Recommendation, ScoredCandidate,
    Signal, SignalTone, SkipReason, StrategyContribution,
};
pub use weights::{AdjustReason, StrategyWeight, WeightChange, WeightTable};
