// Signal engine core
// Reduces the instrument universe to delivered signals:
// screening -> pattern matching -> outcome validation -> message translation

pub mod config;
pub mod patterns;
pub mod pipeline;
pub mod screening;
pub mod storage;
pub mod translator;
pub mod validation;

pub use config::EngineConfig;
pub use patterns::{
    MatchReport, MatcherConfig, MeanReversionStrategy, MomentumStrategy, PatternMatcher,
    ScoringStrategy, VolumeSpikeStrategy,
};
pub use pipeline::{PipelineConfig, PipelineReport, RunOptions, SignalPipeline};
pub use screening::{ScreenReport, Screener, ScreeningConfig};
pub use storage::{
    InMemoryOutcomeStore, InMemorySignalStore, OutcomeStore, SignalStore, StorageStats,
};
pub use translator::MessageTable;
pub use validation::{OutcomeValidator, ValidatorConfig};
