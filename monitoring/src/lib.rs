// Monitoring layer
// Strategy experiments and the daily accuracy feedback loop

pub mod experiments;
pub mod feedback;

pub use experiments::{
    ExperimentConfig, ExperimentManager, ExperimentReport, VariantParams, VariantStats,
};
pub use feedback::{CyclePhase, CycleSummary, FeedbackConfig, FeedbackLoop};
