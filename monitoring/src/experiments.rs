//! Experiment manager
//!
//! Runs several strategy-parameter bundles concurrently, assigns each user to
//! one variant (sticky, round-robin), and aggregates per-variant realized
//! profit. The manager surfaces a ranking; promoting a winner is always an
//! explicit, human-triggered action, never automatic.

use chrono::{DateTime, Utc};
use common::{EngineError, ExperimentAssignment, Instrument};
use serde::{Deserialize, Serialize};
use signal_engine::{PipelineReport, RunOptions, SignalPipeline};
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One strategy-parameter bundle under live comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantParams {
    pub name: String,
    /// Minimum pipeline score a signal needs before this variant delivers it
    pub min_score: f64,
    /// Delivered candidate count for this variant
    pub final_size: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub variants: Vec<VariantParams>,
    /// Both leading variants need at least this many outcomes before the
    /// report runs a significance test
    pub min_sample_size: usize,
    /// Significance level for declaring a leader
    pub significance_level: f64,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            variants: vec![
                VariantParams {
                    name: "conservative".into(),
                    min_score: 85.0,
                    final_size: 3,
                    description: "high-confidence signals only".into(),
                },
                VariantParams {
                    name: "balanced".into(),
                    min_score: 75.0,
                    final_size: 5,
                    description: "default risk/reward balance".into(),
                },
                VariantParams {
                    name: "aggressive".into(),
                    min_score: 65.0,
                    final_size: 8,
                    description: "wider net, higher variance".into(),
                },
            ],
            min_sample_size: 10,
            significance_level: 0.05,
        }
    }
}

/// Aggregated performance of one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantStats {
    pub name: String,
    pub users: usize,
    pub outcomes: usize,
    pub total_profit: f64,
    pub avg_profit: f64,
}

/// Read-only ranking of variants by average profit, best first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentReport {
    pub ranking: Vec<VariantStats>,
    /// Welch t-test p-value between the top two variants, when both have
    /// enough samples
    pub p_value: Option<f64>,
    pub leader_is_significant: Option<bool>,
    pub generated_at: DateTime<Utc>,
}

struct ExperimentState {
    assignments: HashMap<String, ExperimentAssignment>,
    /// Raw profit deltas per variant, kept for the significance test
    outcomes: HashMap<String, Vec<f64>>,
    rotation: usize,
    default_variant: String,
}

pub struct ExperimentManager {
    config: ExperimentConfig,
    state: RwLock<ExperimentState>,
}

impl ExperimentManager {
    pub fn new(config: ExperimentConfig) -> Result<Self, EngineError> {
        if config.variants.is_empty() {
            return Err(EngineError::InvalidConfig(
                "experiment needs at least one variant".into(),
            ));
        }
        let outcomes = config
            .variants
            .iter()
            .map(|v| (v.name.clone(), Vec::new()))
            .collect();
        let default_variant = config.variants[0].name.clone();
        Ok(Self {
            config,
            state: RwLock::new(ExperimentState {
                assignments: HashMap::new(),
                outcomes,
                rotation: 0,
                default_variant,
            }),
        })
    }

    pub fn params_for(&self, variant: &str) -> Option<&VariantParams> {
        self.config.variants.iter().find(|v| v.name == variant)
    }

    pub async fn default_variant(&self) -> String {
        self.state.read().await.default_variant.clone()
    }

    /// Sticky assignment: the first call picks the next variant in rotation,
    /// every later call returns the recorded assignment unchanged.
    pub async fn assign(&self, user_id: &str) -> ExperimentAssignment {
        let mut state = self.state.write().await;
        if let Some(existing) = state.assignments.get(user_id) {
            return existing.clone();
        }
        let variant = self.config.variants[state.rotation % self.config.variants.len()]
            .name
            .clone();
        state.rotation += 1;
        let assignment = ExperimentAssignment {
            user_id: user_id.to_string(),
            variant,
            assigned_at: Utc::now(),
        };
        debug!(user = user_id, variant = %assignment.variant, "assigned to variant");
        state
            .assignments
            .insert(user_id.to_string(), assignment.clone());
        assignment
    }

    /// Pin a user to a specific variant. Rejected if the user already holds a
    /// different one; the original assignment always wins.
    pub async fn force_assign(
        &self,
        user_id: &str,
        variant: &str,
    ) -> Result<ExperimentAssignment, EngineError> {
        if self.params_for(variant).is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "unknown variant `{variant}`"
            )));
        }
        let mut state = self.state.write().await;
        if let Some(existing) = state.assignments.get(user_id) {
            if existing.variant != variant {
                return Err(EngineError::StaleAssignmentConflict {
                    user_id: user_id.to_string(),
                    held: existing.variant.clone(),
                    requested: variant.to_string(),
                });
            }
            return Ok(existing.clone());
        }
        let assignment = ExperimentAssignment {
            user_id: user_id.to_string(),
            variant: variant.to_string(),
            assigned_at: Utc::now(),
        };
        state
            .assignments
            .insert(user_id.to_string(), assignment.clone());
        Ok(assignment)
    }

    /// Run one pipeline pass for a user under their assigned variant.
    /// The variant's `min_score` and `final_size` shape the run, and every
    /// issued signal and outcome record carries the variant tag, so realized
    /// performance can later be fed back through `record_outcome`.
    pub async fn run_for_user(
        &self,
        user_id: &str,
        pipeline: &SignalPipeline,
        universe: &[Instrument],
    ) -> anyhow::Result<PipelineReport> {
        let assignment = self.assign(user_id).await;
        let params = self.params_for(&assignment.variant).ok_or_else(|| {
            anyhow::anyhow!("assignment to unknown variant `{}`", assignment.variant)
        })?;
        let options = RunOptions {
            variant: Some(assignment.variant.clone()),
            min_score: Some(params.min_score),
            final_size: Some(params.final_size),
        };
        pipeline.run_with(universe, &options).await
    }

    /// Record a realized profit delta against a variant
    pub async fn record_outcome(&self, variant: &str, profit_delta: f64) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let deltas = state
            .outcomes
            .get_mut(variant)
            .ok_or_else(|| anyhow::anyhow!("unknown variant `{variant}`"))?;
        deltas.push(profit_delta);
        Ok(())
    }

    /// Variants ranked by average profit, best first. Read-only; nothing in
    /// the report mutates experiment state.
    pub async fn report(&self) -> ExperimentReport {
        let state = self.state.read().await;
        let mut ranking: Vec<VariantStats> = self
            .config
            .variants
            .iter()
            .map(|v| {
                let deltas = state.outcomes.get(&v.name).map(Vec::as_slice).unwrap_or(&[]);
                let users = state
                    .assignments
                    .values()
                    .filter(|a| a.variant == v.name)
                    .count();
                let total: f64 = deltas.iter().sum();
                VariantStats {
                    name: v.name.clone(),
                    users,
                    outcomes: deltas.len(),
                    total_profit: total,
                    avg_profit: if deltas.is_empty() {
                        0.0
                    } else {
                        total / deltas.len() as f64
                    },
                }
            })
            .collect();
        // Variants with no recorded outcome rank last; an empty ledger is
        // not a better average than a losing one.
        ranking.sort_by(|a, b| {
            (b.outcomes > 0).cmp(&(a.outcomes > 0)).then_with(|| {
                b.avg_profit
                    .partial_cmp(&a.avg_profit)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        let (p_value, leader_is_significant) = if ranking.len() >= 2
            && ranking[0].outcomes >= self.config.min_sample_size
            && ranking[1].outcomes >= self.config.min_sample_size
        {
            let a = state.outcomes.get(&ranking[0].name).map(Vec::as_slice).unwrap_or(&[]);
            let b = state.outcomes.get(&ranking[1].name).map(Vec::as_slice).unwrap_or(&[]);
            match welch_p_value(a, b) {
                Some(p) => (Some(p), Some(p < self.config.significance_level)),
                None => (None, None),
            }
        } else {
            (None, None)
        };

        ExperimentReport {
            ranking,
            p_value,
            leader_is_significant,
            generated_at: Utc::now(),
        }
    }

    /// Explicit, human-triggered promotion of a variant to the default.
    /// The manager never switches traffic on its own.
    pub async fn promote(&self, variant: &str) -> Result<(), EngineError> {
        if self.params_for(variant).is_none() {
            return Err(EngineError::InvalidConfig(format!(
                "unknown variant `{variant}`"
            )));
        }
        let mut state = self.state.write().await;
        info!(
            from = %state.default_variant,
            to = variant,
            "default variant promoted"
        );
        state.default_variant = variant.to_string();
        Ok(())
    }
}

/// Two-sided Welch t-test p-value. None when a variance or the degrees of
/// freedom degenerate.
fn welch_p_value(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let (mean_a, var_a) = mean_and_variance(a);
    let (mean_b, var_b) = mean_and_variance(b);
    let n_a = a.len() as f64;
    let n_b = b.len() as f64;

    let se_sq = var_a / n_a + var_b / n_b;
    if se_sq <= 0.0 {
        return None;
    }
    let t = (mean_a - mean_b) / se_sq.sqrt();

    // Welch-Satterthwaite degrees of freedom
    let df = se_sq.powi(2)
        / ((var_a / n_a).powi(2) / (n_a - 1.0) + (var_b / n_b).powi(2) / (n_b - 1.0));
    if !df.is_finite() || df <= 0.0 {
        return None;
    }

    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    Some(2.0 * (1.0 - dist.cdf(t.abs())))
}

fn mean_and_variance(samples: &[f64]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{MarketVenue, WeightTable};
    use market_data::{
        CacheConfig, CachedMarketData, HeuristicScoringService, InMemoryStore,
        SyntheticMarketData,
    };
    use signal_engine::{EngineConfig, InMemoryOutcomeStore, InMemorySignalStore};
    use std::sync::Arc;

    fn manager() -> ExperimentManager {
        ExperimentManager::new(ExperimentConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn assignment_is_sticky() {
        let manager = manager();
        let first = manager.assign("user-1").await;
        let second = manager.assign("user-1").await;
        assert_eq!(first.variant, second.variant);
        assert_eq!(first.assigned_at, second.assigned_at);
    }

    #[tokio::test]
    async fn rotation_spreads_users_evenly() {
        let manager = manager();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for i in 0..9 {
            let assignment = manager.assign(&format!("user-{i}")).await;
            *counts.entry(assignment.variant).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        assert!(counts.values().all(|&c| c == 3));
    }

    #[tokio::test]
    async fn reassignment_to_a_different_variant_is_rejected() {
        let manager = manager();
        let held = manager.assign("user-1").await.variant;
        let other = if held == "balanced" { "aggressive" } else { "balanced" };

        let result = manager.force_assign("user-1", other).await;
        assert!(matches!(
            result,
            Err(EngineError::StaleAssignmentConflict { .. })
        ));
        // Same variant is a no-op, not a conflict
        assert!(manager.force_assign("user-1", &held).await.is_ok());
        assert_eq!(manager.assign("user-1").await.variant, held);
    }

    #[tokio::test]
    async fn report_ranks_by_average_profit() {
        let manager = manager();
        for _ in 0..5 {
            manager.record_outcome("conservative", 0.01).await.unwrap();
            manager.record_outcome("balanced", 0.03).await.unwrap();
            manager.record_outcome("aggressive", -0.02).await.unwrap();
        }
        let report = manager.report().await;
        let names: Vec<&str> = report.ranking.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["balanced", "conservative", "aggressive"]);
        assert!(report.p_value.is_none()); // below min sample size
    }

    #[tokio::test]
    async fn unsampled_variants_rank_behind_sampled_ones() {
        let manager = manager();
        for _ in 0..12 {
            manager.record_outcome("conservative", -0.02).await.unwrap();
        }
        let report = manager.report().await;

        // A losing average still beats variants with no data at all
        assert_eq!(report.ranking[0].name, "conservative");
        assert!(report.ranking[1..].iter().all(|v| v.outcomes == 0));
        // Only one sampled variant, so no significance test runs
        assert!(report.p_value.is_none());
    }

    #[tokio::test]
    async fn variant_parameters_shape_the_user_run() {
        let config = ExperimentConfig {
            variants: vec![
                VariantParams {
                    name: "wide".into(),
                    min_score: 0.0,
                    final_size: 2,
                    description: "everything through, two delivered".into(),
                },
                VariantParams {
                    name: "blocked".into(),
                    min_score: 100.0,
                    final_size: 5,
                    description: "nothing can pass".into(),
                },
            ],
            min_sample_size: 10,
            significance_level: 0.05,
        };
        let manager = ExperimentManager::new(config).unwrap();

        let mut source = SyntheticMarketData::new(90);
        let universe: Vec<Instrument> = (0..8)
            .map(|i| {
                let symbol = format!("SYM{i}");
                source.set_drift(&symbol, 0.02);
                Instrument::new(symbol, MarketVenue::Nasdaq)
            })
            .collect();
        let provider = Arc::new(CachedMarketData::new(
            Arc::new(source),
            Arc::new(HeuristicScoringService),
            Arc::new(InMemoryStore::new()),
            CacheConfig::default(),
        ));
        let mut engine_config = EngineConfig::default();
        engine_config.pipeline.assistant_blend = 0.0;
        let pipeline = SignalPipeline::new(
            engine_config,
            provider,
            Arc::new(WeightTable::new(Vec::<String>::new())),
            Arc::new(InMemorySignalStore::new()),
            Arc::new(InMemoryOutcomeStore::new()),
        )
        .unwrap();

        let wide = manager
            .run_for_user("user-1", &pipeline, &universe)
            .await
            .unwrap();
        assert!(!wide.signals.is_empty());
        assert!(wide.signals.len() <= 2);
        assert!(wide
            .signals
            .iter()
            .all(|s| s.variant.as_deref() == Some("wide")));

        // Rotation puts the second user on the blocked variant
        let blocked = manager
            .run_for_user("user-2", &pipeline, &universe)
            .await
            .unwrap();
        assert!(blocked.signals.is_empty());
    }

    #[tokio::test]
    async fn significance_test_runs_with_enough_samples() {
        let manager = manager();
        // Clearly separated distributions with a little spread
        for i in 0..12 {
            let jitter = (i % 3) as f64 * 0.001;
            manager
                .record_outcome("balanced", 0.05 + jitter)
                .await
                .unwrap();
            manager
                .record_outcome("conservative", -0.04 + jitter)
                .await
                .unwrap();
        }
        let report = manager.report().await;
        assert_eq!(report.ranking[0].name, "balanced");
        let p = report.p_value.expect("expected a p-value");
        assert!(p < 0.05, "p-value {p} should be significant");
        assert_eq!(report.leader_is_significant, Some(true));
    }

    #[tokio::test]
    async fn promotion_is_explicit() {
        let manager = manager();
        for _ in 0..20 {
            manager.record_outcome("aggressive", 0.10).await.unwrap();
            manager.record_outcome("balanced", 0.0).await.unwrap();
        }
        // A winning report alone changes nothing
        let report = manager.report().await;
        assert_eq!(report.ranking[0].name, "aggressive");
        assert_eq!(manager.default_variant().await, "conservative");

        manager.promote("aggressive").await.unwrap();
        assert_eq!(manager.default_variant().await, "aggressive");
        assert!(manager.promote("unknown").await.is_err());
    }
}
