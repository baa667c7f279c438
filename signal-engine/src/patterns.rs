// Pattern Matcher
// Scores shortlisted instruments against the strategy library, weighted by
// each strategy's current reliability weight

use chrono::Utc;
use common::{
    Instrument, PipelineStage, PriceSeries, ScoredCandidate, SkipReason, StrategyContribution,
    WeightTable,
};
use market_data::CachedMarketData;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod mean_reversion;
pub mod momentum;
pub mod volume_spike;

pub use mean_reversion::MeanReversionStrategy;
pub use momentum::MomentumStrategy;
pub use volume_spike::VolumeSpikeStrategy;

/// The one capability a scoring strategy provides: a similarity score in
/// [0, 100] for an instrument's recent feature sequence. New strategies are
/// added by implementing this trait, never by branching on type.
pub trait ScoringStrategy: Send + Sync {
    fn id(&self) -> &str;
    fn score(&self, series: &PriceSeries) -> anyhow::Result<f64>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Number of candidates to keep after ranking
    pub top_n: usize,
    /// Trailing window of history to score against, in days
    pub window_days: u32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            top_n: 20,
            window_days: 90,
        }
    }
}

/// Ranked candidates plus instruments dropped for data unavailability
#[derive(Debug, Clone)]
pub struct MatchReport {
    pub candidates: Vec<ScoredCandidate>,
    pub skipped: Vec<(String, SkipReason)>,
}

pub struct PatternMatcher {
    strategies: Vec<Box<dyn ScoringStrategy>>,
    provider: Arc<CachedMarketData>,
    config: MatcherConfig,
}

impl PatternMatcher {
    pub fn new(config: MatcherConfig, provider: Arc<CachedMarketData>) -> Self {
        Self {
            strategies: Vec::new(),
            provider,
            config,
        }
    }

    /// The default strategy library recovered from historically profitable
    /// patterns: momentum continuation, mean reversion, volume spikes.
    pub fn with_default_strategies(config: MatcherConfig, provider: Arc<CachedMarketData>) -> Self {
        Self::new(config, provider)
            .add_strategy(Box::new(MomentumStrategy::default()))
            .add_strategy(Box::new(MeanReversionStrategy::default()))
            .add_strategy(Box::new(VolumeSpikeStrategy::default()))
    }

    pub fn add_strategy(mut self, strategy: Box<dyn ScoringStrategy>) -> Self {
        info!(strategy = strategy.id(), "registering scoring strategy");
        self.strategies.push(strategy);
        self
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.id().to_string()).collect()
    }

    /// Rank the shortlist by weighted aggregate score and keep the top N.
    ///
    /// Takes one weight snapshot for the whole run; retired strategies are
    /// excluded before any scoring happens. Ties break toward the candidate
    /// whose single strongest contribution is higher, then by symbol.
    pub async fn rank(&self, shortlist: &[Instrument], weights: &WeightTable) -> MatchReport {
        let snapshot = weights.active_snapshot().await;
        let mut candidates = Vec::new();
        let mut skipped = Vec::new();

        for instrument in shortlist {
            let series = match self
                .provider
                .price_series(&instrument.symbol, self.config.window_days)
                .await
            {
                Ok(series) => series,
                Err(e) => {
                    warn!(symbol = %instrument.symbol, error = %e, "matcher fetch failed, dropping");
                    skipped.push((instrument.symbol.clone(), SkipReason::FetchFailed));
                    continue;
                }
            };

            let mut contributions = Vec::new();
            for strategy in &self.strategies {
                let Some(weight) = snapshot.get(strategy.id()).copied() else {
                    continue; // retired or unregistered
                };
                match strategy.score(&series) {
                    Ok(score) => contributions.push(StrategyContribution {
                        strategy_id: strategy.id().to_string(),
                        score: score.clamp(0.0, 100.0),
                        weight,
                    }),
                    Err(e) => {
                        warn!(
                            symbol = %instrument.symbol,
                            strategy = strategy.id(),
                            error = %e,
                            "strategy scoring failed"
                        );
                    }
                }
            }

            if contributions.is_empty() {
                skipped.push((instrument.symbol.clone(), SkipReason::NoStrategyScores));
                continue;
            }

            let score = ScoredCandidate::aggregate(&contributions);
            debug!(symbol = %instrument.symbol, score, "candidate scored");
            candidates.push(ScoredCandidate {
                id: Uuid::new_v4(),
                symbol: instrument.symbol.clone(),
                score,
                stage: PipelineStage::PatternMatching,
                contributions,
                scored_at: Utc::now(),
            });
        }

        candidates.sort_by(compare_candidates);
        candidates.truncate(self.config.top_n);
        info!(ranked = candidates.len(), "pattern matching complete");
        MatchReport { candidates, skipped }
    }
}

/// Descending by aggregate, then by strongest single contribution,
/// then by symbol for determinism
pub(crate) fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            b.top_contribution()
                .partial_cmp(&a.top_contribution())
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.symbol.cmp(&b.symbol))
}
