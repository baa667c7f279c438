// Signal pipeline
// Orchestrates one run: screen -> rank -> validate -> translate -> issue.
// Partial data unavailability is annotated on the report, never a run failure.

use crate::config::EngineConfig;
use crate::patterns::PatternMatcher;
use crate::screening::Screener;
use crate::storage::{OutcomeStore, SignalStore};
use crate::translator::MessageTable;
use crate::validation::OutcomeValidator;
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use common::{
    EngineError, FeatureBundle, Instrument, OutcomeRecord, Signal, SkipReason, WeightTable,
};
use market_data::CachedMarketData;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub enabled: bool,
    /// Issued signals expire this many hours after issue
    pub signal_expiry_hours: i64,
    /// Blend weight of the assistant's qualitative score into the final
    /// aggregate; 0 disables the assistant entirely
    pub assistant_blend: f64,
    /// Minimum final score to issue a signal (a variant parameter)
    pub min_score: f64,
    /// Trailing window used when building assistant feature bundles
    pub window_days: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            signal_expiry_hours: 24,
            assistant_blend: 0.25,
            min_score: 0.0,
            window_days: 90,
        }
    }
}

/// Per-run overrides carried by an experiment variant. Issued signals and
/// outcome records are tagged with the variant name so realized performance
/// can be attributed back to it.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub variant: Option<String>,
    pub min_score: Option<f64>,
    pub final_size: Option<usize>,
}

/// Outcome of one pipeline run. Candidate counts shrink stage over stage;
/// `skipped` carries every instrument dropped for data unavailability.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub signals: Vec<Signal>,
    pub universe_size: usize,
    pub shortlist_size: usize,
    pub ranked_size: usize,
    pub final_size: usize,
    pub skipped: Vec<(String, SkipReason)>,
}

impl PipelineReport {
    pub fn partial_failures(&self) -> usize {
        self.skipped
            .iter()
            .filter(|(_, reason)| *reason == SkipReason::FetchFailed)
            .count()
    }
}

/// The full reduction pipeline. Construction validates the message table;
/// a misconfigured table blocks activation rather than failing requests.
pub struct SignalPipeline {
    screener: Screener,
    matcher: PatternMatcher,
    validator: OutcomeValidator,
    table: MessageTable,
    provider: Arc<CachedMarketData>,
    weights: Arc<WeightTable>,
    signal_store: Arc<dyn SignalStore>,
    outcome_store: Arc<dyn OutcomeStore>,
    config: PipelineConfig,
}

impl SignalPipeline {
    pub fn new(
        config: EngineConfig,
        provider: Arc<CachedMarketData>,
        weights: Arc<WeightTable>,
        signal_store: Arc<dyn SignalStore>,
        outcome_store: Arc<dyn OutcomeStore>,
    ) -> Result<Self, EngineError> {
        config.translator.validate()?;
        let matcher =
            PatternMatcher::with_default_strategies(config.matcher, provider.clone());
        Ok(Self {
            screener: Screener::new(config.screening, provider.clone()),
            validator: OutcomeValidator::new(config.validator, provider.clone()),
            matcher,
            table: config.translator,
            provider,
            weights,
            signal_store,
            outcome_store,
            config: config.pipeline,
        })
    }

    /// Swap in a custom strategy library (replaces the default one)
    pub fn with_matcher(mut self, matcher: PatternMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn strategy_ids(&self) -> Vec<String> {
        self.matcher.strategy_ids()
    }

    /// One full reduction pass over the universe with default parameters
    pub async fn run(&self, universe: &[Instrument]) -> Result<PipelineReport> {
        self.run_with(universe, &RunOptions::default()).await
    }

    /// One full reduction pass with per-variant overrides applied
    pub async fn run_with(
        &self,
        universe: &[Instrument],
        options: &RunOptions,
    ) -> Result<PipelineReport> {
        if !self.config.enabled {
            debug!("pipeline disabled, skipping run");
            return Ok(PipelineReport {
                signals: Vec::new(),
                universe_size: universe.len(),
                shortlist_size: 0,
                ranked_size: 0,
                final_size: 0,
                skipped: Vec::new(),
            });
        }

        for id in self.matcher.strategy_ids() {
            self.weights.register(&id).await;
        }

        let screen = self.screener.screen(universe).await;
        let mut skipped = screen.skipped;

        let matched = self.matcher.rank(&screen.shortlist, &self.weights).await;
        skipped.extend(matched.skipped);
        let ranked_size = matched.candidates.len();

        let finals = match options.final_size {
            Some(n) => self.validator.validate_top(matched.candidates, n).await,
            None => self.validator.validate(matched.candidates).await,
        };
        let final_size = finals.len();

        let min_score = options.min_score.unwrap_or(self.config.min_score);
        let now = Utc::now();
        let expires_at = now + Duration::hours(self.config.signal_expiry_hours);
        let mut signals = Vec::new();

        for mut candidate in finals {
            if self.config.assistant_blend > 0.0 {
                candidate.score = self.blend_assistant(&candidate.symbol, candidate.score).await;
            }
            if candidate.score < min_score {
                debug!(
                    symbol = %candidate.symbol,
                    score = candidate.score,
                    "below variant minimum, not issued"
                );
                continue;
            }

            let bucket = self
                .table
                .translate(candidate.score)
                .context("validated table failed to translate a final score")?
                .clone();

            let strategy_id = candidate
                .dominant_strategy()
                .unwrap_or("aggregate")
                .to_string();
            let signal = Signal {
                id: Uuid::new_v4(),
                candidate: candidate.clone(),
                bucket,
                variant: options.variant.clone(),
                issued_at: now,
                expires_at,
            };
            let record = OutcomeRecord {
                id: Uuid::new_v4(),
                signal_id: signal.id,
                strategy_id,
                symbol: candidate.symbol.clone(),
                variant: options.variant.clone(),
                expected_return: OutcomeRecord::expected_return_for(candidate.score),
                realized_return: None,
                accuracy: None,
                issued_at: now,
                validated_at: None,
            };

            self.signal_store
                .store(&signal)
                .await
                .context("failed to store signal")?;
            self.outcome_store
                .open(&record)
                .await
                .context("failed to open outcome record")?;
            signals.push(signal);
        }

        let report = PipelineReport {
            universe_size: universe.len(),
            shortlist_size: screen.shortlist.len(),
            ranked_size,
            final_size,
            skipped,
            signals,
        };
        info!(
            universe = report.universe_size,
            shortlist = report.shortlist_size,
            ranked = report.ranked_size,
            finals = report.final_size,
            issued = report.signals.len(),
            partial_failures = report.partial_failures(),
            "pipeline run complete"
        );
        Ok(report)
    }

    /// Mix the assistant's qualitative assessment into a final score.
    /// Assistant unavailability keeps the quantitative score untouched.
    async fn blend_assistant(&self, symbol: &str, score: f64) -> f64 {
        let series = match self
            .provider
            .price_series(symbol, self.config.window_days)
            .await
        {
            Ok(series) => series,
            Err(e) => {
                warn!(symbol, error = %e, "no series for assistant features");
                return score;
            }
        };
        let mut features = HashMap::new();
        if let Some(momentum) = series.momentum(5) {
            features.insert("momentum".to_string(), momentum);
        }
        if let (Some(avg), Some(last)) = (series.avg_volume(20), series.volumes().last().copied())
        {
            if avg > 0.0 {
                features.insert("volume_ratio".to_string(), last / avg);
            }
        }
        let bundle = FeatureBundle {
            symbol: symbol.to_string(),
            features,
        };
        match self.provider.assistant_score(&bundle).await {
            Ok(recommendation) => {
                let blend = self.config.assistant_blend.clamp(0.0, 1.0);
                let blended = (1.0 - blend) * score + blend * recommendation.score;
                debug!(
                    symbol,
                    quantitative = score,
                    assistant = recommendation.score,
                    blended,
                    "assistant blend applied"
                );
                blended.clamp(0.0, 100.0)
            }
            Err(e) => {
                warn!(symbol, error = %e, "assistant unavailable, keeping quantitative score");
                score
            }
        }
    }
}
