// Outcome Validator
// Re-weights pattern scores by each strategy's recent realized performance

use common::{PipelineStage, ScoredCandidate};
use market_data::CachedMarketData;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Trailing win rate below this gets the discount
    pub confidence_threshold: f64,
    /// Multiplicative penalty on a discounted strategy's contribution
    pub discount: f64,
    /// Final delivered candidate count
    pub final_size: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.70,
            discount: 0.80,
            final_size: 5,
        }
    }
}

/// Discounts contributions from strategies on a bad recent run rather than
/// dropping them outright, then re-sorts and truncates to the delivered size.
/// A small sample of bad luck deprioritizes a strategy; it does not
/// disqualify it.
pub struct OutcomeValidator {
    config: ValidatorConfig,
    provider: Arc<CachedMarketData>,
}

impl OutcomeValidator {
    pub fn new(config: ValidatorConfig, provider: Arc<CachedMarketData>) -> Self {
        Self { config, provider }
    }

    pub async fn validate(&self, ranked: Vec<ScoredCandidate>) -> Vec<ScoredCandidate> {
        self.validate_top(ranked, self.config.final_size).await
    }

    /// Same validation with an explicit delivered size, for experiment
    /// variants that override the default.
    pub async fn validate_top(
        &self,
        ranked: Vec<ScoredCandidate>,
        final_size: usize,
    ) -> Vec<ScoredCandidate> {
        let mut finals = Vec::with_capacity(ranked.len());

        for candidate in ranked {
            let mut contributions = candidate.contributions.clone();
            for contribution in &mut contributions {
                let proven = match self
                    .provider
                    .trailing_win_rate(&contribution.strategy_id)
                    .await
                {
                    Ok(Some(rate)) => {
                        debug!(
                            strategy = %contribution.strategy_id,
                            rate,
                            "trailing win rate"
                        );
                        rate >= self.config.confidence_threshold
                    }
                    Ok(None) => {
                        debug!(
                            strategy = %contribution.strategy_id,
                            "no recorded win rate, treating as unproven"
                        );
                        false
                    }
                    Err(e) => {
                        warn!(
                            strategy = %contribution.strategy_id,
                            error = %e,
                            "win rate lookup failed, treating as unproven"
                        );
                        false
                    }
                };
                if !proven {
                    contribution.score *= self.config.discount;
                }
            }

            let score = ScoredCandidate::aggregate(&contributions);
            finals.push(ScoredCandidate {
                score,
                stage: PipelineStage::Validation,
                contributions,
                ..candidate
            });
        }

        finals.sort_by(crate::patterns::compare_candidates);
        finals.truncate(final_size);
        info!(finals = finals.len(), "outcome validation complete");
        finals
    }
}
