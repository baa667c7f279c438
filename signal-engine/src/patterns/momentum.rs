// Momentum continuation pattern

use super::ScoringStrategy;
use anyhow::{ensure, Result};
use common::PriceSeries;

/// Scores sustained directional movement over a short lookback.
/// A flat series lands at 50; strong upside momentum approaches 100.
pub struct MomentumStrategy {
    lookback: usize,
    /// Score points per unit of fractional momentum
    scale: f64,
}

impl MomentumStrategy {
    pub fn new(lookback: usize, scale: f64) -> Self {
        Self { lookback, scale }
    }
}

impl Default for MomentumStrategy {
    fn default() -> Self {
        // ~6% over 5 bars saturates the score
        Self::new(5, 800.0)
    }
}

impl ScoringStrategy for MomentumStrategy {
    fn id(&self) -> &str {
        "momentum"
    }

    fn score(&self, series: &PriceSeries) -> Result<f64> {
        ensure!(
            series.len() > self.lookback,
            "series too short for momentum lookback {}",
            self.lookback
        );
        let momentum = series
            .momentum(self.lookback)
            .ok_or_else(|| anyhow::anyhow!("momentum undefined for {}", series.symbol))?;
        Ok((50.0 + momentum * self.scale).clamp(0.0, 100.0))
    }
}
