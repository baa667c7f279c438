// Mean reversion pattern

use super::ScoringStrategy;
use anyhow::{ensure, Result};
use common::PriceSeries;

/// Scores distance below the rolling mean in standard deviations.
/// Deeply oversold prices score high; stretched prices score low.
pub struct MeanReversionStrategy {
    window: usize,
    /// Score points per standard deviation of displacement
    scale: f64,
}

impl MeanReversionStrategy {
    pub fn new(window: usize, scale: f64) -> Self {
        Self { window, scale }
    }
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self::new(20, 20.0)
    }
}

impl ScoringStrategy for MeanReversionStrategy {
    fn id(&self) -> &str {
        "mean_reversion"
    }

    fn score(&self, series: &PriceSeries) -> Result<f64> {
        ensure!(
            series.len() >= self.window,
            "series too short for mean reversion window {}",
            self.window
        );
        let closes = series.closes();
        let tail = &closes[closes.len() - self.window..];
        let mean = tail.iter().sum::<f64>() / tail.len() as f64;
        let variance =
            tail.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / tail.len() as f64;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return Ok(50.0);
        }
        let z = (closes[closes.len() - 1] - mean) / std_dev;
        Ok((50.0 - z * self.scale).clamp(0.0, 100.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::PricePoint;
    use rust_decimal::prelude::*;

    fn series(closes: &[f64]) -> PriceSeries {
        let now = Utc::now();
        let points = closes
            .iter()
            .enumerate()
            .map(|(i, c)| PricePoint {
                close: Decimal::from_f64(*c).unwrap(),
                volume: Decimal::from(1000),
                timestamp: now - Duration::days((closes.len() - i) as i64),
            })
            .collect();
        PriceSeries::new("TEST", points)
    }

    #[test]
    fn oversold_scores_high() {
        let strategy = MeanReversionStrategy::default();
        let mut closes = vec![100.0; 19];
        closes.push(90.0); // sharp dip below the mean
        assert!(strategy.score(&series(&closes)).unwrap() > 80.0);
    }

    #[test]
    fn stretched_scores_low() {
        let strategy = MeanReversionStrategy::default();
        let mut closes = vec![100.0; 19];
        closes.push(110.0);
        assert!(strategy.score(&series(&closes)).unwrap() < 20.0);
    }

    #[test]
    fn flat_series_is_neutral() {
        let strategy = MeanReversionStrategy::default();
        assert_eq!(strategy.score(&series(&[100.0; 20])).unwrap(), 50.0);
    }
}
