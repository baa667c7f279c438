// Volume spike pattern

use super::ScoringStrategy;
use anyhow::{ensure, Result};
use common::PriceSeries;

/// Scores the latest bar's volume against its rolling average.
/// Average participation scores neutral-low; a 2x spike scores 60,
/// 3x and above saturates.
pub struct VolumeSpikeStrategy {
    window: usize,
}

impl VolumeSpikeStrategy {
    pub fn new(window: usize) -> Self {
        Self { window }
    }
}

impl Default for VolumeSpikeStrategy {
    fn default() -> Self {
        Self::new(20)
    }
}

impl ScoringStrategy for VolumeSpikeStrategy {
    fn id(&self) -> &str {
        "volume_spike"
    }

    fn score(&self, series: &PriceSeries) -> Result<f64> {
        ensure!(
            series.len() >= self.window,
            "series too short for volume window {}",
            self.window
        );
        let volumes = series.volumes();
        let last = volumes[volumes.len() - 1];
        let avg = series
            .avg_volume(self.window)
            .ok_or_else(|| anyhow::anyhow!("volume average undefined for {}", series.symbol))?;
        if avg == 0.0 {
            return Ok(0.0);
        }
        let ratio = last / avg;
        Ok(((ratio - 0.5) * 40.0).clamp(0.0, 100.0))
    }
}
