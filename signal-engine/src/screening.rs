// Screening Engine
// Coarse rule-based reduction of the full universe to a shortlist

use common::{Instrument, PriceSnapshot, SkipReason};
use market_data::CachedMarketData;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Thresholds for the cheap screening rules. All rules must pass;
/// there is no partial credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreeningConfig {
    /// Trailing window of history to fetch, in days
    pub window_days: u32,
    /// Series shorter than this are not scoreable
    pub min_history: usize,
    /// Minimum average volume over the volume lookback
    pub min_avg_volume: f64,
    /// Minimum absolute fractional move over the momentum lookback
    pub min_abs_momentum: f64,
    pub momentum_lookback: usize,
    pub volume_lookback: usize,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            window_days: 90,
            min_history: 50,
            min_avg_volume: 200_000.0,
            min_abs_momentum: 0.01,
            momentum_lookback: 5,
            volume_lookback: 20,
        }
    }
}

/// Screening output: survivors plus every drop with its reason.
/// Dropped instruments never fail the run.
#[derive(Debug, Clone)]
pub struct ScreenReport {
    pub shortlist: Vec<Instrument>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Applies the conjunction of screening rules per instrument, reading data
/// exclusively through the cache facade.
pub struct Screener {
    config: ScreeningConfig,
    provider: Arc<CachedMarketData>,
}

impl Screener {
    pub fn new(config: ScreeningConfig, provider: Arc<CachedMarketData>) -> Self {
        Self { config, provider }
    }

    pub async fn screen(&self, universe: &[Instrument]) -> ScreenReport {
        let mut shortlist = Vec::new();
        let mut skipped = Vec::new();

        for instrument in universe {
            let series = match self
                .provider
                .price_series(&instrument.symbol, self.config.window_days)
                .await
            {
                Ok(series) => series,
                Err(e) => {
                    warn!(symbol = %instrument.symbol, error = %e, "screening fetch failed, dropping");
                    skipped.push((instrument.symbol.clone(), SkipReason::FetchFailed));
                    continue;
                }
            };

            if let Err(reason) = self.check_rules(&series) {
                debug!(symbol = %instrument.symbol, %reason, "screened out");
                skipped.push((instrument.symbol.clone(), reason));
                continue;
            }

            let mut passed = instrument.clone();
            if let Some(last) = series.points.last() {
                passed.last_snapshot = Some(PriceSnapshot {
                    price: last.close,
                    volume: last.volume,
                    captured_at: last.timestamp,
                });
            }
            shortlist.push(passed);
        }

        info!(
            universe = universe.len(),
            shortlist = shortlist.len(),
            skipped = skipped.len(),
            "screening complete"
        );
        ScreenReport { shortlist, skipped }
    }

    fn check_rules(&self, series: &common::PriceSeries) -> Result<(), SkipReason> {
        if series.len() < self.config.min_history {
            return Err(SkipReason::InsufficientHistory);
        }
        let avg_volume = series
            .avg_volume(self.config.volume_lookback)
            .ok_or(SkipReason::InsufficientHistory)?;
        if avg_volume < self.config.min_avg_volume {
            return Err(SkipReason::VolumeBelowMinimum);
        }
        let momentum = series
            .momentum(self.config.momentum_lookback)
            .ok_or(SkipReason::InsufficientHistory)?;
        if momentum.abs() < self.config.min_abs_momentum {
            return Err(SkipReason::MomentumBelowMinimum);
        }
        Ok(())
    }
}
