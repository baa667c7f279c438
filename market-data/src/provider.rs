//! Cached facade over the external collaborators.
//!
//! Pipeline stages never talk to a source directly; everything routes through
//! here so the TTL and single-flight policy applies uniformly. Each data kind
//! carries its own TTL class: live prices expire quickly, derived analytics
//! last longer, qualitative assessments longest.

use crate::cache::DataCache;
use crate::sources::{KeyValueStore, MarketDataSource, ScoringService};
use common::{EngineError, FeatureBundle, PriceSeries, Recommendation};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// TTL classes and the per-call fetch timeout
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Live price series
    pub price_ttl: Duration,
    /// Derived analytics such as trailing win rates
    pub analytics_ttl: Duration,
    /// Qualitative assistant assessments
    pub assessment_ttl: Duration,
    /// Upper bound on any single external call
    pub fetch_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            price_ttl: Duration::from_secs(60),
            analytics_ttl: Duration::from_secs(15 * 60),
            assessment_ttl: Duration::from_secs(60 * 60),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// The single gateway the screening, matching, and validation stages use to
/// reach market data, win-rate analytics, and the scoring assistant.
pub struct CachedMarketData {
    source: Arc<dyn MarketDataSource>,
    scoring: Arc<dyn ScoringService>,
    store: Arc<dyn KeyValueStore>,
    prices: DataCache<PriceSeries>,
    win_rates: DataCache<Option<f64>>,
    assessments: DataCache<Recommendation>,
    config: CacheConfig,
}

impl CachedMarketData {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        scoring: Arc<dyn ScoringService>,
        store: Arc<dyn KeyValueStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            prices: DataCache::new(config.fetch_timeout),
            win_rates: DataCache::new(config.fetch_timeout),
            assessments: DataCache::new(config.fetch_timeout),
            source,
            scoring,
            store,
            config,
        }
    }

    /// Price history for a symbol over a trailing window of days
    pub async fn price_series(
        &self,
        symbol: &str,
        window_days: u32,
    ) -> Result<PriceSeries, EngineError> {
        let key = format!("price:{symbol}:{window_days}");
        let source = self.source.clone();
        let symbol = symbol.to_string();
        self.prices
            .get(&key, self.config.price_ttl, move || async move {
                source.fetch(&symbol, window_days).await
            })
            .await
    }

    /// Realized win rate for a strategy over its trailing window.
    /// `None` means no rate has been recorded yet.
    pub async fn trailing_win_rate(&self, strategy_id: &str) -> Result<Option<f64>, EngineError> {
        let key = format!("winrate:{strategy_id}");
        let store = self.store.clone();
        let lookup_key = key.clone();
        self.win_rates
            .get(&key, self.config.analytics_ttl, move || async move {
                let value = store.get(&lookup_key).await?;
                Ok(value.and_then(|v| v.as_f64()))
            })
            .await
    }

    /// Qualitative assessment from the scoring assistant
    pub async fn assistant_score(
        &self,
        bundle: &FeatureBundle,
    ) -> Result<Recommendation, EngineError> {
        let key = format!("assist:{}", bundle.symbol);
        let scoring = self.scoring.clone();
        let bundle = bundle.clone();
        self.assessments
            .get(&key, self.config.assessment_ttl, move || async move {
                scoring.score(&bundle).await
            })
            .await
    }

    /// Persist a freshly computed win rate and drop the cached copy so the
    /// next validator run sees it.
    pub async fn record_win_rate(&self, strategy_id: &str, rate: f64) -> anyhow::Result<()> {
        let key = format!("winrate:{strategy_id}");
        self.store.put(&key, serde_json::json!(rate)).await?;
        self.win_rates.invalidate(&key);
        debug!(strategy = strategy_id, rate, "recorded trailing win rate");
        Ok(())
    }
}
