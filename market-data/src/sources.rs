//! External collaborator contracts and the in-process implementations used by
//! the demo binary and tests. Production deployments plug real connectors in
//! behind the same traits.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::{FeatureBundle, PricePoint, PriceSeries, Recommendation};
use rust_decimal::prelude::*;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Raw price/volume history for an instrument over a trailing window
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn fetch(&self, symbol: &str, window_days: u32) -> Result<PriceSeries>;
}

/// Natural-language scoring assistant. Input is a numeric feature bundle,
/// output a numeric recommendation with a short rationale.
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(&self, bundle: &FeatureBundle) -> Result<Recommendation>;
}

/// Durable key/value persistence
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
}

/// Deterministic synthetic market data. Each symbol gets a seeded random walk
/// so repeated fetches agree; per-symbol drift and volume overrides let tests
/// shape the universe precisely.
pub struct SyntheticMarketData {
    bars: usize,
    base_price: f64,
    default_volume: f64,
    volume_overrides: HashMap<String, f64>,
    drift_overrides: HashMap<String, f64>,
}

impl SyntheticMarketData {
    pub fn new(bars: usize) -> Self {
        Self {
            bars,
            base_price: 100.0,
            default_volume: 500_000.0,
            volume_overrides: HashMap::new(),
            drift_overrides: HashMap::new(),
        }
    }

    pub fn with_default_volume(mut self, volume: f64) -> Self {
        self.default_volume = volume;
        self
    }

    /// Fix a symbol's per-bar volume
    pub fn set_volume(&mut self, symbol: &str, volume: f64) {
        self.volume_overrides.insert(symbol.to_string(), volume);
    }

    /// Fix a symbol's per-bar fractional drift
    pub fn set_drift(&mut self, symbol: &str, drift: f64) {
        self.drift_overrides.insert(symbol.to_string(), drift);
    }

    fn seed_for(symbol: &str) -> u64 {
        // FNV-1a, stable across runs
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in symbol.bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }
}

#[async_trait]
impl MarketDataSource for SyntheticMarketData {
    async fn fetch(&self, symbol: &str, window_days: u32) -> Result<PriceSeries> {
        let bars = self.bars.min(window_days as usize);
        let mut rng = fastrand::Rng::with_seed(Self::seed_for(symbol));
        let drift = self.drift_overrides.get(symbol).copied().unwrap_or(0.0);
        let volume = self
            .volume_overrides
            .get(symbol)
            .copied()
            .unwrap_or(self.default_volume);

        let now = Utc::now();
        let mut price = self.base_price;
        let mut points = Vec::with_capacity(bars);
        for i in 0..bars {
            let jitter = (rng.f64() - 0.5) * 0.01;
            price *= 1.0 + drift + jitter;
            points.push(PricePoint {
                close: Decimal::from_f64(price).unwrap_or(Decimal::ONE_HUNDRED),
                volume: Decimal::from_f64(volume).unwrap_or(Decimal::ZERO),
                timestamp: now - Duration::days((bars - i) as i64),
            });
        }
        Ok(PriceSeries::new(symbol, points))
    }
}

/// Feature-threshold scoring assistant standing in for the external service.
/// Maps momentum and relative volume onto a centered score.
pub struct HeuristicScoringService;

#[async_trait]
impl ScoringService for HeuristicScoringService {
    async fn score(&self, bundle: &FeatureBundle) -> Result<Recommendation> {
        let momentum = bundle.features.get("momentum").copied().unwrap_or(0.0);
        let volume_ratio = bundle.features.get("volume_ratio").copied().unwrap_or(1.0);

        let momentum_part = (momentum * 400.0).clamp(-40.0, 40.0);
        let volume_part = ((volume_ratio - 1.0) * 10.0).clamp(-10.0, 10.0);
        let score = (50.0 + momentum_part + volume_part).clamp(0.0, 100.0);

        let rationale = if score >= 50.0 {
            "recent momentum and participation lean constructive"
        } else {
            "recent momentum and participation lean cautious"
        };
        Ok(Recommendation {
            score,
            rationale: rationale.to_string(),
        })
    }
}

/// Process-local key/value store
pub struct InMemoryStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            values: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut values = self.values.write().await;
        values.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let values = self.values.read().await;
        Ok(values.get(key).cloned())
    }
}
