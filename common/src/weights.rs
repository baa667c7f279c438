//! Strategy weight table shared between the pattern matcher (reader) and the
//! feedback loop (sole writer).
//!
//! Readers take a point-in-time snapshot of active weights. The feedback loop
//! applies a whole adjustment batch plus pruning under one write lock, so no
//! pipeline run ever observes a partially-updated weight set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Why a weight changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdjustReason {
    AccuracyAboveTarget,
    AccuracyBelowTarget,
    Retired,
    Reset,
}

/// One entry in a strategy's modification history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightChange {
    pub at: DateTime<Utc>,
    pub from: f64,
    pub to: f64,
    pub reason: AdjustReason,
}

/// A named scoring strategy's current reliability weight
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyWeight {
    pub strategy_id: String,
    pub weight: f64,
    pub retired: bool,
    pub history: Vec<WeightChange>,
}

impl StrategyWeight {
    fn new(strategy_id: String) -> Self {
        Self {
            strategy_id,
            weight: 1.0,
            retired: false,
            history: Vec::new(),
        }
    }
}

/// Result of one committed adjustment batch
#[derive(Debug, Clone, Default)]
pub struct AdjustmentResult {
    /// (strategy_id, previous weight, new weight)
    pub adjusted: Vec<(String, f64, f64)>,
    pub retired: Vec<String>,
}

/// Shared weight map. All weights start at 1.0.
pub struct WeightTable {
    inner: RwLock<HashMap<String, StrategyWeight>>,
}

impl WeightTable {
    pub fn new<I, S>(strategy_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let map = strategy_ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                (id.clone(), StrategyWeight::new(id))
            })
            .collect();
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Register a strategy if absent. Existing entries keep their weight.
    pub async fn register(&self, strategy_id: &str) {
        let mut map = self.inner.write().await;
        map.entry(strategy_id.to_string())
            .or_insert_with(|| StrategyWeight::new(strategy_id.to_string()));
    }

    /// Point-in-time view of active (non-retired) weights
    pub async fn active_snapshot(&self) -> HashMap<String, f64> {
        let map = self.inner.read().await;
        map.values()
            .filter(|w| !w.retired)
            .map(|w| (w.strategy_id.clone(), w.weight))
            .collect()
    }

    /// Full view including retired strategies and their histories
    pub async fn full_snapshot(&self) -> Vec<StrategyWeight> {
        let map = self.inner.read().await;
        map.values().cloned().collect()
    }

    pub async fn is_retired(&self, strategy_id: &str) -> bool {
        let map = self.inner.read().await;
        map.get(strategy_id).map(|w| w.retired).unwrap_or(false)
    }

    /// Commit a batch of new weights and prune anything under the floor.
    ///
    /// Holds the write lock for the whole batch. Retired strategies are never
    /// adjusted here; retirement is monotone and only `reset` revives one.
    pub async fn apply_adjustments(
        &self,
        batch: &HashMap<String, (f64, AdjustReason)>,
        floor: f64,
        now: DateTime<Utc>,
    ) -> AdjustmentResult {
        let mut map = self.inner.write().await;
        let mut result = AdjustmentResult::default();

        for (strategy_id, (new_weight, reason)) in batch {
            let Some(entry) = map.get_mut(strategy_id) else {
                warn!(strategy = %strategy_id, "adjustment for unknown strategy ignored");
                continue;
            };
            if entry.retired {
                continue;
            }
            let from = entry.weight;
            entry.weight = *new_weight;
            entry.history.push(WeightChange {
                at: now,
                from,
                to: *new_weight,
                reason: *reason,
            });
            result.adjusted.push((strategy_id.clone(), from, *new_weight));
        }

        for entry in map.values_mut() {
            if !entry.retired && entry.weight < floor {
                entry.retired = true;
                entry.history.push(WeightChange {
                    at: now,
                    from: entry.weight,
                    to: entry.weight,
                    reason: AdjustReason::Retired,
                });
                info!(strategy = %entry.strategy_id, weight = entry.weight, "strategy retired");
                result.retired.push(entry.strategy_id.clone());
            }
        }

        result
    }

    /// Explicit, human-triggered revival of a retired strategy at weight 1.0.
    /// Returns false if the strategy is unknown.
    pub async fn reset(&self, strategy_id: &str) -> bool {
        let mut map = self.inner.write().await;
        let Some(entry) = map.get_mut(strategy_id) else {
            return false;
        };
        let from = entry.weight;
        entry.weight = 1.0;
        entry.retired = false;
        entry.history.push(WeightChange {
            at: Utc::now(),
            from,
            to: 1.0,
            reason: AdjustReason::Reset,
        });
        info!(strategy = %strategy_id, "strategy weight reset");
        true
    }
}
