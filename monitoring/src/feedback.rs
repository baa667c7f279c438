//! Daily feedback cycle
//!
//! Revisits outcome records past their evaluation horizon, measures how close
//! each signal's expected return came to the realized move, and feeds the
//! result back into strategy weights and trailing win rates.
//!
//! The cycle is all-or-nothing: every record is scored into a local buffer
//! first, and only a fully scored batch gets committed. A failure anywhere
//! during scoring aborts the run with no stored mutation, so a half-evaluated
//! day can never skew the weights.

use chrono::{DateTime, Duration, Utc};
use common::{AdjustReason, EngineError, OutcomeRecord, WeightTable};
use market_data::CachedMarketData;
use serde::{Deserialize, Serialize};
use signal_engine::OutcomeStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Where a running cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CyclePhase {
    Idle,
    Collecting,
    Scoring,
    Adjusting,
    Pruning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Hours a signal must age before its outcome is evaluated
    pub horizon_hours: i64,
    /// Mean accuracy at or above this raises a strategy's weight, below lowers it
    pub accuracy_target: f64,
    /// Additive weight step per cycle
    pub weight_step: f64,
    /// Weights falling under this are retired
    pub weight_floor: f64,
    /// Price window used to read the realized move
    pub window_days: u32,
    /// Accuracy at or above this counts as a win for the trailing win rate
    pub win_threshold: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 24,
            accuracy_target: 0.6,
            weight_step: 0.1,
            weight_floor: 0.5,
            window_days: 90,
            win_threshold: 0.5,
        }
    }
}

/// What one committed cycle did
#[derive(Debug, Clone)]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
    pub evaluated: usize,
    /// (strategy_id, previous weight, new weight)
    pub adjusted: Vec<(String, f64, f64)>,
    pub retired: Vec<String>,
    pub win_rates: HashMap<String, f64>,
}

struct ScoredOutcome {
    record: OutcomeRecord,
    realized: f64,
    accuracy: f64,
}

pub struct FeedbackLoop {
    config: FeedbackConfig,
    outcomes: Arc<dyn OutcomeStore>,
    provider: Arc<CachedMarketData>,
    weights: Arc<WeightTable>,
    phase: RwLock<CyclePhase>,
    last_summary: RwLock<Option<CycleSummary>>,
}

impl FeedbackLoop {
    pub fn new(
        config: FeedbackConfig,
        outcomes: Arc<dyn OutcomeStore>,
        provider: Arc<CachedMarketData>,
        weights: Arc<WeightTable>,
    ) -> Self {
        Self {
            config,
            outcomes,
            provider,
            weights,
            phase: RwLock::new(CyclePhase::Idle),
            last_summary: RwLock::new(None),
        }
    }

    pub async fn phase(&self) -> CyclePhase {
        *self.phase.read().await
    }

    pub async fn last_summary(&self) -> Option<CycleSummary> {
        self.last_summary.read().await.clone()
    }

    /// Run one full cycle as of `now`. An `Err` guarantees nothing was
    /// committed; the next scheduled run picks the same records up again.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleSummary, EngineError> {
        let result = self.execute(now).await;
        *self.phase.write().await = CyclePhase::Idle;
        match &result {
            Ok(summary) => {
                *self.last_summary.write().await = Some(summary.clone());
                info!(
                    evaluated = summary.evaluated,
                    adjusted = summary.adjusted.len(),
                    retired = summary.retired.len(),
                    "feedback cycle committed"
                );
            }
            Err(err) => warn!(error = %err, "feedback cycle aborted"),
        }
        result
    }

    async fn execute(&self, now: DateTime<Utc>) -> Result<CycleSummary, EngineError> {
        *self.phase.write().await = CyclePhase::Collecting;
        let horizon = Duration::hours(self.config.horizon_hours);
        let cutoff = now - horizon;
        let pending = self
            .outcomes
            .pending_issued_before(cutoff)
            .await
            .map_err(|e| aborted("collect", e.to_string()))?;

        if pending.is_empty() {
            return Ok(CycleSummary {
                started_at: now,
                cutoff,
                evaluated: 0,
                adjusted: Vec::new(),
                retired: Vec::new(),
                win_rates: HashMap::new(),
            });
        }

        // Score everything before touching any store
        *self.phase.write().await = CyclePhase::Scoring;
        let mut scored = Vec::with_capacity(pending.len());
        for record in pending {
            let series = self
                .provider
                .price_series(&record.symbol, self.config.window_days)
                .await
                .map_err(|e| aborted("score", e.to_string()))?;
            let realized = series
                .return_between(record.issued_at, record.issued_at + horizon)
                .ok_or_else(|| {
                    aborted("score", format!("no realized move for {}", record.symbol))
                })?;
            let accuracy = OutcomeRecord::score_accuracy(record.expected_return, realized);
            scored.push(ScoredOutcome {
                record,
                realized,
                accuracy,
            });
        }

        // Write realized outcomes back from the fully-scored buffer. A failed
        // write leaves that record pending, so it is re-scored next cycle
        // instead of silently dropped; the weight batch below still uses the
        // whole buffer.
        for outcome in &scored {
            if let Err(err) = self
                .outcomes
                .complete(outcome.record.id, outcome.realized, outcome.accuracy, now)
                .await
            {
                warn!(
                    record = %outcome.record.id,
                    error = %err,
                    "completion write failed, record stays pending"
                );
            }
        }

        // Per-strategy mean accuracy drives the weight step
        *self.phase.write().await = CyclePhase::Adjusting;
        let mut by_strategy: HashMap<String, Vec<f64>> = HashMap::new();
        for outcome in &scored {
            by_strategy
                .entry(outcome.record.strategy_id.clone())
                .or_default()
                .push(outcome.accuracy);
        }

        let current: HashMap<String, f64> = self
            .weights
            .full_snapshot()
            .await
            .into_iter()
            .filter(|w| !w.retired)
            .map(|w| (w.strategy_id, w.weight))
            .collect();

        let mut batch = HashMap::new();
        for (strategy_id, accuracies) in &by_strategy {
            let Some(weight) = current.get(strategy_id) else {
                continue;
            };
            let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
            let (new_weight, reason) = if mean >= self.config.accuracy_target {
                (weight + self.config.weight_step, AdjustReason::AccuracyAboveTarget)
            } else {
                (
                    (weight - self.config.weight_step).max(0.0),
                    AdjustReason::AccuracyBelowTarget,
                )
            };
            batch.insert(strategy_id.clone(), (new_weight, reason));
        }

        // Adjustment and pruning commit together under one write lock
        *self.phase.write().await = CyclePhase::Pruning;
        let adjustment = self
            .weights
            .apply_adjustments(&batch, self.config.weight_floor, now)
            .await;

        // Trailing win rates feed the validator; a failed write only costs
        // freshness, so it does not abort a committed cycle.
        let mut win_rates = HashMap::new();
        for (strategy_id, accuracies) in &by_strategy {
            let wins = accuracies
                .iter()
                .filter(|a| **a >= self.config.win_threshold)
                .count();
            let rate = wins as f64 / accuracies.len() as f64;
            if let Err(err) = self.provider.record_win_rate(strategy_id, rate).await {
                warn!(strategy = %strategy_id, error = %err, "win rate update failed");
            }
            win_rates.insert(strategy_id.clone(), rate);
        }

        Ok(CycleSummary {
            started_at: now,
            cutoff,
            evaluated: scored.len(),
            adjusted: adjustment.adjusted,
            retired: adjustment.retired,
            win_rates,
        })
    }
}

fn aborted(phase: &str, reason: String) -> EngineError {
    EngineError::CycleAborted {
        phase: phase.to_string(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use common::{PricePoint, PriceSeries};
    use market_data::{
        CacheConfig, CachedMarketData, HeuristicScoringService, InMemoryStore, MarketDataSource,
        SyntheticMarketData,
    };
    use rust_decimal::Decimal;
    use signal_engine::InMemoryOutcomeStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn record(strategy: &str, symbol: &str, expected: f64, issued_at: DateTime<Utc>) -> OutcomeRecord {
        OutcomeRecord {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            strategy_id: strategy.into(),
            symbol: symbol.into(),
            variant: None,
            expected_return: expected,
            realized_return: None,
            accuracy: None,
            issued_at,
            validated_at: None,
        }
    }

    fn provider_with(source: Arc<dyn MarketDataSource>) -> Arc<CachedMarketData> {
        Arc::new(CachedMarketData::new(
            source,
            Arc::new(HeuristicScoringService),
            Arc::new(InMemoryStore::new()),
            CacheConfig::default(),
        ))
    }

    struct FailingSource;

    #[async_trait]
    impl MarketDataSource for FailingSource {
        async fn fetch(&self, _symbol: &str, _window_days: u32) -> Result<PriceSeries> {
            anyhow::bail!("feed offline")
        }
    }

    fn daily_bars(closes: impl Fn(usize) -> i64) -> Vec<PricePoint> {
        let now = Utc::now();
        (0..10)
            .map(|i| PricePoint {
                close: Decimal::from(closes(i)),
                volume: Decimal::from(1_000_000),
                timestamp: now - Duration::days((10 - i) as i64),
            })
            .collect()
    }

    /// Flat at 100 until a single 10% jump five days back, flat since
    struct SteppedSource;

    #[async_trait]
    impl MarketDataSource for SteppedSource {
        async fn fetch(&self, symbol: &str, _window_days: u32) -> Result<PriceSeries> {
            Ok(PriceSeries::new(
                symbol,
                daily_bars(|i| if i < 5 { 100 } else { 110 }),
            ))
        }
    }

    struct SlowFlatSource;

    #[async_trait]
    impl MarketDataSource for SlowFlatSource {
        async fn fetch(&self, symbol: &str, _window_days: u32) -> Result<PriceSeries> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok(PriceSeries::new(symbol, daily_bars(|_| 100)))
        }
    }

    /// Delegates to the in-memory store but rejects one completion write
    struct FlakyCompletions {
        inner: InMemoryOutcomeStore,
        completes: AtomicUsize,
        fail_on: usize,
    }

    impl FlakyCompletions {
        fn new(fail_on: usize) -> Self {
            Self {
                inner: InMemoryOutcomeStore::new(),
                completes: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl OutcomeStore for FlakyCompletions {
        async fn open(&self, record: &OutcomeRecord) -> Result<()> {
            self.inner.open(record).await
        }

        async fn complete(
            &self,
            record_id: Uuid,
            realized_return: f64,
            accuracy: f64,
            validated_at: DateTime<Utc>,
        ) -> Result<()> {
            if self.completes.fetch_add(1, Ordering::SeqCst) == self.fail_on {
                anyhow::bail!("write rejected");
            }
            self.inner
                .complete(record_id, realized_return, accuracy, validated_at)
                .await
        }

        async fn pending_issued_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OutcomeRecord>> {
            self.inner.pending_issued_before(cutoff).await
        }

        async fn for_strategy(&self, strategy_id: &str) -> Result<Vec<OutcomeRecord>> {
            self.inner.for_strategy(strategy_id).await
        }

        async fn all(&self) -> Result<Vec<OutcomeRecord>> {
            self.inner.all().await
        }
    }

    #[tokio::test]
    async fn empty_backlog_is_a_no_op() {
        let weights = Arc::new(WeightTable::new(["momentum"]));
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            Arc::new(InMemoryOutcomeStore::new()),
            provider_with(Arc::new(SyntheticMarketData::new(90))),
            weights.clone(),
        );

        let summary = feedback.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(summary.evaluated, 0);
        assert!(summary.adjusted.is_empty());
        assert_eq!(weights.active_snapshot().await["momentum"], 1.0);
    }

    #[tokio::test]
    async fn low_accuracy_lowers_the_weight_by_one_step() {
        // Flat series: realized move stays within the jitter band, far from
        // the 5% expectation, so accuracy lands near zero.
        let now = Utc::now();
        let outcomes = Arc::new(InMemoryOutcomeStore::new());
        for i in 0..10 {
            outcomes
                .open(&record("momentum", &format!("FLAT{i}"), 0.05, now - Duration::hours(30)))
                .await
                .unwrap();
        }
        let weights = Arc::new(WeightTable::new(["momentum"]));
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes.clone(),
            provider_with(Arc::new(SyntheticMarketData::new(90))),
            weights.clone(),
        );

        let summary = feedback.run_cycle(now).await.unwrap();
        assert_eq!(summary.evaluated, 10);
        assert_eq!(summary.adjusted, vec![("momentum".to_string(), 1.0, 0.9)]);
        assert_eq!(summary.win_rates["momentum"], 0.0);

        // Every evaluated record carries its realized fields now
        for rec in outcomes.all().await.unwrap() {
            assert!(!rec.is_pending());
            assert!(rec.accuracy.unwrap() < 0.2);
        }
    }

    #[tokio::test]
    async fn accurate_strategy_gains_weight_and_win_rate() {
        // Drift matches the expectation, so day-over-day moves land within
        // 10% of it and accuracy stays high.
        let now = Utc::now();
        let outcomes = Arc::new(InMemoryOutcomeStore::new());
        let mut source = SyntheticMarketData::new(90);
        for i in 0..10 {
            let symbol = format!("TREND{i}");
            source.set_drift(&symbol, 0.05);
            outcomes
                .open(&record("momentum", &symbol, 0.05, now - Duration::hours(30)))
                .await
                .unwrap();
        }
        let weights = Arc::new(WeightTable::new(["momentum"]));
        let provider = provider_with(Arc::new(source));
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes,
            provider.clone(),
            weights.clone(),
        );

        let summary = feedback.run_cycle(now).await.unwrap();
        assert_eq!(summary.adjusted, vec![("momentum".to_string(), 1.0, 1.1)]);
        assert_eq!(summary.win_rates["momentum"], 1.0);
        assert_eq!(
            provider.trailing_win_rate("momentum").await.unwrap(),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn persistently_inaccurate_strategy_retires() {
        let now = Utc::now();
        let outcomes = Arc::new(InMemoryOutcomeStore::new());
        let weights = Arc::new(WeightTable::new(["momentum", "volume_spike"]));
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes.clone(),
            provider_with(Arc::new(SyntheticMarketData::new(90))),
            weights.clone(),
        );

        // 1.0 -> 0.9 -> ... -> 0.4, which falls under the 0.5 floor
        for cycle in 0..6 {
            let issued = now - Duration::hours(30);
            outcomes
                .open(&record("momentum", &format!("FLAT{cycle}"), 0.05, issued))
                .await
                .unwrap();
            feedback.run_cycle(now).await.unwrap();
        }

        assert!(weights.is_retired("momentum").await);
        let snapshot = weights.active_snapshot().await;
        assert!(!snapshot.contains_key("momentum"));
        assert_eq!(snapshot["volume_spike"], 1.0);

        // Further cycles leave the retired strategy alone
        outcomes
            .open(&record("momentum", "FLAT9", 0.05, now - Duration::hours(30)))
            .await
            .unwrap();
        let summary = feedback.run_cycle(now).await.unwrap();
        assert!(summary.adjusted.is_empty());
        assert!(weights.is_retired("momentum").await);
    }

    #[tokio::test]
    async fn realized_move_spans_the_record_horizon() {
        let now = Utc::now();
        let outcomes = Arc::new(InMemoryOutcomeStore::new());
        // Issued just before the jump; the latest bars are flat, so only the
        // record's own window contains the move.
        let issued = now - Duration::hours(5 * 24 + 12);
        outcomes
            .open(&record("momentum", "STEP", 0.10, issued))
            .await
            .unwrap();
        let weights = Arc::new(WeightTable::new(["momentum"]));
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes.clone(),
            provider_with(Arc::new(SteppedSource)),
            weights.clone(),
        );

        let summary = feedback.run_cycle(now).await.unwrap();
        let completed = &outcomes.all().await.unwrap()[0];
        assert!((completed.realized_return.unwrap() - 0.10).abs() < 1e-9);
        assert!(completed.accuracy.unwrap() > 0.95);
        assert_eq!(summary.adjusted, vec![("momentum".to_string(), 1.0, 1.1)]);
    }

    #[tokio::test]
    async fn failed_completion_write_keeps_the_record_pending() {
        let now = Utc::now();
        let outcomes = Arc::new(FlakyCompletions::new(1));
        for i in 0..3 {
            outcomes
                .open(&record("momentum", &format!("FLAT{i}"), 0.05, now - Duration::hours(30)))
                .await
                .unwrap();
        }
        let weights = Arc::new(WeightTable::new(["momentum"]));
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes.clone(),
            provider_with(Arc::new(SyntheticMarketData::new(90))),
            weights.clone(),
        );

        let summary = feedback.run_cycle(now).await.unwrap();
        // The weight batch still commits once, from the full scored buffer
        assert_eq!(summary.evaluated, 3);
        assert_eq!(summary.adjusted, vec![("momentum".to_string(), 1.0, 0.9)]);

        // Exactly the rejected write stays pending and is visible to retries
        let pending = outcomes
            .pending_issued_before(now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        let completed = outcomes
            .all()
            .await
            .unwrap()
            .iter()
            .filter(|r| !r.is_pending())
            .count();
        assert_eq!(completed, 2);
    }

    #[tokio::test]
    async fn phase_is_observable_while_a_cycle_runs() {
        let now = Utc::now();
        let outcomes = Arc::new(InMemoryOutcomeStore::new());
        outcomes
            .open(&record("momentum", "SLOW", 0.05, now - Duration::hours(30)))
            .await
            .unwrap();
        let feedback = Arc::new(FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes,
            provider_with(Arc::new(SlowFlatSource)),
            Arc::new(WeightTable::new(["momentum"])),
        ));

        let runner = feedback.clone();
        let handle = tokio::spawn(async move { runner.run_cycle(now).await });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(feedback.phase().await, CyclePhase::Scoring);

        handle.await.unwrap().unwrap();
        assert_eq!(feedback.phase().await, CyclePhase::Idle);
    }

    #[tokio::test]
    async fn scoring_failure_aborts_with_nothing_committed() {
        let now = Utc::now();
        let outcomes = Arc::new(InMemoryOutcomeStore::new());
        for i in 0..3 {
            outcomes
                .open(&record("momentum", &format!("SYM{i}"), 0.05, now - Duration::hours(30)))
                .await
                .unwrap();
        }
        let weights = Arc::new(WeightTable::new(["momentum"]));
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes.clone(),
            provider_with(Arc::new(FailingSource)),
            weights.clone(),
        );

        let err = feedback.run_cycle(now).await.unwrap_err();
        assert!(matches!(err, EngineError::CycleAborted { .. }));
        assert_eq!(feedback.phase().await, CyclePhase::Idle);
        assert!(feedback.last_summary().await.is_none());

        // No record completed, no weight touched
        for rec in outcomes.all().await.unwrap() {
            assert!(rec.is_pending());
        }
        assert_eq!(weights.active_snapshot().await["momentum"], 1.0);

        let history = weights.full_snapshot().await;
        assert!(history[0].history.is_empty());
    }

    #[tokio::test]
    async fn records_inside_the_horizon_wait() {
        let now = Utc::now();
        let outcomes = Arc::new(InMemoryOutcomeStore::new());
        outcomes
            .open(&record("momentum", "FRESH", 0.05, now - Duration::hours(2)))
            .await
            .unwrap();
        let feedback = FeedbackLoop::new(
            FeedbackConfig::default(),
            outcomes.clone(),
            provider_with(Arc::new(SyntheticMarketData::new(90))),
            Arc::new(WeightTable::new(["momentum"])),
        );

        let summary = feedback.run_cycle(now).await.unwrap();
        assert_eq!(summary.evaluated, 0);
        assert!(outcomes.all().await.unwrap()[0].is_pending());
    }
}
