use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Market venue an instrument trades on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketVenue {
    Kospi,
    Kosdaq,
    Nyse,
    Nasdaq,
}

/// A tradeable instrument. Identity is immutable; the snapshot is refreshed
/// by the cache layer, never by pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub market: MarketVenue,
    pub last_snapshot: Option<PriceSnapshot>,
}

impl Instrument {
    pub fn new(symbol: impl Into<String>, market: MarketVenue) -> Self {
        Self {
            symbol: symbol.into(),
            market,
            last_snapshot: None,
        }
    }
}

/// Latest observed price/volume for an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub price: Decimal,
    pub volume: Decimal,
    pub captured_at: DateTime<Utc>,
}

/// One bar of price history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Recent price history for one instrument, oldest point first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub symbol: String,
    pub points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>) -> Self {
        Self {
            symbol: symbol.into(),
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.close.to_f64().unwrap_or(0.0))
            .collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.volume.to_f64().unwrap_or(0.0))
            .collect()
    }

    /// Fractional price change over the last `lookback` bars.
    /// None if the series is too short or the base close is zero.
    pub fn momentum(&self, lookback: usize) -> Option<f64> {
        if self.points.len() <= lookback {
            return None;
        }
        let closes = self.closes();
        let last = *closes.last()?;
        let base = closes[closes.len() - 1 - lookback];
        if base == 0.0 {
            return None;
        }
        Some((last - base) / base)
    }

    /// Fractional move between the last bars at or before each instant.
    /// None if no bar precedes `start` or the base close is zero.
    pub fn return_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Option<f64> {
        let close_at = |at: DateTime<Utc>| {
            self.points
                .iter()
                .rev()
                .find(|p| p.timestamp <= at)
                .map(|p| p.close.to_f64().unwrap_or(0.0))
        };
        let base = close_at(start)?;
        let last = close_at(end)?;
        if base == 0.0 {
            return None;
        }
        Some((last - base) / base)
    }

    /// Average volume over the last `lookback` bars
    pub fn avg_volume(&self, lookback: usize) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let volumes = self.volumes();
        let n = lookback.min(volumes.len());
        let tail = &volumes[volumes.len() - n..];
        Some(tail.iter().sum::<f64>() / n as f64)
    }
}

/// Pipeline stage that produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStage {
    Screening,
    PatternMatching,
    Validation,
}

/// One strategy's contribution to a candidate's aggregate score,
/// captured together with the weight snapshot used that run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyContribution {
    pub strategy_id: String,
    pub score: f64,
    pub weight: f64,
}

/// An instrument under evaluation, scored in [0, 100].
/// Immutable once created; the next run supersedes it with a fresh record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub id: Uuid,
    pub symbol: String,
    pub score: f64,
    pub stage: PipelineStage,
    pub contributions: Vec<StrategyContribution>,
    pub scored_at: DateTime<Utc>,
}

impl ScoredCandidate {
    /// Weighted average of the contributions, clamped into [0, 100]
    pub fn aggregate(contributions: &[StrategyContribution]) -> f64 {
        let weight_sum: f64 = contributions.iter().map(|c| c.weight).sum();
        if weight_sum <= 0.0 {
            return 0.0;
        }
        let weighted: f64 = contributions.iter().map(|c| c.score * c.weight).sum();
        (weighted / weight_sum).clamp(0.0, 100.0)
    }

    /// The single strongest strategy contribution, used for tie-breaking
    pub fn top_contribution(&self) -> f64 {
        self.contributions
            .iter()
            .map(|c| c.score)
            .fold(0.0, f64::max)
    }

    /// Identifier of the strategy contributing the highest individual score
    pub fn dominant_strategy(&self) -> Option<&str> {
        self.contributions
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|c| c.strategy_id.as_str())
    }
}

/// Tone of a delivered message, from strongest positive to strongest caution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalTone {
    StrongPositive,
    PositiveMomentum,
    NeutralWatch,
    PullbackRisk,
    ElevatedRisk,
}

/// One score band of the message table. Text comes from a bounded,
/// pre-approved vocabulary, never generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBucket {
    /// Inclusive lower bound
    pub min: f64,
    /// Exclusive upper bound (inclusive for the final bucket)
    pub max: f64,
    pub tone: SignalTone,
    pub headline: String,
    pub description: String,
    pub action_hint: String,
    pub risk_note: String,
}

/// A finalized, user-deliverable recommendation. Read-only once issued;
/// must not be re-issued after expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub candidate: ScoredCandidate,
    pub bucket: MessageBucket,
    /// Experiment variant the issuing run was executed under, if any
    #[serde(default)]
    pub variant: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Signal {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Why an instrument was dropped without a score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    FetchFailed,
    InsufficientHistory,
    VolumeBelowMinimum,
    MomentumBelowMinimum,
    /// Data was available but no active strategy produced a score
    NoStrategyScores,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SkipReason::FetchFailed => "fetch failed",
            SkipReason::InsufficientHistory => "insufficient history",
            SkipReason::VolumeBelowMinimum => "volume below minimum",
            SkipReason::MomentumBelowMinimum => "momentum below minimum",
            SkipReason::NoStrategyScores => "no strategy scores",
        };
        f.write_str(s)
    }
}

/// Feature bundle handed to the external scoring assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub symbol: String,
    pub features: std::collections::HashMap<String, f64>,
}

/// Recommendation returned by the external scoring assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub score: f64,
    pub rationale: String,
}

/// Sticky experiment group membership. Created once per user and never
/// reassigned, so variant comparisons stay valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub user_id: String,
    pub variant: String,
    pub assigned_at: DateTime<Utc>,
}

/// Tracks whether an issued signal turned out to be right.
/// Realized fields are filled in by the feedback loop once the horizon passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub strategy_id: String,
    pub symbol: String,
    /// Experiment variant the signal was issued under, if any
    #[serde(default)]
    pub variant: Option<String>,
    pub expected_return: f64,
    pub realized_return: Option<f64>,
    pub accuracy: Option<f64>,
    pub issued_at: DateTime<Utc>,
    pub validated_at: Option<DateTime<Utc>>,
}

impl OutcomeRecord {
    /// Expected fractional return implied by a score: neutral at 50,
    /// +5% at a perfect 100, symmetric below.
    pub fn expected_return_for(score: f64) -> f64 {
        (score - 50.0) / 1000.0
    }

    /// Accuracy of an expectation against the realized move, in [0, 1].
    /// A zero expectation has nothing to be right or wrong about; score it 0.5.
    pub fn score_accuracy(expected: f64, realized: f64) -> f64 {
        if expected == 0.0 {
            return 0.5;
        }
        (1.0 - (realized - expected).abs() / expected.abs()).clamp(0.0, 1.0)
    }

    pub fn is_pending(&self) -> bool {
        self.realized_return.is_none()
    }
}
