// Signal and outcome storage
// In-memory backends for development and tests; production deployments plug
// a durable store in behind the same traits.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OutcomeRecord, Signal};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage backend for issued signals
#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn store(&self, signal: &Signal) -> Result<()>;

    async fn get(&self, signal_id: Uuid) -> Result<Option<Signal>>;

    /// Signals that have not yet expired
    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<Signal>>;

    async fn all(&self) -> Result<Vec<Signal>>;

    async fn stats(&self) -> Result<StorageStats>;
}

/// Storage backend for outcome records
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Open a record at signal-issue time, realized fields empty
    async fn open(&self, record: &OutcomeRecord) -> Result<()>;

    /// Fill in the realized return and accuracy once known
    async fn complete(
        &self,
        record_id: Uuid,
        realized_return: f64,
        accuracy: f64,
        validated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Records still lacking a realized return, issued before the cutoff
    async fn pending_issued_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OutcomeRecord>>;

    async fn for_strategy(&self, strategy_id: &str) -> Result<Vec<OutcomeRecord>>;

    async fn all(&self) -> Result<Vec<OutcomeRecord>>;
}

#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_signals: usize,
    pub oldest_issue: Option<DateTime<Utc>>,
    pub newest_issue: Option<DateTime<Utc>>,
}

/// In-memory signal storage
pub struct InMemorySignalStore {
    signals: RwLock<HashMap<Uuid, Signal>>,
}

impl InMemorySignalStore {
    pub fn new() -> Self {
        Self {
            signals: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn store(&self, signal: &Signal) -> Result<()> {
        let mut signals = self.signals.write().await;
        signals.insert(signal.id, signal.clone());
        Ok(())
    }

    async fn get(&self, signal_id: Uuid) -> Result<Option<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals.get(&signal_id).cloned())
    }

    async fn active(&self, now: DateTime<Utc>) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals
            .values()
            .filter(|s| !s.is_expired(now))
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<Signal>> {
        let signals = self.signals.read().await;
        Ok(signals.values().cloned().collect())
    }

    async fn stats(&self) -> Result<StorageStats> {
        let signals = self.signals.read().await;
        Ok(StorageStats {
            total_signals: signals.len(),
            oldest_issue: signals.values().map(|s| s.issued_at).min(),
            newest_issue: signals.values().map(|s| s.issued_at).max(),
        })
    }
}

/// In-memory outcome storage
pub struct InMemoryOutcomeStore {
    records: RwLock<HashMap<Uuid, OutcomeRecord>>,
}

impl InMemoryOutcomeStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryOutcomeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutcomeStore for InMemoryOutcomeStore {
    async fn open(&self, record: &OutcomeRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn complete(
        &self,
        record_id: Uuid,
        realized_return: f64,
        accuracy: f64,
        validated_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&record_id)
            .with_context(|| format!("unknown outcome record {record_id}"))?;
        record.realized_return = Some(realized_return);
        record.accuracy = Some(accuracy);
        record.validated_at = Some(validated_at);
        Ok(())
    }

    async fn pending_issued_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<OutcomeRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.is_pending() && r.issued_at <= cutoff)
            .cloned()
            .collect())
    }

    async fn for_strategy(&self, strategy_id: &str) -> Result<Vec<OutcomeRecord>> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.strategy_id == strategy_id)
            .cloned()
            .collect())
    }

    async fn all(&self) -> Result<Vec<OutcomeRecord>> {
        let records = self.records.read().await;
        Ok(records.values().cloned().collect())
    }
}
