use thiserror::Error;

/// Error taxonomy for the signal engine core.
///
/// Recovery policy per variant:
/// - `FetchFailed` is recovered locally via the cache's stale fallback when a
///   prior value exists, otherwise surfaced to the calling stage.
/// - `UnrangedScore` and `ProhibitedTerm` are configuration defects, fatal at
///   startup; the pipeline refuses to activate on them.
/// - `StaleAssignmentConflict` is rejected; the original assignment wins.
/// - `CycleAborted` leaves no state mutated; the cycle retries next schedule.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fetch failed for `{key}`: {reason}")]
    FetchFailed { key: String, reason: String },

    #[error("message table does not cover all scores: {0}")]
    UnrangedScore(String),

    #[error("bucket `{bucket}` contains prohibited term `{term}`")]
    ProhibitedTerm { bucket: String, term: String },

    #[error("user `{user_id}` already assigned to `{held}`, refusing `{requested}`")]
    StaleAssignmentConflict {
        user_id: String,
        held: String,
        requested: String,
    },

    #[error("feedback cycle aborted during {phase}: {reason}")]
    CycleAborted { phase: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EngineError {
    pub fn fetch_failed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FetchFailed {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
