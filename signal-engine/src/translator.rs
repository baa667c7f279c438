// Message Translator
// Maps a numeric score into one of a fixed set of pre-approved message
// buckets. Never free-form text; the table is validated before the engine
// accepts any traffic.

use common::{EngineError, MessageBucket, SignalTone};
use serde::{Deserialize, Serialize};

/// Ordered score-to-message table plus the compliance vocabulary filter.
///
/// Buckets use an inclusive lower bound and exclusive upper bound; the final
/// bucket is inclusive at 100 so the table partitions [0, 100] exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTable {
    pub buckets: Vec<MessageBucket>,
    /// Appended to every rendered message
    pub disclaimer: String,
    /// Directive terms no template may contain
    pub prohibited_terms: Vec<String>,
}

impl Default for MessageTable {
    fn default() -> Self {
        let bucket = |min: f64,
                      max: f64,
                      tone: SignalTone,
                      headline: &str,
                      description: &str,
                      action_hint: &str,
                      risk_note: &str| MessageBucket {
            min,
            max,
            tone,
            headline: headline.to_string(),
            description: description.to_string(),
            action_hint: action_hint.to_string(),
            risk_note: risk_note.to_string(),
        };

        Self {
            buckets: vec![
                bucket(
                    0.0,
                    50.0,
                    SignalTone::ElevatedRisk,
                    "Strong caution signal",
                    "Several indicators are flagging negative readings",
                    "A position review is strongly suggested",
                    "Further downside remains possible",
                ),
                bucket(
                    50.0,
                    70.0,
                    SignalTone::PullbackRisk,
                    "Pullback likelihood rising",
                    "Downward pressure has been detected",
                    "A risk-management check may be appropriate",
                    "Loss-limiting approaches are worth considering",
                ),
                bucket(
                    70.0,
                    85.0,
                    SignalTone::NeutralWatch,
                    "Direction unclear",
                    "No clear trend has formed",
                    "Waiting for further signals is suggested",
                    "Premature conclusions carry risk",
                ),
                bucket(
                    85.0,
                    95.0,
                    SignalTone::PositiveMomentum,
                    "Positive momentum continues",
                    "Upward momentum is holding",
                    "Adding to a watchlist could be considered",
                    "Broader market conditions warrant attention",
                ),
                bucket(
                    95.0,
                    100.0,
                    SignalTone::StrongPositive,
                    "Strong upside signal detected",
                    "Multiple technical indicators are aligned positively",
                    "A portfolio weight review may be worth considering",
                    "Short-term volatility is always present",
                ),
            ],
            disclaimer: "This information is provided for reference only; \
                         investment decisions and their outcomes remain the \
                         responsibility of the investor."
                .to_string(),
            prohibited_terms: vec![
                "buy".to_string(),
                "sell".to_string(),
                "guaranteed".to_string(),
                "must".to_string(),
                "act now".to_string(),
            ],
        }
    }
}

impl MessageTable {
    /// Startup check: the buckets partition [0, 100] with no gap or overlap,
    /// and no template contains a prohibited directive term. A table failing
    /// this check blocks pipeline activation.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.buckets.is_empty() {
            return Err(EngineError::UnrangedScore("table is empty".into()));
        }

        let mut sorted: Vec<&MessageBucket> = self.buckets.iter().collect();
        sorted.sort_by(|a, b| a.min.partial_cmp(&b.min).unwrap_or(std::cmp::Ordering::Equal));

        for bucket in &sorted {
            if !(bucket.min < bucket.max) {
                return Err(EngineError::UnrangedScore(format!(
                    "bucket `{}` has empty range [{}, {})",
                    bucket.headline, bucket.min, bucket.max
                )));
            }
        }
        if sorted[0].min != 0.0 {
            return Err(EngineError::UnrangedScore(format!(
                "coverage starts at {} instead of 0",
                sorted[0].min
            )));
        }
        if sorted[sorted.len() - 1].max != 100.0 {
            return Err(EngineError::UnrangedScore(format!(
                "coverage ends at {} instead of 100",
                sorted[sorted.len() - 1].max
            )));
        }
        for pair in sorted.windows(2) {
            if pair[0].max > pair[1].min {
                return Err(EngineError::UnrangedScore(format!(
                    "buckets `{}` and `{}` overlap at {}",
                    pair[0].headline, pair[1].headline, pair[1].min
                )));
            }
            if pair[0].max < pair[1].min {
                return Err(EngineError::UnrangedScore(format!(
                    "gap between {} and {}",
                    pair[0].max, pair[1].min
                )));
            }
        }

        for bucket in &self.buckets {
            for text in [
                &bucket.headline,
                &bucket.description,
                &bucket.action_hint,
                &bucket.risk_note,
            ] {
                let lower = text.to_lowercase();
                for term in &self.prohibited_terms {
                    if lower.contains(&term.to_lowercase()) {
                        return Err(EngineError::ProhibitedTerm {
                            bucket: bucket.headline.clone(),
                            term: term.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Total over [0, 100] once `validate` has passed. The topmost bucket is
    /// closed at 100 so a perfect score still maps.
    pub fn translate(&self, score: f64) -> Result<&MessageBucket, EngineError> {
        self.buckets
            .iter()
            .find(|b| score >= b.min && (score < b.max || (b.max == 100.0 && score <= b.max)))
            .ok_or_else(|| EngineError::UnrangedScore(format!("score {score} out of range")))
    }

    /// Full user-facing text for a bucket, disclaimer included
    pub fn render(&self, bucket: &MessageBucket) -> String {
        format!(
            "{}. {}. {}. {}. {}",
            bucket.headline,
            bucket.description,
            bucket.action_hint,
            bucket.risk_note,
            self.disclaimer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_valid() {
        MessageTable::default().validate().unwrap();
    }

    #[test]
    fn every_score_maps_to_exactly_one_bucket() {
        let table = MessageTable::default();
        let mut score = 0.0;
        while score <= 100.0 {
            let matches = table
                .buckets
                .iter()
                .filter(|b| score >= b.min && (score < b.max || (b.max == 100.0 && score <= b.max)))
                .count();
            assert_eq!(matches, 1, "score {score} matched {matches} buckets");
            table.translate(score).unwrap();
            score += 0.5;
        }
    }

    #[test]
    fn boundaries_land_in_the_upper_bucket() {
        let table = MessageTable::default();
        assert_eq!(table.translate(85.0).unwrap().tone, SignalTone::PositiveMomentum);
        assert_eq!(table.translate(84.999).unwrap().tone, SignalTone::NeutralWatch);
        assert_eq!(table.translate(100.0).unwrap().tone, SignalTone::StrongPositive);
        assert_eq!(table.translate(0.0).unwrap().tone, SignalTone::ElevatedRisk);
    }

    #[test]
    fn gap_is_rejected() {
        let mut table = MessageTable::default();
        table.buckets[1].min = 55.0; // leaves (50, 55) uncovered
        assert!(matches!(
            table.validate(),
            Err(EngineError::UnrangedScore(_))
        ));
    }

    #[test]
    fn overlap_is_rejected() {
        let mut table = MessageTable::default();
        table.buckets[0].max = 60.0; // overlaps the second bucket
        assert!(matches!(
            table.validate(),
            Err(EngineError::UnrangedScore(_))
        ));
    }

    #[test]
    fn short_coverage_is_rejected() {
        let mut table = MessageTable::default();
        table.buckets.pop();
        assert!(matches!(
            table.validate(),
            Err(EngineError::UnrangedScore(_))
        ));
    }

    #[test]
    fn prohibited_term_is_rejected() {
        let mut table = MessageTable::default();
        table.buckets[4].action_hint = "Strong buy opportunity".to_string();
        assert!(matches!(
            table.validate(),
            Err(EngineError::ProhibitedTerm { .. })
        ));
    }

    #[test]
    fn out_of_range_score_is_unranged() {
        let table = MessageTable::default();
        assert!(table.translate(101.0).is_err());
        assert!(table.translate(-1.0).is_err());
    }

    #[test]
    fn render_appends_disclaimer() {
        let table = MessageTable::default();
        let bucket = table.translate(90.0).unwrap();
        let text = table.render(bucket);
        assert!(text.contains("reference only"));
    }
}
