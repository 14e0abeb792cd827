//! Metrics aggregation
//!
//! Folds the per-game [`SessionMetrics`] records of one screening into a
//! single [`CanonicalFeatureRow`].
//!
//! Merge rules:
//! - `age`: taken from the first record that carries it
//! - `playtime_min`: summed over the records that carry it
//! - `session_incomplete`: maximum across records
//! - `adhd_status`: never written
//! - every other field: the last present value wins

use tracing::debug;

use crate::types::{CanonicalFeatureRow, Feature, SessionMetrics};

/// Incremental aggregator over session records
#[derive(Debug, Clone, Default)]
pub struct MetricsAggregator {
    row: CanonicalFeatureRow,
    records: usize,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one session's record
    pub fn push(&mut self, metrics: &SessionMetrics) {
        debug!(game = %metrics.game, session_id = %metrics.session_id, "aggregating session");
        self.push_row(&metrics.features);
    }

    /// Merge a bare feature row
    pub fn push_row(&mut self, features: &CanonicalFeatureRow) {
        for feature in Feature::ALL {
            let Some(value) = features.get(feature) else {
                continue;
            };
            match feature {
                Feature::AdhdStatus => {}
                Feature::Age => {
                    if self.row.age.is_none() {
                        self.row.set(feature, value);
                    }
                }
                Feature::PlaytimeMin => {
                    let total = self.row.playtime_min.unwrap_or(0.0) + value;
                    self.row.set(feature, total);
                }
                Feature::SessionIncomplete => {
                    let max = self.row.session_incomplete.map_or(value, |v| v.max(value));
                    self.row.set(feature, max);
                }
                _ => self.row.set(feature, value),
            }
        }
        self.records += 1;
    }

    /// Number of records merged so far
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Current merged row
    pub fn row(&self) -> &CanonicalFeatureRow {
        &self.row
    }

    pub fn finish(self) -> CanonicalFeatureRow {
        self.row
    }
}

/// Aggregate session records into one canonical row.
///
/// An empty input yields a row with every field absent.
pub fn aggregate(records: &[SessionMetrics]) -> CanonicalFeatureRow {
    let mut aggregator = MetricsAggregator::new();
    for record in records {
        aggregator.push(record);
    }
    aggregator.finish()
}

/// Aggregate bare feature rows with the same merge rules as [`aggregate`]
pub fn aggregate_rows<'a, I>(rows: I) -> CanonicalFeatureRow
where
    I: IntoIterator<Item = &'a CanonicalFeatureRow>,
{
    let mut aggregator = MetricsAggregator::new();
    for row in rows {
        aggregator.push_row(row);
    }
    aggregator.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GameDetails, GameKind};
    use pretty_assertions::assert_eq;

    fn target_pop_record() -> SessionMetrics {
        let features = CanonicalFeatureRow::new()
            .with(Feature::Age, 9.0)
            .with(Feature::PlaytimeMin, 0.5)
            .with(Feature::SessionIncomplete, 0.0)
            .with(Feature::ScEr, 10.0)
            .with(Feature::ScDe, 2.0)
            .with(Feature::ScTct, 30.0)
            .with(Feature::ScRtv, 85.0);
        SessionMetrics::new(
            GameKind::TargetPop,
            9,
            features,
            GameDetails::TargetPop {
                score: 27,
                rounds_played: 30,
                errors: 4,
                wrong_target_clicks: 3,
                distractor_clicks: 1,
                distraction_events: 0,
                mean_reaction_ms: 540.0,
            },
        )
    }

    fn signal_gating_record() -> SessionMetrics {
        let features = CanonicalFeatureRow::new()
            .with(Feature::Age, 9.0)
            .with(Feature::PlaytimeMin, 2.0)
            .with(Feature::SessionIncomplete, 1.0)
            .with(Feature::WfsFpr, 5.0)
            .with(Feature::WfsPrc, 10.0)
            .with(Feature::WfsRt, 8.0)
            .with(Feature::WfsGs, 4.0);
        SessionMetrics::new(
            GameKind::SignalGating,
            9,
            features,
            GameDetails::SignalGating {
                successful_launches: 2,
                target_launches: 5,
                false_positives: 1,
                premature_responses: 2,
                gaze_shifts_total: 2,
                mean_reaction_ms: 400.0,
                elapsed_ms: 120_000,
            },
        )
    }

    #[test]
    fn test_single_record_is_identity() {
        let record = target_pop_record();
        assert_eq!(aggregate(std::slice::from_ref(&record)), record.features);
    }

    #[test]
    fn test_merge_rules() {
        let row = aggregate(&[target_pop_record(), signal_gating_record()]);
        assert_eq!(row.age, Some(9.0));
        assert_eq!(row.playtime_min, Some(2.5));
        assert_eq!(row.session_incomplete, Some(1.0));
        assert_eq!(row.sc_er, Some(10.0));
        assert_eq!(row.wfs_prc, Some(10.0));
        assert_eq!(row.adhd_status, None);
        assert_eq!(row.ft_cf, None);
    }

    #[test]
    fn test_age_from_first_record() {
        let first = CanonicalFeatureRow::new().with(Feature::Age, 7.0);
        let second = CanonicalFeatureRow::new().with(Feature::Age, 8.0);
        assert_eq!(aggregate_rows([&first, &second]).age, Some(7.0));
    }

    #[test]
    fn test_last_value_wins() {
        let first = CanonicalFeatureRow::new().with(Feature::FtCf, 12.0);
        let second = CanonicalFeatureRow::new().with(Feature::FtCf, 20.0);
        assert_eq!(aggregate_rows([&first, &second]).ft_cf, Some(20.0));
    }

    #[test]
    fn test_label_never_written() {
        let row = CanonicalFeatureRow::new().with(Feature::AdhdStatus, 1.0);
        assert!(aggregate_rows([&row]).is_empty());
    }

    #[test]
    fn test_empty_input() {
        let row = aggregate(&[]);
        assert!(row.is_empty());
        assert!(MetricsAggregator::new().is_empty());
    }
}
