//! Screening session orchestration
//!
//! A [`ScreeningSession`] collects the completion records of the three games
//! played by one child, aggregates them into the canonical feature row, and
//! hands that row to export or prediction.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::aggregate::aggregate;
use crate::codec::to_csv;
use crate::config::validate_age;
use crate::error::ScreeningError;
use crate::export::{export_csv, ExportOptions};
use crate::predict::{PredictionClient, PredictionResult, PredictionTransport};
use crate::types::{CanonicalFeatureRow, GameKind, SessionMetrics};

/// All games recorded for one child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningSession {
    id: Uuid,
    age: u8,
    started_at: DateTime<Utc>,
    records: Vec<SessionMetrics>,
}

impl ScreeningSession {
    /// Start a screening for a child of `age` (4-17)
    pub fn new(age: i64) -> Result<Self, ScreeningError> {
        let age = validate_age(age)?;
        Ok(Self {
            id: Uuid::new_v4(),
            age,
            started_at: Utc::now(),
            records: Vec::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn age(&self) -> u8 {
        self.age
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn records(&self) -> &[SessionMetrics] {
        &self.records
    }

    /// Add a finished game's record
    pub fn record(&mut self, metrics: SessionMetrics) -> Result<(), ScreeningError> {
        if metrics.age != self.age {
            warn!(expected = self.age, got = metrics.age, "record for a different age");
            return Err(ScreeningError::AgeMismatch {
                expected: self.age,
                got: metrics.age,
            });
        }
        info!(
            screening_id = %self.id,
            game = %metrics.game,
            incomplete = metrics.session_incomplete(),
            "game recorded"
        );
        self.records.push(metrics);
        Ok(())
    }

    /// Games with at least one record
    pub fn completed_games(&self) -> Vec<GameKind> {
        let played: BTreeSet<GameKind> = self.records.iter().map(|r| r.game).collect();
        played.into_iter().collect()
    }

    /// Games still to be played
    pub fn remaining_games(&self) -> Vec<GameKind> {
        let completed = self.completed_games();
        GameKind::ALL
            .iter()
            .copied()
            .filter(|k| !completed.contains(k))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.remaining_games().is_empty()
    }

    /// Merge all records into one canonical row
    pub fn aggregate(&self) -> CanonicalFeatureRow {
        aggregate(&self.records)
    }

    /// Aggregated row as a CSV payload
    pub fn to_csv(&self) -> Result<String, ScreeningError> {
        to_csv(&self.aggregate())
    }

    /// Aggregated row in the local export layout
    pub fn export_csv(&self, options: &ExportOptions) -> Result<String, ScreeningError> {
        export_csv(&self.aggregate(), options)
    }

    /// Request a prediction; all three games must have been played
    pub fn predict<T: PredictionTransport>(
        &self,
        client: &PredictionClient<T>,
    ) -> Result<PredictionResult, ScreeningError> {
        let remaining = self.remaining_games();
        if !remaining.is_empty() {
            let names: Vec<&str> = remaining.iter().map(|k| k.as_str()).collect();
            return Err(ScreeningError::SessionNotFinished(format!(
                "games not played: {}",
                names.join(", ")
            )));
        }
        client.predict(&self.aggregate())
    }

    /// Serialize the screening for later resumption
    pub fn save(&self) -> Result<String, ScreeningError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Restore a screening saved with [`ScreeningSession::save`].
    ///
    /// The stored records are held to the same age check as [`record`](Self::record).
    pub fn load(json: &str) -> Result<Self, ScreeningError> {
        let session: Self = serde_json::from_str(json)?;
        validate_age(session.age as i64)?;
        if let Some(stray) = session.records.iter().find(|r| r.age != session.age) {
            warn!(expected = session.age, got = stray.age, "saved record for a different age");
            return Err(ScreeningError::AgeMismatch {
                expected: session.age,
                got: stray.age,
            });
        }
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::games::{
        SessionEngine, SignalGatingEngine, TargetPopEngine, ThreatLockEngine,
    };
    use crate::predict::{PredictionConfig, PredictionRequest, TransportResponse};

    struct CannedTransport;

    impl PredictionTransport for CannedTransport {
        fn post(
            &self,
            _url: &str,
            _request: &PredictionRequest,
        ) -> Result<TransportResponse, ScreeningError> {
            Ok(TransportResponse {
                status: 200,
                body: r#"{"prediction": 0, "probability": 0.23}"#.to_string(),
            })
        }
    }

    fn finished<E: SessionEngine>(mut engine: E, until: u64) -> SessionMetrics {
        engine.start(0);
        engine.advance(until);
        engine.abort(until);
        engine.take_metrics().unwrap()
    }

    #[test]
    fn test_rejects_out_of_range_age() {
        assert!(matches!(
            ScreeningSession::new(3),
            Err(ScreeningError::AgeOutOfRange(3))
        ));
        assert!(ScreeningSession::new(18).is_err());
        assert!(ScreeningSession::new(4).is_ok());
    }

    #[test]
    fn test_full_screening() {
        let mut session = ScreeningSession::new(8).unwrap();
        assert_eq!(session.remaining_games(), GameKind::ALL.to_vec());

        session
            .record(finished(TargetPopEngine::new(8, 1), 60_000))
            .unwrap();
        session
            .record(finished(SignalGatingEngine::new(8, 2), 120_000))
            .unwrap();
        assert!(!session.is_complete());

        let client = PredictionClient::with_transport(
            PredictionConfig::default().with_endpoint("http://localhost/predict"),
            CannedTransport,
        );
        assert!(matches!(
            session.predict(&client),
            Err(ScreeningError::SessionNotFinished(_))
        ));

        session
            .record(finished(ThreatLockEngine::new(8, 3), 10_000))
            .unwrap();
        assert!(session.is_complete());

        let row = session.aggregate();
        assert_eq!(row.age, Some(8.0));
        assert_eq!(row.adhd_status, None);
        assert!(row.sc_er.is_some());
        assert!(row.wfs_fpr.is_some());
        assert!(row.ft_cf.is_some());
        // Threat-Lock was aborted early
        assert_eq!(row.session_incomplete, Some(1.0));

        let result = session.predict(&client).unwrap();
        assert_eq!(result.prediction, 0);
    }

    #[test]
    fn test_playtime_sums_target_pop_and_signal_gating_only() {
        let target_pop = finished(TargetPopEngine::new(10, 5), 90_000);
        let signal_gating = finished(SignalGatingEngine::new(10, 6), 120_000);
        let threat_lock = finished(ThreatLockEngine::new(10, 3), 180_000);
        assert_eq!(threat_lock.features.playtime_min, None);

        let expected = target_pop.features.playtime_min.unwrap()
            + signal_gating.features.playtime_min.unwrap();

        let mut session = ScreeningSession::new(10).unwrap();
        for record in [target_pop, signal_gating, threat_lock] {
            session.record(record).unwrap();
        }
        assert!(session.is_complete());
        assert_eq!(session.aggregate().playtime_min, Some(expected));
    }

    #[test]
    fn test_rejects_mismatched_age() {
        let mut session = ScreeningSession::new(8).unwrap();
        let other = finished(TargetPopEngine::new(12, 1), 1_000);
        assert!(matches!(
            session.record(other),
            Err(ScreeningError::AgeMismatch {
                expected: 8,
                got: 12
            })
        ));
        assert!(session.records().is_empty());
    }

    #[test]
    fn test_load_rejects_record_for_another_age() {
        let mut session = ScreeningSession::new(15).unwrap();
        session
            .record(finished(TargetPopEngine::new(15, 4), 5_000))
            .unwrap();

        let mut saved: serde_json::Value = serde_json::from_str(&session.save().unwrap()).unwrap();
        saved["records"][0]["age"] = serde_json::json!(9);
        let tampered = serde_json::to_string(&saved).unwrap();
        assert!(matches!(
            ScreeningSession::load(&tampered),
            Err(ScreeningError::AgeMismatch {
                expected: 15,
                got: 9
            })
        ));

        saved["records"][0]["age"] = serde_json::json!(15);
        saved["age"] = serde_json::json!(3);
        let tampered = serde_json::to_string(&saved).unwrap();
        assert!(matches!(
            ScreeningSession::load(&tampered),
            Err(ScreeningError::AgeOutOfRange(3))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let mut session = ScreeningSession::new(15).unwrap();
        session
            .record(finished(TargetPopEngine::new(15, 4), 5_000))
            .unwrap();

        let saved = session.save().unwrap();
        let restored = ScreeningSession::load(&saved).unwrap();
        assert_eq!(restored, session);
        assert_eq!(restored.completed_games(), vec![GameKind::TargetPop]);
    }

    #[test]
    fn test_invalid_json() {
        assert!(ScreeningSession::load("not valid json").is_err());
    }
}
