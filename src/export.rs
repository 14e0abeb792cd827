//! Local CSV export of an aggregated screening
//!
//! Uses the same 16-column layout as the prediction payload, but fills the
//! label column with a placeholder so the file can be labelled offline. The
//! export can optionally blank out random fields to produce test data with
//! missing values.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::{write_csv, MISSING};
use crate::error::ScreeningError;
use crate::types::{CanonicalFeatureRow, Feature};

/// Default probability of blanking a field when missing-value simulation is on
pub const DEFAULT_MISSING_RATE: f64 = 0.05;

/// Export settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Value written to the `adhd_status` column
    pub label_placeholder: f64,
    /// Per-field probability of writing `NaN` instead of the value
    pub missing_rate: Option<f64>,
    pub seed: u64,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            label_placeholder: 0.0,
            missing_rate: None,
            seed: 0,
        }
    }
}

impl ExportOptions {
    /// Enable missing-value simulation at the default rate
    pub fn with_missing_values(mut self, seed: u64) -> Self {
        self.missing_rate = Some(DEFAULT_MISSING_RATE);
        self.seed = seed;
        self
    }
}

/// Render the export CSV for `row`.
///
/// `age` and `adhd_status` are never blanked.
pub fn export_csv(row: &CanonicalFeatureRow, options: &ExportOptions) -> Result<String, ScreeningError> {
    if let Some(rate) = options.missing_rate {
        if !(0.0..=1.0).contains(&rate) {
            return Err(ScreeningError::ConfigError(format!(
                "missing rate {rate} outside [0, 1]"
            )));
        }
    }

    let mut exported = row.clone();
    exported.set(Feature::AdhdStatus, options.label_placeholder);

    if let Some(rate) = options.missing_rate {
        let mut rng = ChaCha8Rng::seed_from_u64(options.seed);
        let mut blanked = 0usize;
        for feature in Feature::ALL {
            if matches!(feature, Feature::Age | Feature::AdhdStatus) {
                continue;
            }
            if rng.gen::<f64>() < rate {
                exported.clear(feature);
                blanked += 1;
            }
        }
        debug!(blanked, rate, "simulated missing values");
    }

    write_csv(|f| match exported.get(f) {
        Some(v) => v.to_string(),
        None => MISSING.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::parse_csv;

    fn full_row() -> CanonicalFeatureRow {
        let mut row = CanonicalFeatureRow::new();
        for (i, feature) in Feature::ALL.iter().enumerate() {
            if *feature != Feature::AdhdStatus {
                row.set(*feature, i as f64 + 1.0);
            }
        }
        row
    }

    #[test]
    fn test_placeholder_label() {
        let csv = export_csv(&full_row(), &ExportOptions::default()).unwrap();
        let parsed = parse_csv(&csv).unwrap();
        assert_eq!(parsed.adhd_status, Some(0.0));
        assert_eq!(parsed.age, Some(1.0));
        assert_eq!(parsed.ft_tp, Some(16.0));
    }

    #[test]
    fn test_missing_simulation_spares_age_and_label() {
        let options = ExportOptions {
            label_placeholder: 1.0,
            missing_rate: Some(1.0),
            seed: 3,
        };
        let parsed = parse_csv(&export_csv(&full_row(), &options).unwrap()).unwrap();
        assert_eq!(parsed.age, Some(1.0));
        assert_eq!(parsed.adhd_status, Some(1.0));
        assert_eq!(parsed.present(), vec![Feature::Age, Feature::AdhdStatus]);
    }

    #[test]
    fn test_missing_simulation_is_seeded() {
        let options = ExportOptions::default().with_missing_values(99);
        let a = export_csv(&full_row(), &options).unwrap();
        let b = export_csv(&full_row(), &options).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_rate() {
        let options = ExportOptions {
            missing_rate: Some(1.5),
            ..ExportOptions::default()
        };
        assert!(matches!(
            export_csv(&full_row(), &options),
            Err(ScreeningError::ConfigError(_))
        ));
    }
}
