//! Canonical feature row encoding
//!
//! Two wire forms carry a [`CanonicalFeatureRow`]:
//! - CSV: a header line with the 16 feature names in canonical order and one
//!   data line; absent values are written as `NaN`
//! - JSON: an object with the 16 keys; absent values are `null`

use csv::{ReaderBuilder, Terminator, Trim, WriterBuilder};
use tracing::warn;

use crate::error::ScreeningError;
use crate::types::{CanonicalFeatureRow, Feature};

/// Marker written for absent values
pub const MISSING: &str = "NaN";

/// Header line in canonical order
pub fn csv_header() -> String {
    Feature::ALL
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(",")
}

fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => MISSING.to_string(),
    }
}

/// Write a header and one data record, mapping each field through `cell`
pub(crate) fn write_csv<F>(cell: F) -> Result<String, ScreeningError>
where
    F: Fn(Feature) -> String,
{
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    let csv_err = |e: csv::Error| ScreeningError::MalformedPayload(e.to_string());

    writer
        .write_record(Feature::ALL.iter().map(|f| f.name()))
        .map_err(csv_err)?;
    writer
        .write_record(Feature::ALL.iter().map(|f| cell(*f)))
        .map_err(csv_err)?;

    let bytes = writer
        .into_inner()
        .map_err(|e| ScreeningError::MalformedPayload(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ScreeningError::MalformedPayload(e.to_string()))
}

/// Encode a row as CSV
pub fn to_csv(row: &CanonicalFeatureRow) -> Result<String, ScreeningError> {
    write_csv(|f| format_value(row.get(f)))
}

fn parse_cell(feature: Feature, raw: &str) -> Result<Option<f64>, ScreeningError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case(MISSING) {
        return Ok(None);
    }
    let value: f64 = raw.parse().map_err(|_| {
        ScreeningError::MalformedPayload(format!("{}: not a number: {raw:?}", feature.name()))
    })?;
    Ok(value.is_finite().then_some(value))
}

/// Parse a CSV payload.
///
/// The header names columns by feature; columns may appear in any order and
/// missing columns decode as absent. Only the first data line is read.
pub fn parse_csv(body: &str) -> Result<CanonicalFeatureRow, ScreeningError> {
    if body.trim().is_empty() {
        return Err(ScreeningError::EmptyBody);
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(body.trim().as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| ScreeningError::MalformedPayload(e.to_string()))?
        .clone();

    let mut columns = Vec::with_capacity(headers.len());
    for name in headers.iter() {
        let feature: Feature = name.parse()?;
        if columns.contains(&feature) {
            warn!(column = name, "duplicate CSV column");
            return Err(ScreeningError::MalformedPayload(format!(
                "duplicate column: {name}"
            )));
        }
        columns.push(feature);
    }

    let record = match reader.records().next() {
        Some(record) => record.map_err(|e| ScreeningError::MalformedPayload(e.to_string()))?,
        None => {
            return Err(ScreeningError::MalformedPayload(
                "missing data line".to_string(),
            ))
        }
    };
    if record.len() != columns.len() {
        return Err(ScreeningError::MalformedPayload(format!(
            "expected {} values, found {}",
            columns.len(),
            record.len()
        )));
    }

    let mut row = CanonicalFeatureRow::new();
    for (feature, raw) in columns.iter().zip(record.iter()) {
        row.set_opt(*feature, parse_cell(*feature, raw)?);
    }
    Ok(row)
}

/// Encode a row as a JSON object
pub fn to_json(row: &CanonicalFeatureRow) -> Result<String, ScreeningError> {
    Ok(serde_json::to_string(row)?)
}

/// Parse a JSON object; missing keys decode as absent
pub fn parse_json(body: &str) -> Result<CanonicalFeatureRow, ScreeningError> {
    if body.trim().is_empty() {
        return Err(ScreeningError::EmptyBody);
    }
    let value: serde_json::Value = serde_json::from_str(body)?;
    let Some(object) = value.as_object() else {
        return Err(ScreeningError::MalformedPayload(
            "expected a JSON object".to_string(),
        ));
    };

    let mut row = CanonicalFeatureRow::new();
    for (key, value) in object {
        let feature: Feature = key.parse()?;
        let parsed = match value {
            serde_json::Value::Null => None,
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => parse_cell(feature, s.trim())?,
            other => {
                return Err(ScreeningError::MalformedPayload(format!(
                    "{key}: expected a number, found {other}"
                )))
            }
        };
        row.set_opt(feature, parsed);
    }
    Ok(row)
}

/// Copy of `row` with the label field removed, as sent for prediction
pub fn masked_for_prediction(row: &CanonicalFeatureRow) -> CanonicalFeatureRow {
    let mut masked = row.clone();
    masked.clear(Feature::AdhdStatus);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_row() -> CanonicalFeatureRow {
        CanonicalFeatureRow::new()
            .with(Feature::Age, 9.0)
            .with(Feature::PlaytimeMin, 2.5)
            .with(Feature::SessionIncomplete, 0.0)
            .with(Feature::ScEr, 12.5)
            .with(Feature::WfsRt, 8.34)
            .with(Feature::FtMmv, 1.27)
    }

    #[test]
    fn test_csv_layout() {
        let csv = to_csv(&sample_row()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], csv_header());
        assert_eq!(
            lines[1],
            "9,NaN,2.5,0,12.5,NaN,NaN,NaN,NaN,NaN,8.34,NaN,NaN,1.27,NaN,NaN"
        );
    }

    #[test]
    fn test_csv_round_trip() {
        let row = sample_row();
        assert_eq!(parse_csv(&to_csv(&row).unwrap()).unwrap(), row);
    }

    #[test]
    fn test_parse_csv_any_column_order() {
        let row = parse_csv("sc_er, age\n 40 , 12\n").unwrap();
        assert_eq!(row.age, Some(12.0));
        assert_eq!(row.sc_er, Some(40.0));
        assert_eq!(row.ft_tp, None);
    }

    #[test]
    fn test_parse_csv_errors() {
        assert!(matches!(parse_csv("  \n"), Err(ScreeningError::EmptyBody)));
        assert!(matches!(
            parse_csv(&csv_header()),
            Err(ScreeningError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_csv("age,shoe_size\n9,40"),
            Err(ScreeningError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_csv("age,age\n9,9"),
            Err(ScreeningError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_csv("age,sc_er\n9"),
            Err(ScreeningError::MalformedPayload(_))
        ));
        assert!(matches!(
            parse_csv("age,sc_er\n9,lots"),
            Err(ScreeningError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_json_round_trip_and_nulls() {
        let row = sample_row();
        let json = to_json(&row).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["adhd_status"].is_null());
        assert_eq!(value["sc_er"], 12.5);
        assert_eq!(parse_json(&json).unwrap(), row);
    }

    #[test]
    fn test_parse_json_accepts_nan_strings() {
        let row = parse_json(r#"{"age": 10, "sc_er": "NaN", "wfs_rt": "7.5"}"#).unwrap();
        assert_eq!(row.age, Some(10.0));
        assert_eq!(row.sc_er, None);
        assert_eq!(row.wfs_rt, Some(7.5));
    }

    #[test]
    fn test_parse_json_errors() {
        assert!(matches!(parse_json(""), Err(ScreeningError::EmptyBody)));
        assert!(matches!(parse_json("[1,2]"), Err(ScreeningError::MalformedPayload(_))));
        assert!(matches!(parse_json("{oops"), Err(ScreeningError::JsonError(_))));
        assert!(matches!(
            parse_json(r#"{"age": true}"#),
            Err(ScreeningError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_masking_drops_label_only() {
        let row = sample_row().with(Feature::AdhdStatus, 1.0);
        let masked = masked_for_prediction(&row);
        assert_eq!(masked.adhd_status, None);
        assert_eq!(masked.age, row.age);
        assert_eq!(masked.ft_mmv, row.ft_mmv);
    }
}
