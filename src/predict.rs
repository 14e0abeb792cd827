//! Prediction endpoint client
//!
//! Sends an aggregated, label-masked feature row to the remote classifier and
//! validates its `{prediction, probability}` reply. Requests are blocking and
//! never retried automatically; the caller decides whether to try again
//! (see [`ScreeningError::is_retryable`]).

use std::str::FromStr;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec::{masked_for_prediction, to_csv, to_json};
use crate::error::ScreeningError;
use crate::types::CanonicalFeatureRow;

pub const ENV_URL: &str = "STELLAR_PREDICT_URL";
pub const ENV_ENCODING: &str = "STELLAR_PREDICT_ENCODING";
pub const ENV_TIMEOUT_MS: &str = "STELLAR_PREDICT_TIMEOUT_MS";

/// Generous default so a cold-starting endpoint can answer
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Body format of a prediction request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionEncoding {
    /// Header plus one data line, sent as `text/plain`
    #[default]
    Csv,
    Json,
}

impl PredictionEncoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            PredictionEncoding::Csv => "text/plain",
            PredictionEncoding::Json => "application/json",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionEncoding::Csv => "csv",
            PredictionEncoding::Json => "json",
        }
    }
}

impl FromStr for PredictionEncoding {
    type Err = ScreeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" | "text/plain" | "text/csv" => Ok(PredictionEncoding::Csv),
            "json" | "application/json" => Ok(PredictionEncoding::Json),
            other => Err(ScreeningError::UnsupportedEncoding(other.to_string())),
        }
    }
}

/// Endpoint settings
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionConfig {
    pub endpoint: Option<String>,
    pub encoding: PredictionEncoding,
    pub timeout: Duration,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            encoding: PredictionEncoding::default(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl PredictionConfig {
    /// Read settings from `STELLAR_PREDICT_*` environment variables
    pub fn from_env() -> Result<Self, ScreeningError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ScreeningError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let endpoint = get(ENV_URL).map(|v| v.trim().to_string());
        let encoding = match get(ENV_ENCODING) {
            Some(v) => v.parse()?,
            None => PredictionEncoding::default(),
        };
        let timeout_ms = match get(ENV_TIMEOUT_MS) {
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                ScreeningError::ConfigError(format!("{ENV_TIMEOUT_MS} must be an integer, got {v:?}"))
            })?,
            None => DEFAULT_TIMEOUT_MS,
        };

        Ok(Self {
            endpoint,
            encoding,
            timeout: Duration::from_millis(timeout_ms),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_encoding(mut self, encoding: PredictionEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn require_endpoint(&self) -> Result<&str, ScreeningError> {
        self.endpoint
            .as_deref()
            .ok_or_else(|| ScreeningError::ConfigError(format!("{ENV_URL} is not set")))
    }
}

/// An encoded request body
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRequest {
    pub content_type: &'static str,
    pub body: String,
}

/// Raw reply from the transport
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// Delivers a request to the endpoint
pub trait PredictionTransport {
    fn post(&self, url: &str, request: &PredictionRequest)
        -> Result<TransportResponse, ScreeningError>;
}

/// Blocking HTTP transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ScreeningError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ScreeningError::ConfigError(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl PredictionTransport for HttpTransport {
    fn post(
        &self,
        url: &str,
        request: &PredictionRequest,
    ) -> Result<TransportResponse, ScreeningError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, request.content_type)
            .body(request.body.clone())
            .send()
            .map_err(|e| ScreeningError::PredictionTransport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|e| ScreeningError::PredictionTransport(e.to_string()))?;
        Ok(TransportResponse { status, body })
    }
}

/// Validated classifier output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// 1 when the screening is flagged, 0 otherwise
    pub prediction: u8,
    /// Probability of the positive class
    pub probability: f64,
}

impl PredictionResult {
    pub fn is_positive(&self) -> bool {
        self.prediction == 1
    }
}

#[derive(Debug, Deserialize)]
struct RawPrediction {
    prediction: f64,
    probability: f64,
}

/// Parse and validate an endpoint reply body
pub fn parse_prediction(body: &str) -> Result<PredictionResult, ScreeningError> {
    if body.trim().is_empty() {
        return Err(ScreeningError::InvalidPrediction(
            "empty response body".to_string(),
        ));
    }
    let raw: RawPrediction = serde_json::from_str(body)
        .map_err(|e| ScreeningError::InvalidPrediction(e.to_string()))?;

    let prediction = if raw.prediction == 0.0 {
        0
    } else if raw.prediction == 1.0 {
        1
    } else {
        return Err(ScreeningError::InvalidPrediction(format!(
            "prediction must be 0 or 1, got {}",
            raw.prediction
        )));
    };
    if !(0.0..=1.0).contains(&raw.probability) {
        return Err(ScreeningError::InvalidPrediction(format!(
            "probability must be within [0, 1], got {}",
            raw.probability
        )));
    }

    Ok(PredictionResult {
        prediction,
        probability: raw.probability,
    })
}

/// Client for the prediction endpoint
#[derive(Debug, Clone)]
pub struct PredictionClient<T = HttpTransport> {
    config: PredictionConfig,
    transport: T,
}

impl PredictionClient<HttpTransport> {
    /// HTTP client configured from the environment
    pub fn from_env() -> Result<Self, ScreeningError> {
        Self::new(PredictionConfig::from_env()?)
    }

    pub fn new(config: PredictionConfig) -> Result<Self, ScreeningError> {
        let transport = HttpTransport::new(config.timeout)?;
        Ok(Self { config, transport })
    }
}

impl<T: PredictionTransport> PredictionClient<T> {
    pub fn with_transport(config: PredictionConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Encode the label-masked row in the configured format
    pub fn encode(&self, row: &CanonicalFeatureRow) -> Result<PredictionRequest, ScreeningError> {
        let masked = masked_for_prediction(row);
        let body = match self.config.encoding {
            PredictionEncoding::Csv => to_csv(&masked)?,
            PredictionEncoding::Json => to_json(&masked)?,
        };
        Ok(PredictionRequest {
            content_type: self.config.encoding.content_type(),
            body,
        })
    }

    /// Request a prediction for `row`
    pub fn predict(&self, row: &CanonicalFeatureRow) -> Result<PredictionResult, ScreeningError> {
        let url = self.config.require_endpoint()?;
        let request = self.encode(row)?;

        let result = self
            .transport
            .post(url, &request)
            .and_then(|response| {
                if !(200..300).contains(&response.status) {
                    return Err(ScreeningError::PredictionStatus {
                        status: response.status,
                        body: response.body,
                    });
                }
                parse_prediction(&response.body)
            });

        match &result {
            Ok(prediction) => info!(
                prediction = prediction.prediction,
                probability = prediction.probability,
                encoding = self.config.encoding.as_str(),
                "prediction received"
            ),
            Err(e) => warn!(error = %e, retryable = e.is_retryable(), "prediction failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Feature;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeTransport {
        reply: Result<TransportResponse, String>,
        sent: RefCell<Vec<(String, PredictionRequest)>>,
    }

    impl FakeTransport {
        fn replying(status: u16, body: &str) -> Self {
            Self {
                reply: Ok(TransportResponse {
                    status,
                    body: body.to_string(),
                }),
                sent: RefCell::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                reply: Err(message.to_string()),
                sent: RefCell::new(Vec::new()),
            }
        }
    }

    impl PredictionTransport for FakeTransport {
        fn post(
            &self,
            url: &str,
            request: &PredictionRequest,
        ) -> Result<TransportResponse, ScreeningError> {
            self.sent
                .borrow_mut()
                .push((url.to_string(), request.clone()));
            self.reply
                .clone()
                .map_err(ScreeningError::PredictionTransport)
        }
    }

    fn config(encoding: PredictionEncoding) -> PredictionConfig {
        PredictionConfig::default()
            .with_endpoint("https://predict.example/run")
            .with_encoding(encoding)
    }

    fn row() -> CanonicalFeatureRow {
        CanonicalFeatureRow::new()
            .with(Feature::Age, 8.0)
            .with(Feature::AdhdStatus, 1.0)
            .with(Feature::ScEr, 15.0)
    }

    #[test]
    fn test_csv_request_masks_label() {
        let transport = FakeTransport::replying(200, r#"{"prediction": 1, "probability": 0.82}"#);
        let client = PredictionClient::with_transport(config(PredictionEncoding::Csv), transport);

        let result = client.predict(&row()).unwrap();
        assert_eq!(
            result,
            PredictionResult {
                prediction: 1,
                probability: 0.82
            }
        );
        assert!(result.is_positive());

        let sent = client.transport.sent.borrow();
        let (url, request) = &sent[0];
        assert_eq!(url, "https://predict.example/run");
        assert_eq!(request.content_type, "text/plain");
        let data_line = request.body.lines().nth(1).unwrap();
        assert!(data_line.starts_with("8,NaN,"));
    }

    #[test]
    fn test_json_request() {
        let transport = FakeTransport::replying(200, r#"{"prediction": 0, "probability": 0.1}"#);
        let client = PredictionClient::with_transport(config(PredictionEncoding::Json), transport);
        client.predict(&row()).unwrap();

        let sent = client.transport.sent.borrow();
        let body: serde_json::Value = serde_json::from_str(&sent[0].1.body).unwrap();
        assert_eq!(sent[0].1.content_type, "application/json");
        assert!(body["adhd_status"].is_null());
        assert_eq!(body["sc_er"], 15.0);
    }

    #[test]
    fn test_http_error_status() {
        let transport = FakeTransport::replying(500, "Error running prediction");
        let client = PredictionClient::with_transport(config(PredictionEncoding::Csv), transport);
        let err = client.predict(&row()).unwrap_err();
        assert!(matches!(err, ScreeningError::PredictionStatus { status: 500, .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transport_failure() {
        let client = PredictionClient::with_transport(
            config(PredictionEncoding::Csv),
            FakeTransport::failing("operation timed out"),
        );
        assert!(matches!(
            client.predict(&row()),
            Err(ScreeningError::PredictionTransport(_))
        ));
    }

    #[test]
    fn test_invalid_replies() {
        for body in [
            "",
            "not json",
            r#"{"prediction": 2, "probability": 0.5}"#,
            r#"{"prediction": 1, "probability": 1.5}"#,
            r#"{"probability": 0.5}"#,
        ] {
            assert!(
                matches!(parse_prediction(body), Err(ScreeningError::InvalidPrediction(_))),
                "accepted {body:?}"
            );
        }
        assert_eq!(
            parse_prediction(r#"{"prediction": 1.0, "probability": 1}"#).unwrap(),
            PredictionResult {
                prediction: 1,
                probability: 1.0
            }
        );
    }

    #[test]
    fn test_missing_endpoint() {
        let client = PredictionClient::with_transport(
            PredictionConfig::default(),
            FakeTransport::replying(200, "{}"),
        );
        assert!(matches!(
            client.predict(&row()),
            Err(ScreeningError::ConfigError(_))
        ));
        assert!(client.transport.sent.borrow().is_empty());
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_URL, " https://predict.example "),
            (ENV_ENCODING, "JSON"),
            (ENV_TIMEOUT_MS, "5000"),
        ]);
        let config =
            PredictionConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.endpoint.as_deref(), Some("https://predict.example"));
        assert_eq!(config.encoding, PredictionEncoding::Json);
        assert_eq!(config.timeout, Duration::from_millis(5000));

        let defaults = PredictionConfig::from_lookup(|_| None).unwrap();
        assert_eq!(defaults, PredictionConfig::default());

        let bad = PredictionConfig::from_lookup(|k| (k == ENV_ENCODING).then(|| "xml".to_string()));
        assert!(matches!(bad, Err(ScreeningError::UnsupportedEncoding(_))));
    }
}
