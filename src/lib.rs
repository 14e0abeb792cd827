//! Stellar Screen - scoring engine for game-based attention screening
//!
//! Three short minigames each emit one completion record. The records of a
//! screening are merged into a fixed 16-feature row, which is exported as
//! CSV or sent to a remote prediction service.
//!
//! ## Modules
//!
//! - **Games**: age-configured session engines for Target-Pop, Signal-Gating
//!   and Threat-Lock, driven by explicit millisecond timestamps
//! - **Pipeline**: aggregation, CSV/JSON payloads, local export and prediction

pub mod aggregate;
pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod games;
pub mod pipeline;
pub mod predict;
pub mod sim;
pub mod timer;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use aggregate::{aggregate, MetricsAggregator};
pub use clock::{Clock, ManualClock, Millis};
pub use codec::{parse_csv, parse_json, to_csv, to_json};
pub use config::{validate_age, AgeBand, GameConfig};
pub use error::ScreeningError;
pub use export::{export_csv, ExportOptions};
pub use games::{
    EndReason, SessionEngine, SessionStatus, SignalGatingEngine, TargetPopEngine,
    ThreatLockEngine,
};
pub use pipeline::ScreeningSession;
pub use predict::{PredictionClient, PredictionConfig, PredictionEncoding, PredictionResult};
pub use sim::{simulate_screening, PlayerProfile, SimulatedPlayer};
pub use types::{CanonicalFeatureRow, Feature, GameKind, SessionMetrics};

/// Library version
pub const STELLAR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name recorded by the CLI
pub const PRODUCER_NAME: &str = "stellar-screen";
