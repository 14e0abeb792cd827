//! Core data types
//!
//! This module defines the canonical feature schema, per-game metrics records,
//! and the stimulus/response types that flow through the session engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Millis;
use crate::error::ScreeningError;

/// The three minigames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Whack-a-target grid game
    TargetPop,
    /// Wait-for-signal go/no-go game
    SignalGating,
    /// Galactic-defender lock-on game
    ThreatLock,
}

impl GameKind {
    pub const ALL: [GameKind; 3] = [GameKind::TargetPop, GameKind::SignalGating, GameKind::ThreatLock];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameKind::TargetPop => "target_pop",
            GameKind::SignalGating => "signal_gating",
            GameKind::ThreatLock => "threat_lock",
        }
    }

    /// Canonical features written by this game (besides the shared ones)
    pub fn features(&self) -> [Feature; 4] {
        match self {
            GameKind::TargetPop => [Feature::ScEr, Feature::ScDe, Feature::ScTct, Feature::ScRtv],
            GameKind::SignalGating => {
                [Feature::WfsFpr, Feature::WfsPrc, Feature::WfsRt, Feature::WfsGs]
            }
            GameKind::ThreatLock => [Feature::FtCf, Feature::FtMmv, Feature::FtEii, Feature::FtTp],
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GameKind {
    type Err = ScreeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "target_pop" | "star_catcher" => Ok(GameKind::TargetPop),
            "signal_gating" | "wait_for_signal" => Ok(GameKind::SignalGating),
            "threat_lock" | "galactic_defender" => Ok(GameKind::ThreatLock),
            other => Err(ScreeningError::ConfigError(format!("unknown game: {other}"))),
        }
    }
}

/// One column of the canonical feature row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Age,
    AdhdStatus,
    PlaytimeMin,
    SessionIncomplete,
    ScEr,
    ScDe,
    ScTct,
    ScRtv,
    WfsFpr,
    WfsPrc,
    WfsRt,
    WfsGs,
    FtCf,
    FtMmv,
    FtEii,
    FtTp,
}

impl Feature {
    /// All features in wire order
    pub const ALL: [Feature; 16] = [
        Feature::Age,
        Feature::AdhdStatus,
        Feature::PlaytimeMin,
        Feature::SessionIncomplete,
        Feature::ScEr,
        Feature::ScDe,
        Feature::ScTct,
        Feature::ScRtv,
        Feature::WfsFpr,
        Feature::WfsPrc,
        Feature::WfsRt,
        Feature::WfsGs,
        Feature::FtCf,
        Feature::FtMmv,
        Feature::FtEii,
        Feature::FtTp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Feature::Age => "age",
            Feature::AdhdStatus => "adhd_status",
            Feature::PlaytimeMin => "playtime_min",
            Feature::SessionIncomplete => "session_incomplete",
            Feature::ScEr => "sc_er",
            Feature::ScDe => "sc_de",
            Feature::ScTct => "sc_tct",
            Feature::ScRtv => "sc_rtv",
            Feature::WfsFpr => "wfs_fpr",
            Feature::WfsPrc => "wfs_prc",
            Feature::WfsRt => "wfs_rt",
            Feature::WfsGs => "wfs_gs",
            Feature::FtCf => "ft_cf",
            Feature::FtMmv => "ft_mmv",
            Feature::FtEii => "ft_eii",
            Feature::FtTp => "ft_tp",
        }
    }

    /// The ground-truth label column, never a model input
    pub fn is_label(&self) -> bool {
        matches!(self, Feature::AdhdStatus)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = ScreeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Feature::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| ScreeningError::MalformedPayload(format!("unknown feature column: {s}")))
    }
}

/// The fixed 16-field row consumed by the prediction endpoint.
///
/// Every field is optional; absent fields are encoded as `NaN` in CSV and
/// `null` in JSON. Non-finite values are never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonicalFeatureRow {
    pub age: Option<f64>,
    pub adhd_status: Option<f64>,
    pub playtime_min: Option<f64>,
    pub session_incomplete: Option<f64>,
    pub sc_er: Option<f64>,
    pub sc_de: Option<f64>,
    pub sc_tct: Option<f64>,
    pub sc_rtv: Option<f64>,
    pub wfs_fpr: Option<f64>,
    pub wfs_prc: Option<f64>,
    pub wfs_rt: Option<f64>,
    pub wfs_gs: Option<f64>,
    pub ft_cf: Option<f64>,
    pub ft_mmv: Option<f64>,
    pub ft_eii: Option<f64>,
    pub ft_tp: Option<f64>,
}

impl CanonicalFeatureRow {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, feature: Feature) -> &mut Option<f64> {
        match feature {
            Feature::Age => &mut self.age,
            Feature::AdhdStatus => &mut self.adhd_status,
            Feature::PlaytimeMin => &mut self.playtime_min,
            Feature::SessionIncomplete => &mut self.session_incomplete,
            Feature::ScEr => &mut self.sc_er,
            Feature::ScDe => &mut self.sc_de,
            Feature::ScTct => &mut self.sc_tct,
            Feature::ScRtv => &mut self.sc_rtv,
            Feature::WfsFpr => &mut self.wfs_fpr,
            Feature::WfsPrc => &mut self.wfs_prc,
            Feature::WfsRt => &mut self.wfs_rt,
            Feature::WfsGs => &mut self.wfs_gs,
            Feature::FtCf => &mut self.ft_cf,
            Feature::FtMmv => &mut self.ft_mmv,
            Feature::FtEii => &mut self.ft_eii,
            Feature::FtTp => &mut self.ft_tp,
        }
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::Age => self.age,
            Feature::AdhdStatus => self.adhd_status,
            Feature::PlaytimeMin => self.playtime_min,
            Feature::SessionIncomplete => self.session_incomplete,
            Feature::ScEr => self.sc_er,
            Feature::ScDe => self.sc_de,
            Feature::ScTct => self.sc_tct,
            Feature::ScRtv => self.sc_rtv,
            Feature::WfsFpr => self.wfs_fpr,
            Feature::WfsPrc => self.wfs_prc,
            Feature::WfsRt => self.wfs_rt,
            Feature::WfsGs => self.wfs_gs,
            Feature::FtCf => self.ft_cf,
            Feature::FtMmv => self.ft_mmv,
            Feature::FtEii => self.ft_eii,
            Feature::FtTp => self.ft_tp,
        }
    }

    /// Set a value; non-finite values clear the field instead
    pub fn set(&mut self, feature: Feature, value: f64) {
        *self.slot(feature) = value.is_finite().then_some(value);
    }

    pub fn set_opt(&mut self, feature: Feature, value: Option<f64>) {
        match value {
            Some(v) => self.set(feature, v),
            None => self.clear(feature),
        }
    }

    pub fn clear(&mut self, feature: Feature) {
        *self.slot(feature) = None;
    }

    /// Builder-style setter
    pub fn with(mut self, feature: Feature, value: f64) -> Self {
        self.set(feature, value);
        self
    }

    /// Values in wire order
    pub fn values(&self) -> [Option<f64>; 16] {
        Feature::ALL.map(|f| self.get(f))
    }

    /// Features that carry a value
    pub fn present(&self) -> Vec<Feature> {
        Feature::ALL
            .iter()
            .copied()
            .filter(|f| self.get(*f).is_some())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        Feature::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// Kind of a presented stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StimulusKind {
    Target,
    Distractor,
    Threat,
}

/// A scored user response; only its reaction time outlives scoring
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub timestamp: Millis,
    /// Stimulus the response was aimed at, if any was live
    pub target_ref: Option<u64>,
    pub correct: bool,
}

/// Raw per-game values kept alongside the canonical features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum GameDetails {
    TargetPop {
        score: u32,
        rounds_played: u32,
        errors: u32,
        wrong_target_clicks: u32,
        distractor_clicks: u32,
        distraction_events: u32,
        mean_reaction_ms: f64,
    },
    SignalGating {
        successful_launches: u32,
        target_launches: u32,
        false_positives: u32,
        premature_responses: u32,
        /// Unscaled gaze-shift total
        gaze_shifts_total: u32,
        mean_reaction_ms: f64,
        elapsed_ms: Millis,
    },
    ThreatLock {
        score: u32,
        health: f64,
        impulse_errors: u32,
        sustained_failures: u32,
        avg_reaction_time_ms: f64,
        movement_variance: f64,
        duration_sec: u64,
    },
}

/// The single record a session engine emits when it finishes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub session_id: Uuid,
    pub game: GameKind,
    pub age: u8,
    pub features: CanonicalFeatureRow,
    pub details: GameDetails,
}

impl SessionMetrics {
    pub fn new(game: GameKind, age: u8, features: CanonicalFeatureRow, details: GameDetails) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            game,
            age,
            features,
            details,
        }
    }

    pub fn session_incomplete(&self) -> bool {
        self.features.session_incomplete.unwrap_or(0.0) > 0.0
    }
}
