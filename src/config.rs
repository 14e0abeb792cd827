//! Age-banded difficulty configuration
//!
//! Each game has one immutable configuration per age band. Configurations are
//! selected once when a session is created and never mutated afterwards.

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::error::ScreeningError;
use crate::types::GameKind;

/// Youngest supported age
pub const MIN_AGE: u8 = 4;

/// Oldest supported age
pub const MAX_AGE: u8 = 17;

/// Difficulty band derived from the player's age
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBand {
    /// Ages 4-6: longest windows, fewest rounds
    Early,
    /// Ages 7-12
    Middle,
    /// Ages 13-17: shortest windows, most rounds
    Teen,
}

impl AgeBand {
    /// Resolve a band for any age.
    ///
    /// Ages outside 4-17 fall back to [`AgeBand::Teen`]. Use
    /// [`AgeBand::try_for_age`] where out-of-range ages must be rejected.
    pub fn for_age(age: i64) -> Self {
        match age {
            4..=6 => AgeBand::Early,
            7..=12 => AgeBand::Middle,
            _ => AgeBand::Teen,
        }
    }

    /// Resolve a band, rejecting ages outside 4-17
    pub fn try_for_age(age: i64) -> Result<Self, ScreeningError> {
        validate_age(age)?;
        Ok(Self::for_age(age))
    }
}

/// Check that `age` is within the supported range and narrow it
pub fn validate_age(age: i64) -> Result<u8, ScreeningError> {
    if age < MIN_AGE as i64 || age > MAX_AGE as i64 {
        return Err(ScreeningError::AgeOutOfRange(age));
    }
    Ok(age as u8)
}

/// Inclusive millisecond range for randomly drawn durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub min: Millis,
    pub max: Millis,
}

/// Inclusive speed range in pixels per tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedRange {
    pub min: f64,
    pub max: f64,
}

/// Target-Pop ("whack-a-target") parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPopConfig {
    /// How long a target and its distractors stay visible
    pub visible_time_ms: Millis,
    /// Number of rounds in a session
    pub total_rounds: u32,
    /// Rise animation length (presentation only)
    pub pop_anim_ms: Millis,
    /// Probability that a round shows distractors
    pub distractor_chance: f64,
    /// Upper bound on distractors per round
    pub max_distractors: u32,
}

impl TargetPopConfig {
    pub fn for_band(band: AgeBand) -> Self {
        match band {
            AgeBand::Early => Self {
                visible_time_ms: 1600,
                total_rounds: 20,
                pop_anim_ms: 400,
                distractor_chance: 0.3,
                max_distractors: 1,
            },
            AgeBand::Middle => Self {
                visible_time_ms: 1300,
                total_rounds: 30,
                pop_anim_ms: 350,
                distractor_chance: 0.4,
                max_distractors: 2,
            },
            AgeBand::Teen => Self {
                visible_time_ms: 1100,
                total_rounds: 40,
                pop_anim_ms: 300,
                distractor_chance: 0.5,
                max_distractors: 2,
            },
        }
    }

    pub fn for_age(age: i64) -> Self {
        Self::for_band(AgeBand::for_age(age))
    }
}

/// Signal-Gating ("wait for signal") parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalGatingConfig {
    pub signal_duration: DurationRange,
    pub interval_duration: DurationRange,
    /// Signal radius in pixels (presentation only)
    pub signal_size: u32,
    pub game_duration_ms: Millis,
    /// Rocket climb speed in pixels per animation frame
    pub rocket_speed: u32,
    /// Valid launches needed to finish early
    pub target_launches: u32,
}

impl SignalGatingConfig {
    pub fn for_band(band: AgeBand) -> Self {
        match band {
            AgeBand::Early => Self {
                signal_duration: DurationRange { min: 1500, max: 2500 },
                interval_duration: DurationRange { min: 1500, max: 2500 },
                signal_size: 100,
                game_duration_ms: 120_000,
                rocket_speed: 5,
                target_launches: 3,
            },
            AgeBand::Middle => Self {
                signal_duration: DurationRange { min: 1000, max: 2000 },
                interval_duration: DurationRange { min: 1000, max: 2000 },
                signal_size: 80,
                game_duration_ms: 120_000,
                rocket_speed: 7,
                target_launches: 5,
            },
            AgeBand::Teen => Self {
                signal_duration: DurationRange { min: 800, max: 1500 },
                interval_duration: DurationRange { min: 800, max: 1500 },
                signal_size: 60,
                game_duration_ms: 120_000,
                rocket_speed: 10,
                target_launches: 7,
            },
        }
    }

    pub fn for_age(age: i64) -> Self {
        Self::for_band(AgeBand::for_age(age))
    }
}

/// Threat-Lock ("galactic defender") parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThreatLockConfig {
    pub game_duration_ms: Millis,
    /// Time between threat spawns
    pub spawn_interval_ms: Millis,
    pub threat_speed: SpeedRange,
    /// Time between lock-window openings
    pub lock_interval_ms: Millis,
    /// Energy gained per tick
    pub shield_charge_rate: f64,
}

impl ThreatLockConfig {
    pub fn for_band(band: AgeBand) -> Self {
        match band {
            AgeBand::Early => Self {
                game_duration_ms: 120_000,
                spawn_interval_ms: 3000,
                threat_speed: SpeedRange { min: 1.0, max: 2.0 },
                lock_interval_ms: 1500,
                shield_charge_rate: 2.0,
            },
            AgeBand::Middle => Self {
                game_duration_ms: 180_000,
                spawn_interval_ms: 2000,
                threat_speed: SpeedRange { min: 1.5, max: 3.0 },
                lock_interval_ms: 1200,
                shield_charge_rate: 1.5,
            },
            AgeBand::Teen => Self {
                game_duration_ms: 180_000,
                spawn_interval_ms: 1500,
                threat_speed: SpeedRange { min: 2.0, max: 4.0 },
                lock_interval_ms: 1000,
                shield_charge_rate: 1.0,
            },
        }
    }

    pub fn for_age(age: i64) -> Self {
        Self::for_band(AgeBand::for_age(age))
    }
}

/// Configuration for any one game
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "game", rename_all = "snake_case")]
pub enum GameConfig {
    TargetPop(TargetPopConfig),
    SignalGating(SignalGatingConfig),
    ThreatLock(ThreatLockConfig),
}

impl GameConfig {
    /// Resolve the configuration for `kind` at `age`
    pub fn resolve(kind: GameKind, age: i64) -> Self {
        let band = AgeBand::for_age(age);
        match kind {
            GameKind::TargetPop => GameConfig::TargetPop(TargetPopConfig::for_band(band)),
            GameKind::SignalGating => GameConfig::SignalGating(SignalGatingConfig::for_band(band)),
            GameKind::ThreatLock => GameConfig::ThreatLock(ThreatLockConfig::for_band(band)),
        }
    }

    /// All three game configurations for one age
    pub fn resolve_all(age: i64) -> Vec<Self> {
        GameKind::ALL
            .iter()
            .map(|kind| Self::resolve(*kind, age))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries() {
        assert_eq!(AgeBand::for_age(4), AgeBand::Early);
        assert_eq!(AgeBand::for_age(6), AgeBand::Early);
        assert_eq!(AgeBand::for_age(7), AgeBand::Middle);
        assert_eq!(AgeBand::for_age(12), AgeBand::Middle);
        assert_eq!(AgeBand::for_age(13), AgeBand::Teen);
        assert_eq!(AgeBand::for_age(17), AgeBand::Teen);
    }

    #[test]
    fn test_out_of_range_falls_back_to_hardest_band() {
        assert_eq!(AgeBand::for_age(3), AgeBand::Teen);
        assert_eq!(AgeBand::for_age(0), AgeBand::Teen);
        assert_eq!(AgeBand::for_age(18), AgeBand::Teen);
        assert_eq!(AgeBand::for_age(-5), AgeBand::Teen);
    }

    #[test]
    fn test_try_for_age_rejects_out_of_range() {
        assert!(matches!(
            AgeBand::try_for_age(3),
            Err(ScreeningError::AgeOutOfRange(3))
        ));
        assert!(matches!(
            AgeBand::try_for_age(18),
            Err(ScreeningError::AgeOutOfRange(18))
        ));
        assert_eq!(AgeBand::try_for_age(10).unwrap(), AgeBand::Middle);
    }

    #[test]
    fn test_target_pop_rounds_scale_with_age() {
        assert_eq!(TargetPopConfig::for_age(5).total_rounds, 20);
        assert_eq!(TargetPopConfig::for_age(10).total_rounds, 30);
        assert_eq!(TargetPopConfig::for_age(15).total_rounds, 40);
        assert!(
            TargetPopConfig::for_age(5).visible_time_ms
                > TargetPopConfig::for_age(15).visible_time_ms
        );
    }

    #[test]
    fn test_signal_gating_targets() {
        assert_eq!(SignalGatingConfig::for_age(5).target_launches, 3);
        assert_eq!(SignalGatingConfig::for_age(10).target_launches, 5);
        assert_eq!(SignalGatingConfig::for_age(16).target_launches, 7);
    }

    #[test]
    fn test_threat_lock_durations() {
        assert_eq!(ThreatLockConfig::for_age(5).game_duration_ms, 120_000);
        assert_eq!(ThreatLockConfig::for_age(9).game_duration_ms, 180_000);
        assert_eq!(ThreatLockConfig::for_age(14).lock_interval_ms, 1000);
    }

    #[test]
    fn test_resolve_all_serializes_with_game_tag() {
        let configs = GameConfig::resolve_all(8);
        assert_eq!(configs.len(), 3);
        let json = serde_json::to_value(&configs).unwrap();
        assert_eq!(json[0]["game"], "target_pop");
        assert_eq!(json[1]["game"], "signal_gating");
        assert_eq!(json[2]["game"], "threat_lock");
        assert_eq!(json[0]["total_rounds"], 30);
    }
}
