//! Game session engines
//!
//! Each engine is a deterministic state machine for one minigame. Hosts feed
//! it explicit timestamps (`start`, `advance`, and the game's input handler)
//! and collect exactly one [`SessionMetrics`] record once it finishes.
//!
//! Engines: Target-Pop (event driven), Signal-Gating and Threat-Lock (100 ms
//! fixed tick).

pub mod signal_gating;
pub mod target_pop;
pub mod threat_lock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Millis;
use crate::types::{GameKind, ResponseEvent, SessionMetrics};

pub use signal_gating::{PressOutcome, SignalColor, SignalGatingEngine, SignalPhase};
pub use target_pop::{TargetPopEngine, TargetState, TapOutcome};
pub use threat_lock::{
    ImpulseReason, Point, Powerup, PowerupType, ShotOutcome, Threat, ThreatLockEngine,
    ThreatState, ThreatType,
};

/// Fixed period of the tick-driven engines
pub const TICK_MS: Millis = 100;

/// Why a session stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Every round was played or the full duration elapsed
    Completed,
    /// The success target was reached before the time limit
    TargetReached,
    /// The time limit elapsed before the success target
    TimedOut,
    /// Health ran out
    HealthDepleted,
    /// The host tore the session down early
    Aborted,
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum SessionStatus {
    NotStarted,
    Running,
    Finished(EndReason),
}

/// Common driving surface shared by all engines
pub trait SessionEngine {
    fn game(&self) -> GameKind;

    fn status(&self) -> SessionStatus;

    /// Begin the session at `now`. Has no effect once started.
    fn start(&mut self, now: Millis);

    /// Process every timer and tick due at or before `now`
    fn advance(&mut self, now: Millis);

    /// End the session early, cancelling all pending timers
    fn abort(&mut self, now: Millis);

    /// The completion record; yields `Some` exactly once after finishing
    fn take_metrics(&mut self) -> Option<SessionMetrics>;

    fn is_running(&self) -> bool {
        self.status() == SessionStatus::Running
    }

    fn is_finished(&self) -> bool {
        matches!(self.status(), SessionStatus::Finished(_))
    }
}

/// Scores responses; only the reaction times of correct ones are kept
#[derive(Debug, Clone, Default)]
pub struct ReactionLog {
    times: Vec<f64>,
    incorrect: u32,
}

impl ReactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score `event` against a stimulus presented at `presented_at` and
    /// return its latency
    pub fn record(&mut self, event: &ResponseEvent, presented_at: Millis) -> Millis {
        let latency = event.timestamp.saturating_sub(presented_at);
        if event.correct {
            self.times.push(latency as f64);
        } else {
            self.incorrect += 1;
        }
        debug!(
            target_ref = ?event.target_ref,
            correct = event.correct,
            at = event.timestamp,
            latency,
            "response scored"
        );
        latency
    }

    /// Reaction times of correct responses, in order
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn incorrect(&self) -> u32 {
        self.incorrect
    }

    pub fn mean(&self) -> f64 {
        mean(&self.times)
    }

    pub fn std_dev(&self) -> f64 {
        population_std_dev(&self.times)
    }
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation, 0 for fewer than two values
pub fn population_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mu = mean(values);
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Round to `decimals` decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(mean(&[2.0, 4.0]), 3.0);
    }

    #[test]
    fn test_population_std_dev() {
        assert_eq!(population_std_dev(&[]), 0.0);
        assert_eq!(population_std_dev(&[350.0]), 0.0);
        // Population (not sample) deviation
        let sd = population_std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((sd - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(3.14159, 2), 3.14);
        assert_eq!(round_to(2.005, 0), 2.0);
    }

    #[test]
    fn test_reaction_log_keeps_correct_latencies() {
        let mut log = ReactionLog::new();
        let hit = ResponseEvent {
            timestamp: 1_450,
            target_ref: Some(3),
            correct: true,
        };
        let miss = ResponseEvent {
            timestamp: 1_600,
            target_ref: Some(3),
            correct: false,
        };
        assert_eq!(log.record(&hit, 1_000), 450);
        assert_eq!(log.record(&miss, 1_000), 600);
        assert_eq!(log.times(), &[450.0]);
        assert_eq!(log.incorrect(), 1);
        assert_eq!(log.std_dev(), 0.0);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(SessionStatus::Finished(EndReason::HealthDepleted)).unwrap();
        assert_eq!(json["status"], "finished");
        assert_eq!(json["reason"], "health_depleted");
    }
}
