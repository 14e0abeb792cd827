//! Simulated players
//!
//! Drives the session engines with scripted, seeded behaviour on a
//! [`ManualClock`]. Used by the CLI `simulate` command and by tests to
//! produce realistic session records without a UI.

use std::fmt;
use std::str::FromStr;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, ManualClock, Millis};
use crate::config::validate_age;
use crate::error::ScreeningError;
use crate::games::target_pop::GRID_SLOTS;
use crate::games::threat_lock::{
    Point, FIELD_HEIGHT, FIELD_WIDTH, LOCK_WINDOW_MS, MAX_ENERGY,
};
use crate::games::{
    SessionEngine, SignalColor, SignalGatingEngine, SignalPhase, TargetPopEngine,
    ThreatLockEngine, ThreatState, TICK_MS,
};
use crate::pipeline::ScreeningSession;
use crate::types::{GameKind, SessionMetrics};

/// Scale from the per-stimulus commission rate to a per-tick impulse rate
const PER_TICK_IMPULSE_SCALE: f64 = 0.05;

/// Chance of grabbing a visible powerup on a given tick
const POWERUP_GRAB_CHANCE: f64 = 0.3;

/// Fastest plausible human response
const MIN_REACTION_MS: f64 = 120.0;

/// Behavioural archetype of a simulated player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerProfile {
    /// Fast, accurate, rarely responds when it should not
    #[default]
    Attentive,
    /// Fast but responds to everything
    Impulsive,
    /// Slow and frequently misses stimuli
    Inattentive,
}

impl PlayerProfile {
    pub const ALL: [PlayerProfile; 3] = [
        PlayerProfile::Attentive,
        PlayerProfile::Impulsive,
        PlayerProfile::Inattentive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerProfile::Attentive => "attentive",
            PlayerProfile::Impulsive => "impulsive",
            PlayerProfile::Inattentive => "inattentive",
        }
    }

    pub fn traits(&self) -> PlayerTraits {
        match self {
            PlayerProfile::Attentive => PlayerTraits {
                reaction_mean_ms: 450.0,
                reaction_jitter_ms: 120.0,
                miss_rate: 0.05,
                commission_rate: 0.05,
            },
            PlayerProfile::Impulsive => PlayerTraits {
                reaction_mean_ms: 320.0,
                reaction_jitter_ms: 150.0,
                miss_rate: 0.1,
                commission_rate: 0.4,
            },
            PlayerProfile::Inattentive => PlayerTraits {
                reaction_mean_ms: 750.0,
                reaction_jitter_ms: 300.0,
                miss_rate: 0.35,
                commission_rate: 0.1,
            },
        }
    }
}

impl fmt::Display for PlayerProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerProfile {
    type Err = ScreeningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlayerProfile::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ScreeningError::ConfigError(format!("unknown player profile: {s}")))
    }
}

/// Tunable behaviour of a simulated player
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerTraits {
    pub reaction_mean_ms: f64,
    /// Half-width of the uniform reaction-time spread
    pub reaction_jitter_ms: f64,
    /// Probability of ignoring a stimulus that calls for a response
    pub miss_rate: f64,
    /// Probability of responding to a stimulus that calls for none
    pub commission_rate: f64,
}

/// A seeded scripted player
#[derive(Debug, Clone)]
pub struct SimulatedPlayer {
    traits: PlayerTraits,
    rng: ChaCha8Rng,
}

impl SimulatedPlayer {
    pub fn new(profile: PlayerProfile, seed: u64) -> Self {
        Self::with_traits(profile.traits(), seed)
    }

    pub fn with_traits(traits: PlayerTraits, seed: u64) -> Self {
        Self {
            traits,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn traits(&self) -> &PlayerTraits {
        &self.traits
    }

    fn chance(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen::<f64>() < p
    }

    fn reaction_ms(&mut self) -> Millis {
        let jitter = self.traits.reaction_jitter_ms;
        let offset = if jitter > 0.0 {
            self.rng.gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        (self.traits.reaction_mean_ms + offset).max(MIN_REACTION_MS).round() as Millis
    }

    /// Play a full Target-Pop session
    pub fn play_target_pop(
        &mut self,
        engine: &mut TargetPopEngine,
        clock: &ManualClock,
    ) -> Result<SessionMetrics, ScreeningError> {
        engine.start(clock.now_ms());
        let mut tempted_round = None;

        while engine.is_running() {
            let Some((slot, appeared)) = engine.visible_target() else {
                break;
            };
            let round = engine.round().map(|r| r.index);
            let deadline = engine.next_deadline().unwrap_or(appeared);

            if tempted_round != round && self.chance(self.traits.commission_rate) {
                tempted_round = round;
                let wrong = match engine.visible_distractors().first() {
                    Some(d) => *d,
                    None => (slot + self.rng.gen_range(1..GRID_SLOTS)) % GRID_SLOTS,
                };
                clock.set(appeared + self.reaction_ms() / 2);
                engine.tap(wrong, clock.now_ms());
                continue;
            }
            tempted_round = round;

            if self.chance(self.traits.miss_rate) {
                clock.set(deadline);
                engine.advance(clock.now_ms());
                continue;
            }

            clock.set(appeared + self.reaction_ms());
            engine.tap(slot, clock.now_ms());
        }

        finished(engine)
    }

    /// Play a full Signal-Gating session
    pub fn play_signal_gating(
        &mut self,
        engine: &mut SignalGatingEngine,
        clock: &ManualClock,
    ) -> Result<SessionMetrics, ScreeningError> {
        let start = clock.now_ms();
        engine.start(start);
        let mut decided_signal = None;

        while engine.is_running() {
            match engine.phase() {
                SignalPhase::Active {
                    color,
                    started_at,
                    ends_at,
                } if decided_signal != Some(started_at) => {
                    decided_signal = Some(started_at);
                    let respond = match color {
                        SignalColor::Green => !self.chance(self.traits.miss_rate),
                        SignalColor::Red => self.chance(self.traits.commission_rate),
                    };
                    let at = started_at + self.reaction_ms();
                    if respond && at < ends_at {
                        clock.set(at);
                        engine.press(clock.now_ms());
                    }
                }
                SignalPhase::Interval { .. } => {
                    if self.chance(self.traits.commission_rate * PER_TICK_IMPULSE_SCALE) {
                        engine.press(clock.now_ms());
                    }
                }
                _ => {}
            }

            let next = next_tick(start, clock.now_ms());
            clock.set(next);
            engine.advance(next);
        }

        finished(engine)
    }

    /// Play a full Threat-Lock session
    pub fn play_threat_lock(
        &mut self,
        engine: &mut ThreatLockEngine,
        clock: &ManualClock,
    ) -> Result<SessionMetrics, ScreeningError> {
        let start = clock.now_ms();
        engine.start(start);
        let mut decided_window = None;

        while engine.is_running() {
            if let Some(powerup) = engine.powerups().first().copied() {
                if self.chance(POWERUP_GRAB_CHANCE) {
                    engine.shoot(powerup.position, clock.now_ms());
                }
            }

            match engine.lockable_threat().map(|t| (t.id, t.state)) {
                Some((id, ThreatState::Lockable { window_opened_at }))
                    if decided_window != Some((id, window_opened_at)) =>
                {
                    decided_window = Some((id, window_opened_at));
                    let at = window_opened_at + self.reaction_ms();
                    if !self.chance(self.traits.miss_rate) && at < window_opened_at + LOCK_WINDOW_MS {
                        clock.set(at);
                        engine.advance(clock.now_ms());
                        let ready = engine.energy() >= MAX_ENERGY;
                        if let Some(current) = engine.lockable_threat().copied() {
                            if ready || self.chance(self.traits.commission_rate) {
                                engine.shoot(current.position, clock.now_ms());
                            }
                        }
                    }
                }
                Some(_) => {}
                None => {
                    if self.chance(self.traits.commission_rate * PER_TICK_IMPULSE_SCALE) {
                        let at = Point::new(
                            self.rng.gen_range(0.0..FIELD_WIDTH),
                            self.rng.gen_range(0.0..FIELD_HEIGHT),
                        );
                        engine.shoot(at, clock.now_ms());
                    }
                }
            }

            let next = next_tick(start, clock.now_ms());
            clock.set(next);
            engine.advance(next);
        }

        finished(engine)
    }

    /// Play one game at `age` with an engine seeded by `seed`
    pub fn play(
        &mut self,
        game: GameKind,
        age: u8,
        seed: u64,
        clock: &ManualClock,
    ) -> Result<SessionMetrics, ScreeningError> {
        debug!(%game, age, seed, "simulating session");
        match game {
            GameKind::TargetPop => self.play_target_pop(&mut TargetPopEngine::new(age, seed), clock),
            GameKind::SignalGating => {
                self.play_signal_gating(&mut SignalGatingEngine::new(age, seed), clock)
            }
            GameKind::ThreatLock => {
                self.play_threat_lock(&mut ThreatLockEngine::new(age, seed), clock)
            }
        }
    }
}

/// Next tick boundary strictly after `now` on a timeline starting at `start`
fn next_tick(start: Millis, now: Millis) -> Millis {
    start + ((now - start) / TICK_MS + 1) * TICK_MS
}

fn finished<E: SessionEngine>(engine: &mut E) -> Result<SessionMetrics, ScreeningError> {
    engine
        .take_metrics()
        .ok_or_else(|| ScreeningError::SessionNotFinished(engine.game().to_string()))
}

/// Simulate a complete screening: all three games, one player, one clock
pub fn simulate_screening(
    age: i64,
    profile: PlayerProfile,
    seed: u64,
) -> Result<ScreeningSession, ScreeningError> {
    let age = validate_age(age)?;
    let mut session = ScreeningSession::new(age as i64)?;
    let mut player = SimulatedPlayer::new(profile, seed);
    let clock = ManualClock::new(0);

    for (offset, game) in GameKind::ALL.iter().enumerate() {
        let engine_seed = seed.wrapping_add(offset as u64 + 1);
        let metrics = player.play(*game, age, engine_seed, &clock)?;
        session.record(metrics)?;
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameDetails;

    #[test]
    fn test_profile_parsing() {
        assert_eq!("Impulsive".parse::<PlayerProfile>().unwrap(), PlayerProfile::Impulsive);
        assert!("sleepy".parse::<PlayerProfile>().is_err());
    }

    #[test]
    fn test_next_tick() {
        assert_eq!(next_tick(0, 0), 100);
        assert_eq!(next_tick(0, 150), 200);
        assert_eq!(next_tick(50, 150), 250);
    }

    #[test]
    fn test_attentive_target_pop() {
        let clock = ManualClock::new(0);
        let mut player = SimulatedPlayer::new(PlayerProfile::Attentive, 5);
        let metrics = player
            .play_target_pop(&mut TargetPopEngine::new(10, 5), &clock)
            .unwrap();

        assert_eq!(metrics.features.session_incomplete, Some(0.0));
        match metrics.details {
            GameDetails::TargetPop {
                score,
                rounds_played,
                ..
            } => {
                assert_eq!(rounds_played, 30);
                assert!(score >= 20, "attentive player scored {score}");
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_signal_gating_finishes() {
        let clock = ManualClock::new(1_000);
        let mut player = SimulatedPlayer::new(PlayerProfile::Impulsive, 8);
        let metrics = player
            .play_signal_gating(&mut SignalGatingEngine::new(7, 8), &clock)
            .unwrap();
        let f = &metrics.features;
        assert!((0.0..=20.0).contains(&f.wfs_fpr.unwrap()));
        assert!((0.0..=50.0).contains(&f.wfs_rt.unwrap()));
        assert!(clock.now_ms() > 1_000);
    }

    #[test]
    fn test_simulated_screening_is_complete_and_reproducible() {
        let a = simulate_screening(9, PlayerProfile::Inattentive, 77).unwrap();
        let b = simulate_screening(9, PlayerProfile::Inattentive, 77).unwrap();
        assert!(a.is_complete());
        assert_eq!(a.aggregate(), b.aggregate());
        assert_eq!(a.aggregate().age, Some(9.0));
    }

    #[test]
    fn test_rejects_out_of_range_age() {
        assert!(matches!(
            simulate_screening(19, PlayerProfile::Attentive, 1),
            Err(ScreeningError::AgeOutOfRange(19))
        ));
    }
}
