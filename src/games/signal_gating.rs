//! Signal-Gating session engine
//!
//! A signal light alternates between dark intervals and lit periods. The
//! player responds only while it is green; each valid response launches a
//! rocket. Responses to red signals and during intervals are scored as
//! inhibition failures.
//!
//! The engine runs on a fixed 100 ms tick.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Millis;
use crate::config::{DurationRange, SignalGatingConfig};
use crate::games::{EndReason, ReactionLog, SessionEngine, SessionStatus, TICK_MS};
use crate::timer::TimerQueue;
use crate::types::{
    CanonicalFeatureRow, Feature, GameDetails, GameKind, ResponseEvent, SessionMetrics,
};

/// Probability that a new signal is green
pub const GREEN_PROBABILITY: f64 = 0.6;

/// Probability that a new signal registers a gaze shift
pub const GAZE_SHIFT_PROBABILITY: f64 = 0.3;

/// Per-event weight of false positives and premature responses
pub const INHIBITION_WEIGHT: f64 = 5.0;

/// Cap on the weighted inhibition scores
pub const INHIBITION_CAP: f64 = 20.0;

/// Divisor applied to the rounded mean reaction time
pub const REACTION_TIME_DIVISOR: f64 = 50.0;

/// Cap on the scaled reaction time
pub const REACTION_TIME_CAP: f64 = 50.0;

/// Per-shift weight of gaze shifts
pub const GAZE_SHIFT_WEIGHT: f64 = 2.0;

/// Cap on the weighted gaze-shift score
pub const GAZE_SHIFT_CAP: f64 = 10.0;

/// Reported playtime bounds in minutes
pub const PLAYTIME_FLOOR_MIN: f64 = 0.1;
pub const PLAYTIME_CAP_MIN: f64 = 2.0;

/// Height the rocket climbs before leaving the screen
pub const LAUNCH_CLIMB_PX: f64 = 400.0;

/// Animation frame period
pub const FRAME_MS: f64 = 1000.0 / 60.0;

/// Pause after the rocket leaves before input is accepted again
pub const LAUNCH_RESET_MS: Millis = 500;

/// Colour of a lit signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalColor {
    Green,
    Red,
}

/// Current phase of the signal light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum SignalPhase {
    Interval {
        ends_at: Millis,
    },
    Active {
        color: SignalColor,
        started_at: Millis,
        ends_at: Millis,
    },
}

/// Result of a press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PressOutcome {
    Launch { reaction_ms: Millis },
    FalsePositive,
    Premature,
    /// Session not running or rocket in flight
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
enum TimerKey {
    LaunchComplete,
}

/// Time from a valid press until input is accepted again
pub fn launch_duration_ms(rocket_speed: u32) -> Millis {
    let frames = (LAUNCH_CLIMB_PX / rocket_speed.max(1) as f64).ceil();
    (frames * FRAME_MS).round() as Millis + LAUNCH_RESET_MS
}

/// Signal-Gating engine
#[derive(Debug, Clone)]
pub struct SignalGatingEngine {
    config: SignalGatingConfig,
    age: u8,
    rng: ChaCha8Rng,
    timers: TimerQueue<TimerKey>,
    status: SessionStatus,
    started_at: Millis,
    ended_at: Millis,
    next_tick_at: Millis,
    phase: SignalPhase,

    successful_launches: u32,
    false_positives: u32,
    premature_responses: u32,
    gaze_shifts: u32,
    signals_shown: u64,
    reactions: ReactionLog,

    metrics: Option<SessionMetrics>,
}

impl SignalGatingEngine {
    pub fn new(age: u8, seed: u64) -> Self {
        Self::with_config(SignalGatingConfig::for_age(age as i64), age, seed)
    }

    pub fn with_config(config: SignalGatingConfig, age: u8, seed: u64) -> Self {
        Self {
            config,
            age,
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: TimerQueue::new(),
            status: SessionStatus::NotStarted,
            started_at: 0,
            ended_at: 0,
            next_tick_at: 0,
            phase: SignalPhase::Interval { ends_at: 0 },
            successful_launches: 0,
            false_positives: 0,
            premature_responses: 0,
            gaze_shifts: 0,
            signals_shown: 0,
            reactions: ReactionLog::new(),
            metrics: None,
        }
    }

    pub fn config(&self) -> &SignalGatingConfig {
        &self.config
    }

    pub fn phase(&self) -> SignalPhase {
        self.phase
    }

    pub fn successful_launches(&self) -> u32 {
        self.successful_launches
    }

    /// Whether a rocket is still in flight (input is ignored)
    pub fn launch_in_flight(&self) -> bool {
        self.timers.deadline_of(&TimerKey::LaunchComplete).is_some()
    }

    /// Respond to the signal at `now`
    pub fn press(&mut self, now: Millis) -> PressOutcome {
        if self.status != SessionStatus::Running {
            return PressOutcome::Ignored;
        }
        self.advance(now);
        if self.status != SessionStatus::Running || self.launch_in_flight() {
            return PressOutcome::Ignored;
        }

        match self.phase {
            SignalPhase::Active {
                color: SignalColor::Green,
                started_at,
                ..
            } => {
                let event = ResponseEvent {
                    timestamp: now,
                    target_ref: Some(self.signals_shown),
                    correct: true,
                };
                let reaction_ms = self.reactions.record(&event, started_at);
                self.successful_launches += 1;
                self.timers.schedule(
                    now + launch_duration_ms(self.config.rocket_speed),
                    TimerKey::LaunchComplete,
                );
                debug!(
                    reaction_ms,
                    launches = self.successful_launches,
                    "rocket launched"
                );
                PressOutcome::Launch { reaction_ms }
            }
            SignalPhase::Active {
                color: SignalColor::Red,
                started_at,
                ..
            } => {
                let event = ResponseEvent {
                    timestamp: now,
                    target_ref: Some(self.signals_shown),
                    correct: false,
                };
                self.reactions.record(&event, started_at);
                self.false_positives += 1;
                debug!(at = now, "false positive");
                PressOutcome::FalsePositive
            }
            SignalPhase::Interval { .. } => {
                let event = ResponseEvent {
                    timestamp: now,
                    target_ref: None,
                    correct: false,
                };
                self.reactions.record(&event, now);
                self.premature_responses += 1;
                debug!(at = now, "premature response");
                PressOutcome::Premature
            }
        }
    }

    fn draw(&mut self, range: DurationRange) -> Millis {
        if range.max <= range.min {
            return range.min;
        }
        self.rng.gen_range(range.min..=range.max)
    }

    fn drain_timers(&mut self, now: Millis) {
        while let Some((at, TimerKey::LaunchComplete)) = self.timers.pop_due(now) {
            debug!(at, "launch complete");
        }
    }

    fn tick(&mut self, t: Millis) {
        let elapsed = t - self.started_at;
        if self.successful_launches >= self.config.target_launches {
            self.finish(t, EndReason::TargetReached);
            return;
        }
        if elapsed >= self.config.game_duration_ms {
            self.finish(t, EndReason::TimedOut);
            return;
        }

        match self.phase {
            SignalPhase::Active { ends_at, .. } if t >= ends_at => {
                let interval = self.draw(self.config.interval_duration);
                self.phase = SignalPhase::Interval {
                    ends_at: t + interval,
                };
                debug!(at = t, interval, "signal off");
            }
            SignalPhase::Interval { ends_at } if t >= ends_at => {
                let color = if self.rng.gen::<f64>() < GREEN_PROBABILITY {
                    SignalColor::Green
                } else {
                    SignalColor::Red
                };
                if self.rng.gen::<f64>() < GAZE_SHIFT_PROBABILITY {
                    self.gaze_shifts += 1;
                }
                let duration = self.draw(self.config.signal_duration);
                self.signals_shown += 1;
                self.phase = SignalPhase::Active {
                    color,
                    started_at: t,
                    ends_at: t + duration,
                };
                debug!(at = t, ?color, duration, "signal on");
            }
            _ => {}
        }
    }

    fn finish(&mut self, at: Millis, reason: EndReason) {
        self.timers.cancel_all();
        self.ended_at = at.max(self.started_at);
        self.status = SessionStatus::Finished(reason);

        let metrics = self.build_metrics();
        info!(
            session_id = %metrics.session_id,
            ?reason,
            launches = self.successful_launches,
            false_positives = self.false_positives,
            premature = self.premature_responses,
            "signal-gating session finished"
        );
        self.metrics = Some(metrics);
    }

    fn build_metrics(&self) -> SessionMetrics {
        let elapsed_ms = self.ended_at - self.started_at;
        let mean_reaction_ms = self.reactions.mean().round();

        let playtime = ((elapsed_ms as f64 / 60_000.0).round() * 2.0)
            .clamp(PLAYTIME_FLOOR_MIN, PLAYTIME_CAP_MIN);
        let incomplete = if self.successful_launches < self.config.target_launches {
            1.0
        } else {
            0.0
        };
        let fpr = (self.false_positives as f64 * INHIBITION_WEIGHT).clamp(0.0, INHIBITION_CAP);
        let prc = (self.premature_responses as f64 * INHIBITION_WEIGHT).clamp(0.0, INHIBITION_CAP);
        let rt = (mean_reaction_ms / REACTION_TIME_DIVISOR).clamp(0.0, REACTION_TIME_CAP);
        let gs = (self.gaze_shifts as f64 * GAZE_SHIFT_WEIGHT).clamp(0.0, GAZE_SHIFT_CAP);

        let features = CanonicalFeatureRow::new()
            .with(Feature::Age, self.age as f64)
            .with(Feature::PlaytimeMin, playtime)
            .with(Feature::SessionIncomplete, incomplete)
            .with(Feature::WfsFpr, fpr)
            .with(Feature::WfsPrc, prc)
            .with(Feature::WfsRt, rt)
            .with(Feature::WfsGs, gs);

        let details = GameDetails::SignalGating {
            successful_launches: self.successful_launches,
            target_launches: self.config.target_launches,
            false_positives: self.false_positives,
            premature_responses: self.premature_responses,
            gaze_shifts_total: self.gaze_shifts,
            mean_reaction_ms,
            elapsed_ms,
        };

        SessionMetrics::new(GameKind::SignalGating, self.age, features, details)
    }
}

impl SessionEngine for SignalGatingEngine {
    fn game(&self) -> GameKind {
        GameKind::SignalGating
    }

    fn status(&self) -> SessionStatus {
        self.status
    }

    fn start(&mut self, now: Millis) {
        if self.status != SessionStatus::NotStarted {
            return;
        }
        self.status = SessionStatus::Running;
        self.started_at = now;
        // The first signal lights on the first tick
        self.phase = SignalPhase::Interval { ends_at: now };
        self.next_tick_at = now + TICK_MS;
        debug!(age = self.age, target = self.config.target_launches, "signal-gating started");
    }

    fn advance(&mut self, now: Millis) {
        while self.status == SessionStatus::Running && self.next_tick_at <= now {
            let t = self.next_tick_at;
            self.drain_timers(t);
            self.tick(t);
            self.next_tick_at += TICK_MS;
        }
        if self.status == SessionStatus::Running {
            self.drain_timers(now);
        }
    }

    fn abort(&mut self, now: Millis) {
        match self.status {
            SessionStatus::Finished(_) => {}
            SessionStatus::NotStarted => {
                self.started_at = now;
                self.status = SessionStatus::Running;
                self.finish(now, EndReason::Aborted);
            }
            SessionStatus::Running => {
                self.advance(now);
                if self.status == SessionStatus::Running {
                    self.finish(now, EndReason::Aborted);
                }
            }
        }
    }

    fn take_metrics(&mut self) -> Option<SessionMetrics> {
        self.metrics.take()
    }
}
