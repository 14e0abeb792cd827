//! Target-Pop session engine
//!
//! A target pops up in one of nine grid slots, sometimes alongside
//! distractors. The player taps the target before it hides again. Rounds are
//! event driven: each one carries a single expiry deadline.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Millis;
use crate::config::TargetPopConfig;
use crate::games::{EndReason, ReactionLog, SessionEngine, SessionStatus};
use crate::timer::TimerQueue;
use crate::types::{
    CanonicalFeatureRow, Feature, GameDetails, GameKind, ResponseEvent, SessionMetrics,
    StimulusKind,
};

/// Number of grid slots (3×3)
pub const GRID_SLOTS: u8 = 9;

/// Lifecycle of one popped-up stimulus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum TargetState {
    Visible,
    Hit { at: Millis },
    Expired { at: Millis },
}

/// A target or distractor occupying a grid slot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stimulus {
    pub id: u64,
    pub slot: u8,
    pub kind: StimulusKind,
    pub appeared_at: Millis,
    pub state: TargetState,
}

impl Stimulus {
    pub fn is_visible(&self) -> bool {
        self.state == TargetState::Visible
    }
}

/// One target plus its distractors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub index: u32,
    pub target: Stimulus,
    pub distractors: Vec<Stimulus>,
    pub expires_at: Millis,
}

/// Result of a tap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum TapOutcome {
    Hit { reaction_ms: Millis },
    DistractorTap,
    WrongSlot,
    /// Session not running
    Ignored,
}

#[derive(Debug, Clone, PartialEq)]
enum TimerKey {
    RoundExpiry(u32),
}

/// Target-Pop engine
#[derive(Debug, Clone)]
pub struct TargetPopEngine {
    config: TargetPopConfig,
    age: u8,
    rng: ChaCha8Rng,
    timers: TimerQueue<TimerKey>,
    status: SessionStatus,
    started_at: Millis,
    ended_at: Millis,
    round: Option<Round>,
    rounds_resolved: u32,
    next_stimulus_id: u64,

    score: u32,
    errors: u32,
    wrong_target_clicks: u32,
    distractor_clicks: u32,
    distraction_events: u32,
    reactions: ReactionLog,

    metrics: Option<SessionMetrics>,
}

impl TargetPopEngine {
    /// Engine for `age` using its band's configuration
    pub fn new(age: u8, seed: u64) -> Self {
        Self::with_config(TargetPopConfig::for_age(age as i64), age, seed)
    }

    pub fn with_config(config: TargetPopConfig, age: u8, seed: u64) -> Self {
        Self {
            config,
            age,
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: TimerQueue::new(),
            status: SessionStatus::NotStarted,
            started_at: 0,
            ended_at: 0,
            round: None,
            rounds_resolved: 0,
            next_stimulus_id: 0,
            score: 0,
            errors: 0,
            wrong_target_clicks: 0,
            distractor_clicks: 0,
            distraction_events: 0,
            reactions: ReactionLog::new(),
            metrics: None,
        }
    }

    pub fn config(&self) -> &TargetPopConfig {
        &self.config
    }

    /// The round currently on screen
    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Slot and appearance time of the visible target
    pub fn visible_target(&self) -> Option<(u8, Millis)> {
        self.round
            .as_ref()
            .filter(|r| r.target.is_visible())
            .map(|r| (r.target.slot, r.target.appeared_at))
    }

    /// Slots of the visible distractors
    pub fn visible_distractors(&self) -> Vec<u8> {
        self.round
            .as_ref()
            .map(|r| {
                r.distractors
                    .iter()
                    .filter(|d| d.is_visible())
                    .map(|d| d.slot)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn rounds_resolved(&self) -> u32 {
        self.rounds_resolved
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }

    /// Next pending deadline, if any
    pub fn next_deadline(&self) -> Option<Millis> {
        self.timers.next_deadline()
    }

    /// Tap a grid slot at `now`.
    ///
    /// Expired rounds are resolved first, so a tap landing on the same
    /// instant as the expiry is scored against the next round.
    pub fn tap(&mut self, slot: u8, now: Millis) -> TapOutcome {
        if self.status != SessionStatus::Running {
            return TapOutcome::Ignored;
        }
        self.advance(now);
        if self.status != SessionStatus::Running {
            return TapOutcome::Ignored;
        }

        let Some(round) = self.round.as_mut() else {
            return TapOutcome::Ignored;
        };

        let on_distractor = round
            .distractors
            .iter()
            .any(|d| d.is_visible() && d.slot == slot);
        let on_target = round.target.is_visible() && round.target.slot == slot;
        let event = ResponseEvent {
            timestamp: now,
            target_ref: Some(round.target.id),
            correct: on_target && !on_distractor,
        };
        let reaction_ms = self.reactions.record(&event, round.target.appeared_at);

        if on_distractor {
            self.errors += 1;
            self.distractor_clicks += 1;
            debug!(slot, "distractor tapped");
            return TapOutcome::DistractorTap;
        }

        if event.correct {
            round.target.state = TargetState::Hit { at: now };
            let index = round.index;

            self.score += 1;
            self.timers.cancel(&TimerKey::RoundExpiry(index));
            debug!(round = index, reaction_ms, "target hit");
            self.resolve_round(now);
            return TapOutcome::Hit { reaction_ms };
        }

        self.errors += 1;
        self.wrong_target_clicks += 1;
        debug!(slot, "wrong slot tapped");
        TapOutcome::WrongSlot
    }

    fn spawn_round(&mut self, now: Millis) {
        let mut free: Vec<u8> = (0..GRID_SLOTS).collect();
        free.shuffle(&mut self.rng);

        let target_slot = free.pop().unwrap_or(0);
        let target = self.stimulus(target_slot, StimulusKind::Target, now);

        let mut distractors = Vec::new();
        if self.config.max_distractors > 0 && self.rng.gen::<f64>() < self.config.distractor_chance
        {
            let count = self.rng.gen_range(1..=self.config.max_distractors);
            for _ in 0..count {
                if let Some(slot) = free.pop() {
                    distractors.push(self.stimulus(slot, StimulusKind::Distractor, now));
                }
            }
        }

        let index = self.rounds_resolved;
        let expires_at = now + self.config.visible_time_ms;
        self.timers.schedule(expires_at, TimerKey::RoundExpiry(index));
        debug!(
            round = index,
            slot = target_slot,
            distractors = distractors.len(),
            "round spawned"
        );
        self.round = Some(Round {
            index,
            target,
            distractors,
            expires_at,
        });
    }

    fn stimulus(&mut self, slot: u8, kind: StimulusKind, now: Millis) -> Stimulus {
        let id = self.next_stimulus_id;
        self.next_stimulus_id += 1;
        Stimulus {
            id,
            slot,
            kind,
            appeared_at: now,
            state: TargetState::Visible,
        }
    }

    fn expire_round(&mut self, index: u32, at: Millis) {
        let Some(round) = self.round.as_mut() else {
            return;
        };
        if round.index != index || !round.target.is_visible() {
            return;
        }
        round.target.state = TargetState::Expired { at };
        for distractor in round.distractors.iter_mut() {
            distractor.state = TargetState::Expired { at };
        }
        self.errors += 1;
        self.distraction_events += 1;
        debug!(round = index, "target missed");
        self.resolve_round(at);
    }

    fn resolve_round(&mut self, at: Millis) {
        self.rounds_resolved += 1;
        if self.rounds_resolved >= self.config.total_rounds {
            self.finish(at, EndReason::Completed);
        } else {
            self.spawn_round(at);
        }
    }

    fn finish(&mut self, at: Millis, reason: EndReason) {
        self.timers.cancel_all();
        self.ended_at = at.max(self.started_at);
        self.status = SessionStatus::Finished(reason);
        self.round = None;

        let metrics = self.build_metrics(reason);
        info!(
            session_id = %metrics.session_id,
            ?reason,
            score = self.score,
            errors = self.errors,
            "target-pop session finished"
        );
        self.metrics = Some(metrics);
    }

    fn build_metrics(&self, reason: EndReason) -> SessionMetrics {
        let elapsed_ms = self.ended_at - self.started_at;
        let minutes = elapsed_ms as f64 / 60_000.0;

        let error_rate = if self.config.total_rounds > 0 {
            (self.wrong_target_clicks as f64 / self.config.total_rounds as f64 * 100.0)
                .clamp(0.0, 100.0)
        } else {
            0.0
        };
        let distraction = if minutes > 0.0 {
            self.distractor_clicks as f64 / minutes
        } else {
            0.0
        };
        let incomplete = if reason == EndReason::Completed { 0.0 } else { 1.0 };

        let features = CanonicalFeatureRow::new()
            .with(Feature::Age, self.age as f64)
            .with(Feature::PlaytimeMin, minutes)
            .with(Feature::SessionIncomplete, incomplete)
            .with(Feature::ScEr, error_rate)
            .with(Feature::ScDe, distraction)
            .with(Feature::ScTct, elapsed_ms as f64 / 1000.0)
            .with(Feature::ScRtv, self.reactions.std_dev());

        let details = GameDetails::TargetPop {
            score: self.score,
            rounds_played: self.rounds_resolved,
            errors: self.errors,
            wrong_target_clicks: self.wrong_target_clicks,
            distractor_clicks: self.distractor_clicks,
            distraction_events: self.distraction_events,
            mean_reaction_ms: self.reactions.mean(),
        };

        SessionMetrics::new(GameKind::TargetPop, self.age, features, details)
    }
}

impl SessionEngine for TargetPopEngine {
    fn game(&self) -> GameKind {
        GameKind::TargetPop
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
        debug!(age = self.age, rounds = self.config.total_rounds, "target-pop started");
        if self.config.total_rounds == 0 {
            self.finish(now, EndReason::Completed);
        } else {
            self.spawn_round(now);
        }
    }

    fn advance(&mut self, now: Millis) {
        while self.status == SessionStatus::Running {
            let Some((at, key)) = self.timers.pop_due(now) else {
                break;
            };
            match key {
                TimerKey::RoundExpiry(index) => self.expire_round(index, at),
            }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn play_all_hits(engine: &mut TargetPopEngine, start: Millis, delay: Millis) -> Millis {
        let mut now = start;
        engine.start(now);
        while engine.is_running() {
            let (slot, appeared) = engine.visible_target().unwrap();
            now = appeared + delay;
            assert!(matches!(engine.tap(slot, now), TapOutcome::Hit { .. }));
        }
        now
    }

    fn empty_slot(engine: &TargetPopEngine) -> u8 {
        let round = engine.round().unwrap();
        (0..GRID_SLOTS)
            .find(|s| *s != round.target.slot && !round.distractors.iter().any(|d| d.slot == *s))
            .unwrap()
    }

    #[test]
    fn test_all_hits_at_one_ms() {
        let mut engine = TargetPopEngine::new(5, 7);
        play_all_hits(&mut engine, 0, 1);

        assert_eq!(engine.status(), SessionStatus::Finished(EndReason::Completed));
        let metrics = engine.take_metrics().unwrap();
        let f = &metrics.features;
        assert_eq!(f.sc_er, Some(0.0));
        assert_eq!(f.sc_de, Some(0.0));
        assert!(f.sc_rtv.unwrap().abs() < 1e-9);
        assert_eq!(f.session_incomplete, Some(0.0));
        assert_eq!(f.age, Some(5.0));
        assert_eq!(f.sc_tct, Some(0.02));
        assert!(f.wfs_rt.is_none() && f.ft_cf.is_none());

        match metrics.details {
            GameDetails::TargetPop { score, rounds_played, .. } => {
                assert_eq!(score, 20);
                assert_eq!(rounds_played, 20);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_metrics_emitted_once() {
        let mut engine = TargetPopEngine::new(5, 1);
        play_all_hits(&mut engine, 0, 10);
        assert!(engine.take_metrics().is_some());
        assert!(engine.take_metrics().is_none());
    }

    #[test]
    fn test_timeouts_count_as_distraction_events() {
        let mut engine = TargetPopEngine::new(5, 3);
        engine.start(0);
        // Nobody taps: every round expires after 1600 ms
        engine.advance(20 * 1600);

        assert!(engine.is_finished());
        let metrics = engine.take_metrics().unwrap();
        assert_eq!(metrics.features.sc_tct, Some(32.0));
        assert_eq!(metrics.features.sc_er, Some(0.0));
        assert_eq!(metrics.features.sc_rtv, Some(0.0));
        match metrics.details {
            GameDetails::TargetPop {
                errors,
                distraction_events,
                score,
                ..
            } => {
                assert_eq!(errors, 20);
                assert_eq!(distraction_events, 20);
                assert_eq!(score, 0);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_next_round_spawns_at_expiry_instant() {
        let mut engine = TargetPopEngine::new(10, 9);
        engine.start(1_000);
        engine.advance(1_000 + 1_300);
        let round = engine.round().unwrap();
        assert_eq!(round.index, 1);
        assert_eq!(round.target.appeared_at, 2_300);
        assert_eq!(round.expires_at, 3_600);
    }

    #[test]
    fn test_tap_at_expiry_resolves_against_next_round() {
        let mut engine = TargetPopEngine::new(5, 11);
        engine.start(0);
        let (old_slot, _) = engine.visible_target().unwrap();
        let outcome = engine.tap(old_slot, 1600);
        assert!(engine.rounds_resolved() >= 1);
        let (new_slot, appeared) = engine.visible_target().unwrap();
        assert_eq!(appeared, 1600);
        if new_slot == old_slot {
            assert_eq!(outcome, TapOutcome::Hit { reaction_ms: 0 });
        } else {
            assert_ne!(outcome, TapOutcome::Ignored);
            assert!(!matches!(outcome, TapOutcome::Hit { .. }));
        }
    }

    #[test]
    fn test_wrong_slot_and_distractor_taps() {
        let config = TargetPopConfig {
            visible_time_ms: 1000,
            total_rounds: 4,
            pop_anim_ms: 300,
            distractor_chance: 1.0,
            max_distractors: 2,
        };
        let mut engine = TargetPopEngine::with_config(config, 12, 5);
        engine.start(0);

        let distractor = engine.visible_distractors()[0];
        assert_eq!(engine.tap(distractor, 100), TapOutcome::DistractorTap);
        let empty = empty_slot(&engine);
        assert_eq!(engine.tap(empty, 200), TapOutcome::WrongSlot);
        assert_eq!(engine.reactions.incorrect(), 2);
        assert!(engine.reactions.times().is_empty());

        // Remaining rounds expire
        engine.advance(10_000);
        let metrics = engine.take_metrics().unwrap();
        // One wrong-slot tap out of four rounds
        assert_eq!(metrics.features.sc_er, Some(25.0));
        // One distractor tap over 4 s
        let expected_de = 1.0 / (4000.0 / 60_000.0);
        assert!((metrics.features.sc_de.unwrap() - expected_de).abs() < 1e-9);
        match metrics.details {
            GameDetails::TargetPop {
                errors,
                wrong_target_clicks,
                distractor_clicks,
                ..
            } => {
                assert_eq!(errors, 6);
                assert_eq!(wrong_target_clicks, 1);
                assert_eq!(distractor_clicks, 1);
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_error_rate_is_clamped() {
        let config = TargetPopConfig {
            visible_time_ms: 1000,
            total_rounds: 1,
            pop_anim_ms: 300,
            distractor_chance: 0.0,
            max_distractors: 0,
        };
        let mut engine = TargetPopEngine::with_config(config, 8, 2);
        engine.start(0);
        let empty = empty_slot(&engine);
        for t in 1..=5 {
            engine.tap(empty, t * 10);
        }
        engine.advance(1000);
        let metrics = engine.take_metrics().unwrap();
        assert_eq!(metrics.features.sc_er, Some(100.0));
    }

    #[test]
    fn test_reaction_time_variability() {
        let config = TargetPopConfig {
            visible_time_ms: 1000,
            total_rounds: 2,
            pop_anim_ms: 300,
            distractor_chance: 0.0,
            max_distractors: 0,
        };
        let mut engine = TargetPopEngine::with_config(config, 9, 4);
        engine.start(0);
        let (slot, _) = engine.visible_target().unwrap();
        engine.tap(slot, 200);
        let (slot, _) = engine.visible_target().unwrap();
        engine.tap(slot, 200 + 400);

        let metrics = engine.take_metrics().unwrap();
        // RTs 200 and 400: population sd = 100
        assert!((metrics.features.sc_rtv.unwrap() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_abort_marks_incomplete_and_ignores_input() {
        let mut engine = TargetPopEngine::new(14, 8);
        engine.start(0);
        engine.abort(500);
        assert_eq!(engine.status(), SessionStatus::Finished(EndReason::Aborted));
        assert_eq!(engine.next_deadline(), None);
        assert_eq!(engine.tap(0, 600), TapOutcome::Ignored);

        let metrics = engine.take_metrics().unwrap();
        assert!(metrics.session_incomplete());
    }

    #[test]
    fn test_same_seed_same_layout() {
        let mut a = TargetPopEngine::new(10, 42);
        let mut b = TargetPopEngine::new(10, 42);
        a.start(0);
        b.start(0);
        assert_eq!(a.round(), b.round());
    }
}
