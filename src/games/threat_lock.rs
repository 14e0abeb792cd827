//! Threat-Lock session engine
//!
//! Threats descend an 800×600 field. At a fixed interval one threat in the
//! upper part of the field becomes lockable for a short window; locking it
//! requires full energy and a click on the threat. Clicking without energy or
//! without a window is an impulse error, and letting a window lapse is a
//! sustained-attention failure.
//!
//! The engine runs on a fixed 100 ms tick. Lock-window closes and threat
//! destruction are cancellable deadlines processed before each tick.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Millis;
use crate::config::ThreatLockConfig;
use crate::games::{round_to, EndReason, ReactionLog, SessionEngine, SessionStatus, TICK_MS};
use crate::timer::TimerQueue;
use crate::types::{
    CanonicalFeatureRow, Feature, GameDetails, GameKind, ResponseEvent, SessionMetrics,
};

pub const FIELD_WIDTH: f64 = 800.0;
pub const FIELD_HEIGHT: f64 = 600.0;

/// Horizontal spawn margin on each side
pub const SPAWN_MARGIN: i64 = 50;
pub const SPAWN_Y: f64 = -50.0;

/// Vertical band in which threats can become lockable (exclusive)
pub const LOCK_BAND_TOP: f64 = 50.0;
pub const LOCK_BAND_BOTTOM: f64 = 400.0;

/// How long a lock window stays open
pub const LOCK_WINDOW_MS: Millis = 1000;

/// Delay between a lock and the threat's destruction
pub const DESTROY_DELAY_MS: Millis = 300;

pub const MAX_HEALTH: f64 = 100.0;
pub const MAX_ENERGY: f64 = 100.0;

/// Ticks a combo survives without a new lock
pub const COMBO_TICKS: u32 = 30;

/// Cap on points awarded per lock
pub const MAX_COMBO_POINTS: u32 = 5;

pub const POWERUP_DROP_CHANCE: f64 = 0.2;
pub const POWERUP_PICK_RADIUS: f64 = 25.0;
pub const POWERUP_FALL_SPEED: f64 = 1.0;

/// Powerups below this line are gone
pub const POWERUP_FLOOR_Y: f64 = FIELD_HEIGHT + 30.0;

pub const HEALTH_POWERUP: f64 = 15.0;
pub const ENERGY_POWERUP: f64 = 50.0;

pub const MOVEMENT_VARIANCE_CHANCE: f64 = 0.1;
pub const MOVEMENT_VARIANCE_STEP: f64 = 0.5;

/// A point on the play field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    Alien,
    Meteor,
}

impl ThreatType {
    /// Health lost when this threat breaches the bottom edge
    pub fn damage(&self) -> f64 {
        match self {
            ThreatType::Alien => 5.0,
            ThreatType::Meteor => 10.0,
        }
    }
}

/// Lifecycle of a threat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum ThreatState {
    Active,
    Lockable { window_opened_at: Millis },
    Locked { locked_at: Millis },
    Destroyed { at: Millis },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threat {
    pub id: u64,
    pub position: Point,
    pub kind: ThreatType,
    /// Pixels per tick
    pub speed: f64,
    pub spawned_at: Millis,
    pub state: ThreatState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupType {
    Shield,
    Health,
    Energy,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Powerup {
    pub id: u64,
    pub position: Point,
    pub kind: PowerupType,
}

/// Why a click counted as an impulse error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpulseReason {
    EnergyNotFull,
    NoLockWindow,
}

/// Result of a click on the field
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ShotOutcome {
    PowerupCollected {
        kind: PowerupType,
    },
    Locked {
        threat_id: u64,
        reaction_ms: Millis,
        combo: u32,
        points: u32,
    },
    ImpulseError {
        reason: ImpulseReason,
    },
    /// Session not running
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct LockWindow {
    threat_id: u64,
    opened_at: Millis,
}

#[derive(Debug, Clone, PartialEq)]
enum TimerKey {
    CloseLockWindow(u64),
    Destroy(u64),
}

/// Threat-Lock engine
#[derive(Debug, Clone)]
pub struct ThreatLockEngine {
    config: ThreatLockConfig,
    age: u8,
    rng: ChaCha8Rng,
    timers: TimerQueue<TimerKey>,
    status: SessionStatus,
    started_at: Millis,
    ended_at: Millis,
    next_tick_at: Millis,
    next_spawn_at: Millis,
    next_lock_at: Millis,
    next_entity_id: u64,

    threats: Vec<Threat>,
    powerups: Vec<Powerup>,
    lock_window: Option<LockWindow>,

    health: f64,
    energy: f64,
    score: u32,
    combo: u32,
    combo_timer: u32,
    impulse_errors: u32,
    sustained_failures: u32,
    movement_variance: f64,
    reactions: ReactionLog,

    metrics: Option<SessionMetrics>,
}

impl ThreatLockEngine {
    pub fn new(age: u8, seed: u64) -> Self {
        Self::with_config(ThreatLockConfig::for_age(age as i64), age, seed)
    }

    pub fn with_config(config: ThreatLockConfig, age: u8, seed: u64) -> Self {
        Self {
            config,
            age,
            rng: ChaCha8Rng::seed_from_u64(seed),
            timers: TimerQueue::new(),
            status: SessionStatus::NotStarted,
            started_at: 0,
            ended_at: 0,
            next_tick_at: 0,
            next_spawn_at: 0,
            next_lock_at: 0,
            next_entity_id: 0,
            threats: Vec::new(),
            powerups: Vec::new(),
            lock_window: None,
            health: MAX_HEALTH,
            energy: 0.0,
            score: 0,
            combo: 0,
            combo_timer: 0,
            impulse_errors: 0,
            sustained_failures: 0,
            movement_variance: 0.0,
            reactions: ReactionLog::new(),
            metrics: None,
        }
    }

    pub fn config(&self) -> &ThreatLockConfig {
        &self.config
    }

    /// Threats currently on the field
    pub fn threats(&self) -> &[Threat] {
        &self.threats
    }

    pub fn powerups(&self) -> &[Powerup] {
        &self.powerups
    }

    /// The threat with an open lock window
    pub fn lockable_threat(&self) -> Option<&Threat> {
        let window = self.lock_window?;
        self.threats.iter().find(|t| t.id == window.threat_id)
    }

    pub fn health(&self) -> f64 {
        self.health
    }

    pub fn energy(&self) -> f64 {
        self.energy
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn combo(&self) -> u32 {
        self.combo
    }

    /// Click the field at `at` and time `now`.
    ///
    /// Only powerup pickup depends on the click position. Any other click
    /// locks the open window's threat when the shield is fully charged.
    pub fn shoot(&mut self, at: Point, now: Millis) -> ShotOutcome {
        if self.status != SessionStatus::Running {
            return ShotOutcome::Ignored;
        }
        self.advance(now);
        if self.status != SessionStatus::Running {
            return ShotOutcome::Ignored;
        }

        if let Some(idx) = self
            .powerups
            .iter()
            .position(|p| p.position.distance(&at) < POWERUP_PICK_RADIUS)
        {
            let powerup = self.powerups.remove(idx);
            self.collect(powerup.kind);
            return ShotOutcome::PowerupCollected { kind: powerup.kind };
        }

        if self.energy < MAX_ENERGY {
            return self.impulse_error(ImpulseReason::EnergyNotFull, now);
        }

        let Some(window) = self.lock_window else {
            return self.impulse_error(ImpulseReason::NoLockWindow, now);
        };

        let Some(idx) = self
            .threats
            .iter()
            .position(|t| t.id == window.threat_id)
        else {
            return self.impulse_error(ImpulseReason::NoLockWindow, now);
        };

        let threat = &mut self.threats[idx];
        let event = ResponseEvent {
            timestamp: now,
            target_ref: Some(threat.id),
            correct: true,
        };
        threat.state = ThreatState::Locked { locked_at: now };
        let threat_id = threat.id;
        let reaction_ms = self.reactions.record(&event, window.opened_at);

        self.lock_window = None;
        self.timers.cancel(&TimerKey::CloseLockWindow(threat_id));
        self.timers
            .schedule(now + DESTROY_DELAY_MS, TimerKey::Destroy(threat_id));

        self.energy = 0.0;
        self.combo += 1;
        self.combo_timer = COMBO_TICKS;
        let points = self.combo.min(MAX_COMBO_POINTS);
        self.score += points;
        debug!(threat_id, reaction_ms, combo = self.combo, points, "threat locked");

        ShotOutcome::Locked {
            threat_id,
            reaction_ms,
            combo: self.combo,
            points,
        }
    }

    fn impulse_error(&mut self, reason: ImpulseReason, now: Millis) -> ShotOutcome {
        let event = ResponseEvent {
            timestamp: now,
            target_ref: self.lock_window.map(|w| w.threat_id),
            correct: false,
        };
        let opened_at = self.lock_window.map_or(now, |w| w.opened_at);
        self.reactions.record(&event, opened_at);
        self.impulse_errors += 1;
        self.combo = 0;
        self.combo_timer = 0;
        debug!(?reason, at = now, "impulse error");
        ShotOutcome::ImpulseError { reason }
    }

    fn collect(&mut self, kind: PowerupType) {
        match kind {
            PowerupType::Shield => self.energy = MAX_ENERGY,
            PowerupType::Health => self.health = (self.health + HEALTH_POWERUP).min(MAX_HEALTH),
            PowerupType::Energy => self.energy = (self.energy + ENERGY_POWERUP).min(MAX_ENERGY),
        }
        debug!(?kind, health = self.health, energy = self.energy, "powerup collected");
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    fn process_timers(&mut self, now: Millis) {
        while self.status == SessionStatus::Running {
            let Some((at, key)) = self.timers.pop_due(now) else {
                break;
            };
            match key {
                TimerKey::CloseLockWindow(id) => self.close_lock_window(id, at),
                TimerKey::Destroy(id) => self.destroy(id, at),
            }
        }
    }

    fn close_lock_window(&mut self, id: u64, at: Millis) {
        if self.lock_window.map(|w| w.threat_id) == Some(id) {
            self.lock_window = None;
        }
        if let Some(threat) = self.threats.iter_mut().find(|t| t.id == id) {
            if matches!(threat.state, ThreatState::Lockable { .. }) {
                threat.state = ThreatState::Active;
                self.sustained_failures += 1;
                debug!(threat_id = id, at, "lock window lapsed");
            }
        }
    }

    fn destroy(&mut self, id: u64, at: Millis) {
        let Some(threat) = self.threats.iter_mut().find(|t| t.id == id) else {
            return;
        };
        threat.state = ThreatState::Destroyed { at };
        let position = threat.position;
        debug!(threat_id = id, at, "threat destroyed");

        if self.rng.gen::<f64>() < POWERUP_DROP_CHANCE {
            let kind = match self.rng.gen_range(0..3) {
                0 => PowerupType::Shield,
                1 => PowerupType::Health,
                _ => PowerupType::Energy,
            };
            let powerup = Powerup {
                id: self.next_id(),
                position,
                kind,
            };
            debug!(?kind, "powerup dropped");
            self.powerups.push(powerup);
        }
    }

    fn spawn_threat(&mut self, t: Millis) {
        let x = self
            .rng
            .gen_range(SPAWN_MARGIN..=FIELD_WIDTH as i64 - SPAWN_MARGIN) as f64;
        let kind = if self.rng.gen::<f64>() > 0.5 {
            ThreatType::Alien
        } else {
            ThreatType::Meteor
        };
        // Speeds are drawn in tenths of a pixel
        let low = (self.config.threat_speed.min * 10.0).round() as i64;
        let high = ((self.config.threat_speed.max * 10.0).round() as i64).max(low);
        let speed = self.rng.gen_range(low..=high) as f64 / 10.0;

        let threat = Threat {
            id: self.next_id(),
            position: Point::new(x, SPAWN_Y),
            kind,
            speed,
            spawned_at: t,
            state: ThreatState::Active,
        };
        debug!(threat_id = threat.id, ?kind, x, speed, "threat spawned");
        self.threats.push(threat);
    }

    fn open_lock_window(&mut self, t: Millis) {
        if self.lock_window.is_some() {
            return;
        }
        let candidates: Vec<usize> = self
            .threats
            .iter()
            .enumerate()
            .filter(|(_, th)| {
                th.state == ThreatState::Active
                    && th.position.y > LOCK_BAND_TOP
                    && th.position.y < LOCK_BAND_BOTTOM
            })
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return;
        }
        let idx = candidates[self.rng.gen_range(0..candidates.len())];
        let threat = &mut self.threats[idx];
        threat.state = ThreatState::Lockable {
            window_opened_at: t,
        };
        let threat_id = threat.id;
        self.lock_window = Some(LockWindow {
            threat_id,
            opened_at: t,
        });
        self.timers
            .schedule(t + LOCK_WINDOW_MS, TimerKey::CloseLockWindow(threat_id));
        debug!(threat_id, at = t, "lock window opened");
    }

    fn move_entities(&mut self) {
        self.threats
            .retain(|t| !matches!(t.state, ThreatState::Destroyed { .. }));

        let mut breached = Vec::new();
        for threat in self.threats.iter_mut() {
            threat.position.y += threat.speed;
            if threat.position.y > FIELD_HEIGHT {
                breached.push(threat.id);
            }
        }

        for id in breached {
            let Some(idx) = self.threats.iter().position(|t| t.id == id) else {
                continue;
            };
            let threat = self.threats.remove(idx);
            self.health = (self.health - threat.kind.damage()).max(0.0);
            self.combo = 0;
            self.combo_timer = 0;
            if self.lock_window.map(|w| w.threat_id) == Some(id) {
                self.lock_window = None;
            }
            self.timers.cancel(&TimerKey::CloseLockWindow(id));
            self.timers.cancel(&TimerKey::Destroy(id));
            debug!(threat_id = id, kind = ?threat.kind, health = self.health, "threat breached");
        }

        for powerup in self.powerups.iter_mut() {
            powerup.position.y += POWERUP_FALL_SPEED;
        }
        self.powerups.retain(|p| p.position.y < POWERUP_FLOOR_Y);
    }

    fn tick(&mut self, t: Millis) {
        let elapsed = t - self.started_at;
        if elapsed >= self.config.game_duration_ms {
            self.finish(t, EndReason::Completed);
            return;
        }

        self.energy = (self.energy + self.config.shield_charge_rate).min(MAX_ENERGY);

        if self.combo > 0 {
            if self.combo_timer > 0 {
                self.combo_timer -= 1;
            } else {
                self.combo = 0;
            }
        }

        while self.next_spawn_at <= t {
            self.spawn_threat(t);
            self.next_spawn_at += self.config.spawn_interval_ms.max(TICK_MS);
        }

        if self.next_lock_at <= t {
            self.open_lock_window(t);
            while self.next_lock_at <= t {
                self.next_lock_at += self.config.lock_interval_ms.max(TICK_MS);
            }
        }

        self.move_entities();

        if self.rng.gen::<f64>() < MOVEMENT_VARIANCE_CHANCE {
            self.movement_variance += self.rng.gen::<f64>() * MOVEMENT_VARIANCE_STEP;
        }

        if self.health <= 0.0 {
            self.finish(t, EndReason::HealthDepleted);
        }
    }

    fn finish(&mut self, at: Millis, reason: EndReason) {
        self.timers.cancel_all();
        self.lock_window = None;
        self.ended_at = at.max(self.started_at);
        self.status = SessionStatus::Finished(reason);

        let metrics = self.build_metrics(reason);
        info!(
            session_id = %metrics.session_id,
            ?reason,
            score = self.score,
            health = self.health,
            impulse_errors = self.impulse_errors,
            sustained_failures = self.sustained_failures,
            "threat-lock session finished"
        );
        self.metrics = Some(metrics);
    }

    fn build_metrics(&self, reason: EndReason) -> SessionMetrics {
        let elapsed_ms = self.ended_at - self.started_at;
        let avg_reaction_time_ms = self.reactions.mean().round();
        let movement_variance = round_to(self.movement_variance, 2);
        let incomplete = match reason {
            EndReason::HealthDepleted | EndReason::Aborted => 1.0,
            _ => 0.0,
        };

        let features = CanonicalFeatureRow::new()
            .with(Feature::Age, self.age as f64)
            .with(Feature::SessionIncomplete, incomplete)
            .with(Feature::FtCf, self.score as f64)
            .with(Feature::FtMmv, movement_variance)
            .with(Feature::FtEii, self.impulse_errors as f64)
            .with(Feature::FtTp, self.sustained_failures as f64);

        let details = GameDetails::ThreatLock {
            score: self.score,
            health: self.health,
            impulse_errors: self.impulse_errors,
            sustained_failures: self.sustained_failures,
            avg_reaction_time_ms,
            movement_variance,
            duration_sec: (elapsed_ms as f64 / 1000.0).round() as u64,
        };

        SessionMetrics::new(GameKind::ThreatLock, self.age, features, details)
    }
}

impl SessionEngine for ThreatLockEngine {
    fn game(&self) -> GameKind {
        GameKind::ThreatLock
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
        self.next_tick_at = now + TICK_MS;
        self.next_spawn_at = now + self.config.spawn_interval_ms;
        self.next_lock_at = now + self.config.lock_interval_ms;
        debug!(age = self.age, duration_ms = self.config.game_duration_ms, "threat-lock started");
    }

    fn advance(&mut self, now: Millis) {
        while self.status == SessionStatus::Running && self.next_tick_at <= now {
            let t = self.next_tick_at;
            self.process_timers(t);
            if self.status == SessionStatus::Running {
                self.tick(t);
            }
            self.next_tick_at += TICK_MS;
        }
        self.process_timers(now);
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
