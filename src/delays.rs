//! Delay manager
//!
//! A keyed registry of active timers that block or defer equipment
//! transitions: startup staggering of high-current loads, per-equipment
//! change cooldowns, declarative interlocks, and heater run-on. An
//! operation arriving against an active delay is parked in the key's
//! single pending slot (latest wins) and replayed when the delay clears,
//! unless the caller marked it immediate, which fails fast.

use crate::config::DelaysConfig;
use crate::error::{Result, TritonError};
use crate::logging::get_logger;
use crate::model::EntityKind;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// Why a delay exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    /// High-current loads may not start within the stagger window of
    /// each other
    StartupStagger,
    /// Per-equipment minimum between state changes
    ChangeCooldown,
    /// Pump run-on after a heater turns off
    HeaterCooldown,
}

impl Purpose {
    fn tag(&self) -> &'static str {
        match self {
            Purpose::StartupStagger => "startup-stagger",
            Purpose::ChangeCooldown => "change-cooldown",
            Purpose::HeaterCooldown => "heater-cooldown",
        }
    }
}

/// Registry key: one timer per (entity kind, id, purpose)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DelayKey {
    pub kind: EntityKind,
    pub id: u32,
    pub purpose: Purpose,
}

impl DelayKey {
    pub fn new(kind: EntityKind, id: u32, purpose: Purpose) -> Self {
        Self { kind, id, purpose }
    }

    /// The conflicting-key string carried by `InterlockViolation`
    pub fn describe(&self) -> String {
        format!("{}:{}:{}", self.kind, self.id, self.purpose.tag())
    }
}

/// An operation parked until its delay clears; replayed through the
/// bridge's intent lane
pub type PendingOp = crate::boards::IntentRequest;

struct Inner {
    /// Active timers and their expiry
    timers: HashMap<DelayKey, Instant>,
    /// One parked operation per expired-pending key, latest wins
    pending: HashMap<DelayKey, PendingOp>,
    /// Active interlock keys and the operation keys they exclude
    interlocks: HashMap<String, Vec<String>>,
    /// Most recent high-current start, for startup staggering
    last_high_current_start: Option<Instant>,
}

/// Keyed delay and interlock registry
pub struct DelayManager {
    inner: Mutex<Inner>,
    config: DelaysConfig,
    replay_tx: mpsc::UnboundedSender<PendingOp>,
    logger: crate::logging::StructuredLogger,
}

impl DelayManager {
    /// Create the manager plus the receiving half of the replay lane; the
    /// bridge drains replayed operations back into intent dispatch
    pub fn new(config: DelaysConfig) -> (Self, mpsc::UnboundedReceiver<PendingOp>) {
        let (replay_tx, replay_rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: Mutex::new(Inner {
                    timers: HashMap::new(),
                    pending: HashMap::new(),
                    interlocks: HashMap::new(),
                    last_high_current_start: None,
                }),
                config,
                replay_tx,
                logger: get_logger("delays"),
            },
            replay_rx,
        )
    }

    /// Cooldown duration for one entity kind
    pub fn cooldown_for(&self, kind: EntityKind) -> Duration {
        let ms = match kind {
            EntityKind::Pump => self.config.pump_cooldown_ms,
            EntityKind::Heater => self.config.heater_cooldown_ms,
            EntityKind::Valve => self.config.valve_cooldown_ms,
            _ => 0,
        };
        Duration::from_millis(ms)
    }

    /// Activate an interlock key with the operation keys it excludes
    pub fn set_interlock(&self, key: &str, excludes: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner.interlocks.insert(
            key.to_string(),
            excludes.iter().map(|s| s.to_string()).collect(),
        );
        self.logger.debug(&format!("Interlock {} active", key));
    }

    pub fn clear_interlock(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.interlocks.remove(key).is_some() {
            self.logger.debug(&format!("Interlock {} cleared", key));
        }
    }

    /// Fail with `InterlockViolation` when any active interlock excludes
    /// the operation key
    pub fn check_interlock(&self, op_key: &str) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        for (key, excludes) in &inner.interlocks {
            if excludes.iter().any(|excluded| excluded == op_key) {
                return Err(TritonError::interlock(key.clone()));
            }
        }
        Ok(())
    }

    /// Start (or restart) a timer
    pub fn start(&self, key: DelayKey, duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.timers.insert(key, Instant::now() + duration);
    }

    /// Start the per-kind change cooldown for an entity
    pub fn start_cooldown(&self, kind: EntityKind, id: u32) {
        let duration = self.cooldown_for(kind);
        if !duration.is_zero() {
            self.start(DelayKey::new(kind, id, Purpose::ChangeCooldown), duration);
        }
    }

    /// Start the pump run-on window after a heater turns off
    pub fn start_heater_run_on(&self, body_id: u32) {
        let duration = Duration::from_millis(self.config.heater_run_on_ms);
        if !duration.is_zero() {
            self.start(
                DelayKey::new(EntityKind::Heater, body_id, Purpose::HeaterCooldown),
                duration,
            );
        }
    }

    /// Record a high-current load start for staggering
    pub fn note_high_current_start(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.last_high_current_start = Some(Instant::now());
    }

    /// Remaining stagger wait before another high-current load may start
    pub fn stagger_remaining(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        match inner.last_high_current_start {
            Some(at) => {
                Duration::from_millis(self.config.startup_stagger_ms)
                    .saturating_sub(at.elapsed())
            }
            None => Duration::ZERO,
        }
    }

    /// Time left on a timer, `None` once expired or absent
    pub fn remaining(&self, key: &DelayKey) -> Option<Duration> {
        let mut inner = self.inner.lock().unwrap();
        match inner.timers.get(key) {
            Some(until) => {
                let now = Instant::now();
                if *until <= now {
                    inner.timers.remove(key);
                    None
                } else {
                    Some(*until - now)
                }
            }
            None => None,
        }
    }

    /// Gate an operation on a delay key. Returns `Ok(true)` when clear to
    /// proceed, `Ok(false)` when the operation was parked for replay, and
    /// `InterlockViolation` when `immediate` demanded fail-fast.
    pub fn gate(&self, key: DelayKey, op: PendingOp, immediate: bool) -> Result<bool> {
        if self.remaining(&key).is_none() {
            return Ok(true);
        }
        if immediate {
            return Err(TritonError::interlock(key.describe()));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.pending.insert(key, op);
        self.logger
            .debug(&format!("Parked operation behind {}", key.describe()));
        Ok(false)
    }

    /// Release expired timers and replay their parked operations; the
    /// bridge calls this from its housekeeping tick
    pub fn pump(&self) {
        let now = Instant::now();
        let due: Vec<(DelayKey, Option<PendingOp>)> = {
            let mut inner = self.inner.lock().unwrap();
            let expired: Vec<DelayKey> = inner
                .timers
                .iter()
                .filter(|(_, until)| **until <= now)
                .map(|(key, _)| *key)
                .collect();
            expired
                .into_iter()
                .map(|key| {
                    inner.timers.remove(&key);
                    let op = inner.pending.remove(&key);
                    (key, op)
                })
                .collect()
        };

        for (key, op) in due {
            if let Some(op) = op {
                self.logger
                    .debug(&format!("Replaying operation parked behind {}", key.describe()));
                self.replay_tx.send(op).ok();
            }
        }
    }

    /// Earliest timer expiry, for the housekeeping sleep
    pub fn next_expiry(&self) -> Option<Instant> {
        let inner = self.inner.lock().unwrap();
        inner.timers.values().min().copied()
    }

    /// Active timer count, exposed for status surfaces
    pub fn active_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::IntentRequest;

    fn manager() -> (DelayManager, mpsc::UnboundedReceiver<PendingOp>) {
        DelayManager::new(DelaysConfig::default())
    }

    fn op() -> IntentRequest {
        IntentRequest::SetCircuitState { id: 6, on: true }
    }

    #[tokio::test]
    async fn interlock_violation_names_the_conflicting_key() {
        let (delays, _rx) = manager();
        delays.set_interlock("spa-heat", &["pool-heat"]);

        let err = delays.check_interlock("pool-heat").unwrap_err();
        match err {
            TritonError::InterlockViolation { conflicting_key } => {
                assert_eq!(conflicting_key, "spa-heat");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(delays.check_interlock("spa-jets").is_ok());
        delays.clear_interlock("spa-heat");
        assert!(delays.check_interlock("pool-heat").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn gate_parks_and_replays_after_expiry() {
        let (delays, mut rx) = manager();
        let key = DelayKey::new(EntityKind::Pump, 1, Purpose::ChangeCooldown);
        delays.start(key, Duration::from_secs(30));

        assert!(!delays.gate(key, op(), false).unwrap());

        tokio::time::advance(Duration::from_secs(31)).await;
        delays.pump();

        let replayed = rx.recv().await.unwrap();
        assert!(matches!(
            replayed,
            IntentRequest::SetCircuitState { id: 6, on: true }
        ));

        // Timer is gone; the gate is clear
        assert!(delays.gate(key, op(), false).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_fails_fast_with_the_delay_key() {
        let (delays, _rx) = manager();
        let key = DelayKey::new(EntityKind::Heater, 2, Purpose::ChangeCooldown);
        delays.start(key, Duration::from_secs(120));

        let err = delays.gate(key, op(), true).unwrap_err();
        match err {
            TritonError::InterlockViolation { conflicting_key } => {
                assert_eq!(conflicting_key, "heater:2:change-cooldown");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_slot_keeps_the_latest_operation() {
        let (delays, mut rx) = manager();
        let key = DelayKey::new(EntityKind::Pump, 1, Purpose::ChangeCooldown);
        delays.start(key, Duration::from_secs(30));

        delays
            .gate(key, IntentRequest::SetCircuitState { id: 6, on: true }, false)
            .unwrap();
        delays
            .gate(key, IntentRequest::SetCircuitState { id: 6, on: false }, false)
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        delays.pump();

        let replayed = rx.recv().await.unwrap();
        assert!(matches!(
            replayed,
            IntentRequest::SetCircuitState { id: 6, on: false }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stagger_window_tracks_last_start() {
        let (delays, _rx) = manager();
        assert_eq!(delays.stagger_remaining(), Duration::ZERO);

        delays.note_high_current_start();
        assert!(delays.stagger_remaining() > Duration::from_millis(1900));

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(delays.stagger_remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldowns_come_from_config() {
        let (delays, _rx) = manager();
        assert_eq!(delays.cooldown_for(EntityKind::Pump), Duration::from_secs(30));
        assert_eq!(
            delays.cooldown_for(EntityKind::Heater),
            Duration::from_secs(120)
        );
        assert_eq!(delays.cooldown_for(EntityKind::Circuit), Duration::ZERO);
    }
}
