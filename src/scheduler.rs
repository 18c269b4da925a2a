//! Schedule execution
//!
//! Runs once per second against current local time. Every enabled
//! schedule whose day mask matches today and whose window contains now
//! ensures its circuit on; elapsed windows ensure off unless another
//! schedule keeps the circuit on (overlap is union-ON). Sunrise and
//! sunset anchored edges resolve through a pluggable sun-position
//! calculator. All commands go through board dispatch at *background*
//! priority and respect the delay manager.
//!
//! For the standalone variant the scheduler also enforces egg timers:
//! circuits whose timed run expired are turned off.

use crate::boards::{Board, BoardCtx, IntentOptions, IntentRequest};
use crate::config::{ControllerType, LocationConfig};
use crate::logging::get_logger;
use crate::model::config::{schedule_time, ScheduleConfig};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, Duration};

/// Pluggable sunrise/sunset source for astronomically anchored schedules
pub trait SunCalculator: Send + Sync {
    /// Sunrise and sunset as minutes of local day, `None` during polar
    /// day or night
    fn sun_times(&self, date: NaiveDate, latitude: f64, longitude: f64, tz: &Tz)
        -> Option<(u16, u16)>;
}

/// Built-in solar-position approximation.
///
/// Declination from the day-of-year cosine model and the standard
/// hour-angle formula; accurate to a few minutes, which is well inside
/// the one-minute granularity of schedule windows.
pub struct SolarPosition;

impl SunCalculator for SolarPosition {
    fn sun_times(
        &self,
        date: NaiveDate,
        latitude: f64,
        longitude: f64,
        tz: &Tz,
    ) -> Option<(u16, u16)> {
        let n = date.ordinal() as f64;
        let decl = (-23.44f64).to_radians() * ((360.0 / 365.0) * (n + 10.0)).to_radians().cos();
        let lat = latitude.to_radians();

        let cos_omega = -(lat.tan() * decl.tan());
        if !(-1.0..=1.0).contains(&cos_omega) {
            return None;
        }
        let omega_hours = cos_omega.acos().to_degrees() / 15.0;

        // Solar noon in UTC hours, then both crossings
        let solar_noon_utc = 12.0 - longitude / 15.0;
        let sunrise_utc = solar_noon_utc - omega_hours;
        let sunset_utc = solar_noon_utc + omega_hours;

        let convert = |utc_hours: f64| -> Option<u16> {
            let minutes = (utc_hours * 60.0).round() as i64;
            let base = date.and_hms_opt(0, 0, 0)?;
            let utc_dt = Utc.from_utc_datetime(&(base + chrono::Duration::minutes(minutes)));
            let local = utc_dt.with_timezone(tz);
            Some((local.hour() * 60 + local.minute()) as u16)
        };

        Some((convert(sunrise_utc)?, convert(sunset_utc)?))
    }
}

/// One resolved schedule window in minutes of local day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Window {
    start: u16,
    end: u16,
    wraps: bool,
}

impl Window {
    /// Whether `now` (minutes of day) falls inside `[start, end)`.
    /// An empty window never contains anything.
    fn contains(&self, now: u16) -> bool {
        if self.start == self.end {
            return false;
        }
        if self.wraps {
            now >= self.start || now < self.end
        } else {
            now >= self.start && now < self.end
        }
    }

    /// Whether the window has already started today
    fn started(&self, now: u16) -> bool {
        self.wraps || now >= self.start
    }
}

/// The 1 Hz schedule executor
pub struct Scheduler {
    board: Arc<dyn Board>,
    ctx: BoardCtx,
    location: LocationConfig,
    sun: Box<dyn SunCalculator>,
    logger: crate::logging::StructuredLogger,
}

impl Scheduler {
    pub fn new(
        board: Arc<dyn Board>,
        ctx: BoardCtx,
        location: LocationConfig,
        sun: Box<dyn SunCalculator>,
    ) -> Self {
        Self {
            board,
            ctx,
            location,
            sun,
            logger: get_logger("scheduler"),
        }
    }

    fn timezone(&self) -> Tz {
        self.location
            .timezone
            .parse()
            .unwrap_or(chrono_tz::UTC)
    }

    /// Resolve a schedule's edges for the given date, substituting
    /// sunrise/sunset where anchored
    fn resolve_window(&self, schedule: &ScheduleConfig, date: NaiveDate, tz: &Tz) -> Window {
        let sun = if schedule.start_time_type != schedule_time::MANUAL
            || schedule.end_time_type != schedule_time::MANUAL
        {
            self.sun
                .sun_times(date, self.location.latitude, self.location.longitude, tz)
        } else {
            None
        };

        let edge = |anchor: u8, manual: u16| -> u16 {
            match (anchor, sun) {
                (schedule_time::SUNRISE, Some((sunrise, _))) => sunrise,
                (schedule_time::SUNSET, Some((_, sunset))) => sunset,
                _ => manual,
            }
        };

        let start = edge(schedule.start_time_type, schedule.start_time);
        let end = edge(schedule.end_time_type, schedule.end_time);
        Window {
            start,
            end,
            wraps: schedule.wraps_midnight || start > end,
        }
    }

    /// One evaluation pass; factored out of `run` for tests
    pub async fn evaluate(&self, now_utc: DateTime<Utc>) {
        let tz = self.timezone();
        let local = now_utc.with_timezone(&tz);
        let date = local.date_naive();
        let now_min = (local.hour() * 60 + local.minute()) as u16;
        let weekday_bit = 1u8 << local.weekday().num_days_from_monday();

        let (schedules, circuit_state) = self.ctx.changes.with_model(|m| {
            let schedules: Vec<ScheduleConfig> = m.config.schedules.iter().cloned().collect();
            let circuit_state: BTreeMap<u32, bool> = m
                .state
                .circuits
                .iter()
                .map(|c| (c.id, c.is_on))
                .collect();
            (schedules, circuit_state)
        });

        // Union-ON across overlapping schedules; elapsed windows push off
        let mut want_on: BTreeSet<u32> = BTreeSet::new();
        let mut want_off: BTreeSet<u32> = BTreeSet::new();
        let mut schedule_states: Vec<(u32, bool)> = Vec::new();

        for schedule in &schedules {
            if !schedule.enabled || schedule.days & weekday_bit == 0 {
                schedule_states.push((schedule.id, false));
                continue;
            }
            let window = self.resolve_window(schedule, date, &tz);
            let active = window.contains(now_min);
            schedule_states.push((schedule.id, active));
            if active {
                want_on.insert(schedule.circuit);
            } else if window.started(now_min) {
                want_off.insert(schedule.circuit);
            }
        }

        for id in &want_on {
            want_off.remove(id);
        }

        // Egg timers are host-enforced without an attached panel
        if self.board.controller_type() == ControllerType::Standalone {
            let expired: Vec<u32> = self.ctx.changes.with_model(|m| {
                m.state
                    .circuits
                    .iter()
                    .filter(|c| {
                        c.is_on
                            && c.end_time.map(|end| end <= now_utc).unwrap_or(false)
                            && !want_on.contains(&c.id)
                    })
                    .map(|c| c.id)
                    .collect()
            });
            for id in expired {
                want_off.insert(id);
            }
        }

        for (schedule_id, active) in schedule_states {
            self.ctx
                .changes
                .commit(|txn| {
                    txn.patch_schedule_state(schedule_id, |s| s.is_on = active)
                })
                .ok();
        }

        for (id, on) in want_on
            .iter()
            .map(|id| (*id, true))
            .chain(want_off.iter().map(|id| (*id, false)))
        {
            let current = circuit_state.get(&id).copied().unwrap_or(false);
            if current == on {
                continue;
            }
            let request = IntentRequest::SetCircuitState { id, on };
            if let Err(e) = self
                .board
                .dispatch(&self.ctx, request, IntentOptions::background())
                .await
            {
                self.logger
                    .debug(&format!("Scheduled circuit {} command failed: {}", id, e));
            }
        }
    }

    /// Run the 1 Hz loop until shutdown
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = interval(Duration::from_secs(1));
        self.logger.info("Scheduler started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.evaluate(Utc::now()).await;
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        self.logger.debug("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boards::standalone::StandaloneBoard;
    use crate::changes::ChangeEngine;
    use crate::delays::DelayManager;
    use crate::engine::runtime::EngineRuntime;
    use crate::model::config::CircuitConfig;
    use crate::model::SystemModel;
    use crate::port::mock::MockEndpoint;
    use crate::port::Port;
    use crate::protocol::ProtocolFamily;
    use tokio::sync::mpsc;

    fn ctx_with(model: SystemModel) -> BoardCtx {
        let changes = Arc::new(ChangeEngine::new(model));
        let (delays, _rx) = DelayManager::new(Default::default());
        let (endpoint, _peer) = MockEndpoint::pair();
        let port = Port::new(0, Box::new(endpoint));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (runtime, engine) = EngineRuntime::new(
            port,
            ProtocolFamily::Pentair16,
            Default::default(),
            events_tx,
            shutdown_rx,
        );
        tokio::spawn(runtime.run());
        BoardCtx {
            changes,
            delays: Arc::new(delays),
            engine,
        }
    }

    fn scheduler_for(model: SystemModel) -> Scheduler {
        let ctx = ctx_with(model);
        Scheduler::new(
            Arc::new(StandaloneBoard::new()),
            ctx,
            LocationConfig::default(),
            Box::new(SolarPosition),
        )
    }

    fn schedule(id: u32, circuit: u32, start: u16, end: u16, days: u8) -> ScheduleConfig {
        ScheduleConfig {
            id,
            circuit,
            start_time: start,
            end_time: end,
            days,
            ..Default::default()
        }
    }

    fn model_with_circuit_and(schedules: Vec<ScheduleConfig>) -> SystemModel {
        let mut model = SystemModel::default();
        model.config.circuits.upsert(CircuitConfig {
            id: 6,
            name: "Pool".to_string(),
            ..Default::default()
        });
        for s in schedules {
            model.config.schedules.upsert(s);
        }
        model
    }

    /// A Tuesday at 09:00 UTC
    fn tuesday_0900() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn window_containing_now_turns_circuit_on() {
        let sched = scheduler_for(model_with_circuit_and(vec![schedule(
            1, 6, 8 * 60, 17 * 60, 0x7F,
        )]));
        sched.evaluate(tuesday_0900()).await;

        let state = sched.ctx.changes.state_snapshot();
        assert!(state.circuits.get(6).unwrap().is_on);
        assert!(state.schedules.get(1).unwrap().is_on);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_window_turns_circuit_off() {
        let model = model_with_circuit_and(vec![schedule(1, 6, 6 * 60, 8 * 60, 0x7F)]);
        let sched = scheduler_for(model);
        sched
            .ctx
            .changes
            .commit(|txn| txn.patch_circuit_state(6, |c| c.is_on = true))
            .unwrap();

        sched.evaluate(tuesday_0900()).await;
        let state = sched.ctx.changes.state_snapshot();
        assert!(!state.circuits.get(6).unwrap().is_on);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_schedules_union_on() {
        // One elapsed, one active: the active window wins
        let model = model_with_circuit_and(vec![
            schedule(1, 6, 6 * 60, 8 * 60, 0x7F),
            schedule(2, 6, 8 * 60 + 30, 10 * 60, 0x7F),
        ]);
        let sched = scheduler_for(model);
        sched.evaluate(tuesday_0900()).await;

        let state = sched.ctx.changes.state_snapshot();
        assert!(state.circuits.get(6).unwrap().is_on);
        assert!(!state.schedules.get(1).unwrap().is_on);
        assert!(state.schedules.get(2).unwrap().is_on);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_length_window_never_fires() {
        let sched = scheduler_for(model_with_circuit_and(vec![schedule(
            1,
            6,
            9 * 60,
            9 * 60,
            0x7F,
        )]));
        sched.evaluate(tuesday_0900()).await;

        let state = sched.ctx.changes.state_snapshot();
        assert!(!state.circuits.get(6).map(|c| c.is_on).unwrap_or(false));
        assert!(!state.schedules.get(1).unwrap().is_on);
    }

    #[tokio::test(start_paused = true)]
    async fn day_mask_gates_execution() {
        // Monday-only schedule does not fire on a Tuesday
        let sched = scheduler_for(model_with_circuit_and(vec![schedule(
            1,
            6,
            8 * 60,
            17 * 60,
            0x01,
        )]));
        sched.evaluate(tuesday_0900()).await;
        let state = sched.ctx.changes.state_snapshot();
        assert!(!state.circuits.get(6).map(|c| c.is_on).unwrap_or(false));
    }

    #[tokio::test(start_paused = true)]
    async fn wrapping_window_spans_midnight() {
        let mut s = schedule(1, 6, 22 * 60, 2 * 60, 0x7F);
        s.wraps_midnight = true;
        let sched = scheduler_for(model_with_circuit_and(vec![s]));

        // 23:30 UTC on Tuesday is inside 22:00..02:00
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 23, 30, 0).unwrap();
        sched.evaluate(now).await;
        let state = sched.ctx.changes.state_snapshot();
        assert!(state.circuits.get(6).unwrap().is_on);
    }

    #[tokio::test(start_paused = true)]
    async fn egg_timer_expiry_turns_off_standalone_circuit() {
        let mut model = model_with_circuit_and(vec![]);
        model.config.circuits.get_mut(6).unwrap().egg_timer = 60;
        let sched = scheduler_for(model);

        let now = tuesday_0900();
        sched
            .ctx
            .changes
            .commit(|txn| {
                txn.patch_circuit_state(6, |c| {
                    c.is_on = true;
                    c.end_time = Some(now - chrono::Duration::minutes(1));
                })
            })
            .unwrap();

        sched.evaluate(now).await;
        let state = sched.ctx.changes.state_snapshot();
        assert!(!state.circuits.get(6).unwrap().is_on);
    }

    #[test]
    fn solar_position_is_sane_at_mid_latitudes() {
        let calc = SolarPosition;
        let date = NaiveDate::from_ymd_opt(2025, 6, 21).unwrap();
        let (sunrise, sunset) = calc
            .sun_times(date, 33.66, -117.99, &chrono_tz::UTC)
            .unwrap();
        // Expressed in UTC minutes; the window must be a long summer day
        assert!(sunset > sunrise || sunset < 300);
        let daylight = if sunset >= sunrise {
            sunset - sunrise
        } else {
            1440 - sunrise + sunset
        };
        assert!(daylight > 13 * 60, "daylight {} too short", daylight);
        assert!(daylight < 15 * 60, "daylight {} too long", daylight);
    }

    #[test]
    fn solar_position_none_in_polar_night() {
        let calc = SolarPosition;
        let date = NaiveDate::from_ymd_opt(2025, 12, 21).unwrap();
        assert!(calc.sun_times(date, 78.0, 15.0, &chrono_tz::UTC).is_none());
    }
}
