//! Test session lifecycle: `Idle -> Testing -> Complete | Aborted`.
//!
//! The engine is the only owner of the live [`TestSession`]. Every operation
//! is synchronous and never fails; calls that do not fit the current state
//! are ignored, so a poller and a UI racing each other cannot corrupt a run.
//!
//! # Example
//!
//! ```
//! use bmstest_lib::{Chemistry, SessionParams, TestConfig, TestEngine, TestResult};
//!
//! let mut engine = TestEngine::new(TestConfig::default());
//! engine.new_session(SessionParams::new("B14S-0042", Chemistry::Nmc));
//! assert!(engine.run_pre_check(&[3.95; 14]).passed());
//!
//! engine.start_test();
//! engine.record_voltage_sample(&[3.95; 14], -20_000.0);
//! engine.stop_test("User Stopped Manually");
//! assert_eq!(engine.session().unwrap().result, TestResult::Fail);
//! ```

use crate::capacity::SampleSmoother;
use crate::chemistry::{Chemistry, ChemistryProfile};
use crate::config::TestConfig;
use crate::health::{self, HealthStatus};
use crate::precheck::{self, PreCheckResult};
use crate::protocol::BasicInfo;
use crate::session::{CellSample, TestResult, TestSession, TestStatus};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

pub const PROTECTION_STOP_REASON: &str = "Auto-Stopped (BMS Protection)";

/// Monotonic time source, in seconds from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Identity and targets of a new session. Unset values come from the
/// chemistry profile and the engine configuration.
#[derive(Debug, Clone)]
pub struct SessionParams {
    serial_number: String,
    chemistry: Chemistry,
    rated_capacity_ah: Option<f64>,
    pass_threshold_pct: Option<f64>,
    tech_initials: String,
    mfg_date: String,
    battery_age: String,
}

impl SessionParams {
    pub fn new(serial_number: impl Into<String>, chemistry: Chemistry) -> Self {
        Self {
            serial_number: serial_number.into(),
            chemistry,
            rated_capacity_ah: None,
            pass_threshold_pct: None,
            tech_initials: String::new(),
            mfg_date: String::new(),
            battery_age: String::new(),
        }
    }

    pub fn rated_capacity_ah(mut self, rated_capacity_ah: f64) -> Self {
        self.rated_capacity_ah = Some(rated_capacity_ah);
        self
    }

    pub fn pass_threshold_pct(mut self, pass_threshold_pct: f64) -> Self {
        self.pass_threshold_pct = Some(pass_threshold_pct);
        self
    }

    pub fn tech_initials(mut self, tech_initials: impl Into<String>) -> Self {
        self.tech_initials = tech_initials.into();
        self
    }

    pub fn mfg_date(mut self, mfg_date: impl Into<String>) -> Self {
        self.mfg_date = mfg_date.into();
        self
    }

    pub fn battery_age(mut self, battery_age: impl Into<String>) -> Self {
        self.battery_age = battery_age.into();
        self
    }
}

pub struct TestEngine<C: Clock = MonotonicClock> {
    config: TestConfig,
    clock: C,
    session: Option<TestSession>,
    smoother: SampleSmoother,
}

impl TestEngine<MonotonicClock> {
    pub fn new(config: TestConfig) -> Self {
        Self::with_clock(config, MonotonicClock::new())
    }
}

impl<C: Clock> TestEngine<C> {
    pub fn with_clock(config: TestConfig, clock: C) -> Self {
        let smoother = SampleSmoother::new(config.smoothing_window);
        Self {
            config,
            clock,
            session: None,
            smoother,
        }
    }

    pub fn config(&self) -> &TestConfig {
        &self.config
    }

    pub fn session(&self) -> Option<&TestSession> {
        self.session.as_ref()
    }

    /// Copy of the live session for display or export.
    pub fn snapshot(&self) -> Option<TestSession> {
        self.session.clone()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Profile of the live session, or of the configured default chemistry.
    pub fn active_profile(&self) -> Arc<ChemistryProfile> {
        self.session
            .as_ref()
            .map(|s| Arc::clone(&s.chemistry))
            .unwrap_or_else(|| self.config.default_profile())
    }

    /// Replaces any existing session with a fresh one in `Idle`.
    pub fn new_session(&mut self, params: SessionParams) -> &TestSession {
        let profile = self.config.profile(params.chemistry);
        let rated = params
            .rated_capacity_ah
            .unwrap_or(profile.rated_capacity_ah);
        let threshold = params
            .pass_threshold_pct
            .unwrap_or(self.config.default_pass_threshold_pct);
        if let Some(old) = &self.session {
            log::debug!(
                "Discarding session {} in state {}",
                old.serial_number,
                old.status
            );
        }
        log::info!(
            "New session {} ({}, rated {:.1}Ah, pass at {:.0}%)",
            params.serial_number,
            profile.chemistry,
            rated,
            threshold
        );

        let mut session = TestSession::new(params.serial_number, profile, rated, threshold);
        session.tech_initials = params.tech_initials;
        session.mfg_date = params.mfg_date;
        session.battery_age = params.battery_age;
        self.smoother.reset();
        self.session.insert(session)
    }

    pub fn start_test(&mut self) {
        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            log::debug!("start_test ignored: no session");
            return;
        };
        if session.status != TestStatus::Idle {
            log::debug!("start_test ignored in state {}", session.status);
            return;
        }
        session.status = TestStatus::Testing;
        session.start_time = Some(now);
        session.result = TestResult::Pending;
        self.smoother.reset();
        log::info!("Test started for {}", session.serial_number);
    }

    pub fn run_pre_check(&self, voltages: &[f64]) -> PreCheckResult {
        precheck::run_pre_check(voltages, &self.active_profile(), &self.config)
    }

    /// Records one reading while testing; integrates capacity and logs health events.
    pub fn record_voltage_sample(&mut self, voltages: &[f64], current_ma: f64) {
        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.status != TestStatus::Testing {
            return;
        }
        if voltages.is_empty() {
            log::warn!("Ignoring empty voltage sample");
            return;
        }
        let expected = session.cell_count();
        if expected != 0 && voltages.len() != expected {
            log::warn!(
                "Ignoring sample with {} cells, session has {}",
                voltages.len(),
                expected
            );
            return;
        }

        let timestamp = now - session.start_time.unwrap_or(now);
        let previous = session.samples.last().map(|s| s.timestamp);
        if timestamp < 0.0 || previous.is_some_and(|last| timestamp <= last) {
            log::warn!(
                "Ignoring sample at {timestamp:.3}s, previous sample at {:.3}s",
                previous.unwrap_or(0.0)
            );
            return;
        }

        let (voltages, current_ma) = self.smoother.push(voltages, current_ma);

        session.capacity.update(current_ma, timestamp);
        let events = health::check_sample(&voltages, timestamp, &session.chemistry, &self.config);
        for event in &events {
            log::warn!("{} at {:.1}s: {}", event.kind, event.time, event.message);
        }
        session.health_events.extend(events);
        session.samples.push(CellSample {
            timestamp,
            voltages,
            current_ma,
        });
        log::trace!(
            "Sample #{} t={:.1}s I={:.0}mA capacity={:.4}Ah",
            session.samples.len(),
            timestamp,
            current_ma,
            session.capacity.calculated_capacity_ah
        );
    }

    /// Stores the reference values reported by the BMS and stops the test on
    /// cell undervoltage protection.
    pub fn update_bms_info(&mut self, info: &BasicInfo) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.bms_initial_soc.is_none() {
            session.bms_initial_soc = Some(info.rsoc_percent);
        }
        session.bms_cycle_count = info.cycle_count;
        session.bms_temperatures = info.temperatures_c.clone();

        if session.status == TestStatus::Testing
            && self.config.auto_stop_on_protection
            && info.cell_undervoltage()
        {
            log::warn!("BMS reports cell undervoltage protection, stopping test");
            self.stop_test(PROTECTION_STOP_REASON);
        }
    }

    /// Completes a running test and decides pass/fail unless already decided.
    pub fn stop_test(&mut self, reason: &str) {
        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.status != TestStatus::Testing {
            log::debug!("stop_test ignored in state {}", session.status);
            return;
        }
        session.status = TestStatus::Complete;
        session.end_time = Some(now);
        session.stop_reason = reason.to_string();

        if session.result == TestResult::Pending {
            session.result = if session.capacity_percent() >= session.pass_threshold_pct {
                TestResult::Pass
            } else {
                TestResult::Fail
            };
        }
        log::info!(
            "Test complete ({}): {:.4}Ah = {:.1}% of rated, result {}",
            reason,
            session.calculated_capacity_ah(),
            session.capacity_percent(),
            session.result
        );
    }

    /// Ends a running test without a verdict.
    pub fn abort_test(&mut self, reason: &str) {
        let now = self.clock.now();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.status != TestStatus::Testing {
            log::debug!("abort_test ignored in state {}", session.status);
            return;
        }
        session.status = TestStatus::Aborted;
        session.end_time = Some(now);
        session.stop_reason = reason.to_string();
        log::warn!("Test aborted: {reason}");
    }

    /// Manual verdict; allowed in any state and leaves the recorded data alone.
    pub fn override_result(&mut self, new_result: TestResult, reason: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        log::info!(
            "Result overridden from {} to {}: {}",
            session.result,
            new_result,
            reason
        );
        session.result = new_result;
        session.override_reason = reason.to_string();
    }

    pub fn get_current_health_status(&self, voltages: &[f64]) -> HealthStatus {
        health::current_health_status(voltages, &self.active_profile(), &self.config)
    }

    pub fn runtime_seconds(&self) -> f64 {
        self.session
            .as_ref()
            .map_or(0.0, |s| s.runtime_seconds(self.clock.now()))
    }
}

/// Engine behind a single-writer, many-reader lock.
///
/// Readers only ever get copies; a panicked writer does not lock them out.
pub struct SharedEngine<C: Clock = MonotonicClock> {
    inner: Arc<RwLock<TestEngine<C>>>,
}

impl<C: Clock> Clone for SharedEngine<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> SharedEngine<C> {
    pub fn new(engine: TestEngine<C>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(engine)),
        }
    }

    /// Runs `f` with exclusive access to the engine.
    pub fn write<R>(&self, f: impl FnOnce(&mut TestEngine<C>) -> R) -> R {
        let mut engine = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut engine)
    }

    /// Runs `f` with shared access to the engine.
    pub fn read<R>(&self, f: impl FnOnce(&TestEngine<C>) -> R) -> R {
        let engine = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&engine)
    }

    pub fn snapshot(&self) -> Option<TestSession> {
        self.read(|engine| engine.snapshot())
    }

    /// Status of the live session, read without copying it.
    pub fn status(&self) -> Option<TestStatus> {
        self.read(|engine| engine.session().map(|session| session.status))
    }

    pub fn health_status(&self, voltages: &[f64]) -> HealthStatus {
        self.read(|engine| engine.get_current_health_status(voltages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{HealthEventKind, OverallHealth};
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct ManualClock(Arc<Mutex<f64>>);

    impl ManualClock {
        fn set(&self, seconds: f64) {
            *self.0.lock().unwrap() = seconds;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> f64 {
            *self.0.lock().unwrap()
        }
    }

    fn engine() -> (TestEngine<ManualClock>, ManualClock) {
        let clock = ManualClock::default();
        (
            TestEngine::with_clock(TestConfig::default(), clock.clone()),
            clock,
        )
    }

    fn started(rated: f64, threshold: f64) -> (TestEngine<ManualClock>, ManualClock) {
        let (mut engine, clock) = engine();
        clock.set(100.0);
        engine.new_session(
            SessionParams::new("B14S-0001", Chemistry::Nmc)
                .rated_capacity_ah(rated)
                .pass_threshold_pct(threshold),
        );
        engine.start_test();
        (engine, clock)
    }

    #[test]
    fn new_session_starts_idle_with_profile_defaults() {
        let (mut engine, _) = engine();
        let session = engine.new_session(
            SessionParams::new("B14S-0001", Chemistry::LiPo)
                .tech_initials("JD")
                .mfg_date("2024-03")
                .battery_age("2y 7m"),
        );
        assert_eq!(session.status, TestStatus::Idle);
        assert_eq!(session.result, TestResult::Pending);
        assert_eq!(session.rated_capacity_ah, 46.0);
        assert_eq!(session.pass_threshold_pct, 95.0);
        assert_eq!(session.tech_initials, "JD");
        assert_eq!(session.battery_age, "2y 7m");
    }

    #[test]
    fn new_session_replaces_previous() {
        let (mut engine, _) = started(1.0, 50.0);
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        engine.new_session(SessionParams::new("B14S-0002", Chemistry::Nmc));
        let session = engine.session().unwrap();
        assert_eq!(session.serial_number, "B14S-0002");
        assert!(session.samples.is_empty());
        assert_eq!(session.status, TestStatus::Idle);
    }

    #[test]
    fn operations_without_session_are_noops() {
        let (mut engine, _) = engine();
        engine.start_test();
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        engine.stop_test("Completed");
        engine.abort_test("Error");
        engine.override_result(TestResult::Pass, "because");
        assert!(engine.session().is_none());
        // pre-check and health still work against the default chemistry
        assert!(engine.run_pre_check(&[3.9; 14]).passed());
        assert_eq!(
            engine.get_current_health_status(&[3.9; 14]).overall,
            OverallHealth::Normal
        );
    }

    #[test]
    fn samples_before_start_are_ignored() {
        let (mut engine, _) = engine();
        engine.new_session(SessionParams::new("B14S-0001", Chemistry::Nmc));
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        assert!(engine.session().unwrap().samples.is_empty());
    }

    #[test]
    fn half_amp_hour_from_idle_to_discharge() {
        let (mut engine, clock) = started(62.0, 95.0);
        engine.record_voltage_sample(&[3.9; 14], 0.0);
        clock.set(3700.0);
        engine.record_voltage_sample(&[3.8; 14], -1000.0);

        let session = engine.session().unwrap();
        assert_eq!(session.time_data(), vec![0.0, 3600.0]);
        assert!((session.calculated_capacity_ah() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn pass_threshold_is_inclusive() {
        let (mut engine, clock) = started(1.0, 50.0);
        engine.record_voltage_sample(&[3.9; 14], 0.0);
        clock.set(3700.0);
        engine.record_voltage_sample(&[3.8; 14], -1000.0);
        engine.stop_test("User Stopped Manually");

        let session = engine.session().unwrap();
        assert_eq!(session.capacity_percent(), 50.0);
        assert_eq!(session.result, TestResult::Pass);
        assert_eq!(session.status, TestStatus::Complete);
        assert_eq!(session.end_time, Some(3700.0));
        assert_eq!(session.stop_reason, "User Stopped Manually");
    }

    #[test]
    fn below_threshold_fails() {
        let (mut engine, clock) = started(1.0, 50.1);
        engine.record_voltage_sample(&[3.9; 14], 0.0);
        clock.set(3700.0);
        engine.record_voltage_sample(&[3.8; 14], -1000.0);
        engine.stop_test("Completed");
        assert_eq!(engine.session().unwrap().result, TestResult::Fail);
    }

    #[test]
    fn override_before_stop_is_kept() {
        let (mut engine, _) = started(1.0, 50.0);
        engine.override_result(TestResult::Pass, "Known good reference pack");
        engine.stop_test("Completed");
        let session = engine.session().unwrap();
        assert_eq!(session.result, TestResult::Pass);
        assert_eq!(session.override_reason, "Known good reference pack");
    }

    #[test]
    fn override_after_stop_keeps_data() {
        let (mut engine, clock) = started(62.0, 95.0);
        engine.record_voltage_sample(&[3.9; 14], -10_000.0);
        clock.set(1900.0);
        engine.record_voltage_sample(&[3.8; 14], -10_000.0);
        engine.stop_test("Completed");
        let before = engine.snapshot().unwrap();
        assert_eq!(before.result, TestResult::Fail);

        engine.override_result(TestResult::Override, "Cell 3 replaced after test");
        let after = engine.session().unwrap();
        assert_eq!(after.result, TestResult::Override);
        assert_eq!(after.status, TestStatus::Complete);
        assert_eq!(after.samples, before.samples);
        assert_eq!(after.calculated_capacity_ah(), before.calculated_capacity_ah());
    }

    #[test]
    fn abort_leaves_result_pending() {
        let (mut engine, clock) = started(62.0, 95.0);
        engine.record_voltage_sample(&[3.9; 14], -10_000.0);
        clock.set(200.0);
        engine.abort_test("Connection Lost: timeout");
        let session = engine.session().unwrap();
        assert_eq!(session.status, TestStatus::Aborted);
        assert_eq!(session.result, TestResult::Pending);
        assert_eq!(session.end_time, Some(200.0));
        assert_eq!(session.stop_reason, "Connection Lost: timeout");
    }

    #[test]
    fn terminal_states_are_final() {
        let (mut engine, clock) = started(62.0, 95.0);
        engine.abort_test("Application Closed by User");
        clock.set(500.0);
        engine.stop_test("Completed");
        engine.start_test();
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        let session = engine.session().unwrap();
        assert_eq!(session.status, TestStatus::Aborted);
        assert_eq!(session.stop_reason, "Application Closed by User");
        assert_eq!(session.end_time, Some(100.0));
        assert!(session.samples.is_empty());
    }

    #[test]
    fn imbalance_is_logged_for_every_sample() {
        let (mut engine, clock) = started(62.0, 95.0);
        let mut voltages = vec![4.0; 14];
        voltages[13] = 3.4;
        for t in 0..3 {
            clock.set(100.0 + f64::from(t));
            engine.record_voltage_sample(&voltages, -5000.0);
        }
        let events = &engine.session().unwrap().health_events;
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| e.kind == HealthEventKind::Imbalance && e.cell == 14));
        assert_eq!(
            events.iter().map(|e| e.time).collect::<Vec<_>>(),
            vec![0.0, 1.0, 2.0]
        );
    }

    #[test]
    fn stalled_or_backward_clock_drops_sample() {
        let (mut engine, clock) = started(62.0, 95.0);
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        clock.set(95.0);
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        clock.set(101.0);
        engine.record_voltage_sample(&[3.9; 14], -1000.0);

        let session = engine.session().unwrap();
        assert_eq!(session.time_data(), vec![0.0, 1.0]);
        assert_eq!(session.capacity.last_sample_time, Some(1.0));
    }

    #[test]
    fn override_before_start_is_reset() {
        let (mut engine, _) = engine();
        engine.new_session(SessionParams::new("B14S-0001", Chemistry::Nmc));
        engine.override_result(TestResult::Pass, "Reference pack");
        engine.start_test();
        let session = engine.session().unwrap();
        assert_eq!(session.status, TestStatus::Testing);
        assert_eq!(session.result, TestResult::Pending);
        assert_eq!(session.override_reason, "Reference pack");
    }

    #[test]
    fn shared_status_follows_the_lifecycle() {
        let (engine, _) = engine();
        let shared = SharedEngine::new(engine);
        assert_eq!(shared.status(), None);
        shared.write(|e| {
            e.new_session(SessionParams::new("B14S-0003", Chemistry::Nmc));
        });
        assert_eq!(shared.status(), Some(TestStatus::Idle));
        shared.write(|e| e.start_test());
        assert_eq!(shared.status(), Some(TestStatus::Testing));
        shared.write(|e| e.abort_test("Connection Lost"));
        assert_eq!(shared.status(), Some(TestStatus::Aborted));
        assert!(shared.status().unwrap().is_terminal());
    }

    #[test]
    fn sample_with_other_cell_count_is_dropped() {
        let (mut engine, _) = started(62.0, 95.0);
        engine.record_voltage_sample(&[3.9; 14], -1000.0);
        engine.record_voltage_sample(&[3.9; 13], -1000.0);
        engine.record_voltage_sample(&[], -1000.0);
        assert_eq!(engine.session().unwrap().samples.len(), 1);
    }

    #[test]
    fn smoothing_averages_recorded_samples() {
        let clock = ManualClock::default();
        let config = TestConfig {
            smoothing_window: 2,
            ..TestConfig::default()
        };
        let mut engine = TestEngine::with_clock(config, clock.clone());
        engine.new_session(SessionParams::new("B14S-0001", Chemistry::Nmc));
        engine.start_test();
        engine.record_voltage_sample(&[4.0; 14], -1000.0);
        clock.set(1.0);
        engine.record_voltage_sample(&[3.8; 14], -3000.0);
        let session = engine.session().unwrap();
        assert!((session.samples[1].voltages[0] - 3.9).abs() < 1e-12);
        assert_eq!(session.samples[1].current_ma, -2000.0);
    }

    fn info(rsoc: u8, protection: u16) -> BasicInfo {
        BasicInfo {
            total_voltage_mv: 54_000,
            current_ma: -20_000,
            residual_capacity_mah: 30_000,
            nominal_capacity_mah: 62_000,
            cycle_count: 42,
            protection_status: protection,
            software_version: 0x10,
            rsoc_percent: rsoc,
            fet_status: 0x03,
            cell_count: 14,
            ntc_count: 2,
            temperatures_c: vec![24.5, 25.1],
        }
    }

    #[test]
    fn bms_info_is_reference_only() {
        let (mut engine, _) = started(62.0, 95.0);
        engine.update_bms_info(&info(88, 0));
        engine.update_bms_info(&info(80, 0));
        let session = engine.session().unwrap();
        assert_eq!(session.bms_initial_soc, Some(88));
        assert_eq!(session.bms_cycle_count, 42);
        assert_eq!(session.bms_temperatures, vec![24.5, 25.1]);
        assert_eq!(session.status, TestStatus::Testing);
        assert_eq!(session.result, TestResult::Pending);
    }

    #[test]
    fn undervoltage_protection_stops_the_test() {
        let (mut engine, _) = started(62.0, 95.0);
        engine.update_bms_info(&info(3, 0x0002));
        let session = engine.session().unwrap();
        assert_eq!(session.status, TestStatus::Complete);
        assert_eq!(session.stop_reason, PROTECTION_STOP_REASON);
        assert_eq!(session.result, TestResult::Fail);
    }

    #[test]
    fn protection_is_ignored_when_disabled_or_idle() {
        let clock = ManualClock::default();
        let config = TestConfig {
            auto_stop_on_protection: false,
            ..TestConfig::default()
        };
        let mut engine = TestEngine::with_clock(config, clock);
        engine.new_session(SessionParams::new("B14S-0001", Chemistry::Nmc));
        engine.update_bms_info(&info(3, 0x0002));
        assert_eq!(engine.session().unwrap().status, TestStatus::Idle);
        engine.start_test();
        engine.update_bms_info(&info(3, 0x0002));
        assert_eq!(engine.session().unwrap().status, TestStatus::Testing);
    }

    #[test]
    fn shared_engine_readers_see_snapshots() {
        let (engine, clock) = started(62.0, 95.0);
        let shared = SharedEngine::new(engine);

        let writer = {
            let shared = shared.clone();
            let clock = clock.clone();
            std::thread::spawn(move || {
                for t in 1..=50 {
                    clock.set(100.0 + f64::from(t));
                    shared.write(|e| e.record_voltage_sample(&[3.9; 14], -10_000.0));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..50 {
                        let snapshot = shared.snapshot().unwrap();
                        assert!(snapshot.samples.len() >= last);
                        last = snapshot.samples.len();
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(shared.snapshot().unwrap().samples.len(), 50);
        assert_eq!(
            shared.health_status(&[3.9; 14]).overall,
            OverallHealth::Normal
        );
    }
}
