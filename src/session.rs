use crate::capacity::{self, CapacityIntegrator};
use crate::chemistry::ChemistryProfile;
use crate::health::HealthEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestStatus {
    Idle,
    Testing,
    Complete,
    Aborted,
}

impl TestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TestStatus::Complete | TestStatus::Aborted)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TestStatus::Idle => write!(f, "Idle"),
            TestStatus::Testing => write!(f, "Testing"),
            TestStatus::Complete => write!(f, "Complete"),
            TestStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TestResult {
    Pending,
    Pass,
    Fail,
    /// Set manually without a pass/fail judgement.
    Override,
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TestResult::Pending => write!(f, "Pending"),
            TestResult::Pass => write!(f, "PASS"),
            TestResult::Fail => write!(f, "FAIL"),
            TestResult::Override => write!(f, "Override"),
        }
    }
}

/// One recorded reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSample {
    /// Seconds since test start.
    pub timestamp: f64,
    pub voltages: Vec<f64>,
    /// negative=discharging, positive=charging
    pub current_ma: f64,
}

/// Everything known about one physical test run.
///
/// Only the engine mutates a session; everyone else works on clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSession {
    pub serial_number: String,
    pub chemistry: Arc<ChemistryProfile>,
    pub rated_capacity_ah: f64,
    pub pass_threshold_pct: f64,

    pub tech_initials: String,
    pub mfg_date: String,
    pub battery_age: String,

    pub status: TestStatus,
    pub result: TestResult,
    pub override_reason: String,
    pub stop_reason: String,
    /// Engine clock readings, in seconds.
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,

    pub samples: Vec<CellSample>,
    pub capacity: CapacityIntegrator,

    // reported by the BMS, never used for the verdict
    pub bms_initial_soc: Option<u8>,
    pub bms_cycle_count: u16,
    pub bms_temperatures: Vec<f64>,

    pub health_events: Vec<HealthEvent>,
}

impl TestSession {
    pub fn new(
        serial_number: String,
        chemistry: Arc<ChemistryProfile>,
        rated_capacity_ah: f64,
        pass_threshold_pct: f64,
    ) -> Self {
        Self {
            serial_number,
            chemistry,
            rated_capacity_ah,
            pass_threshold_pct,
            tech_initials: String::new(),
            mfg_date: String::new(),
            battery_age: String::new(),
            status: TestStatus::Idle,
            result: TestResult::Pending,
            override_reason: String::new(),
            stop_reason: String::new(),
            start_time: None,
            end_time: None,
            samples: Vec::new(),
            capacity: CapacityIntegrator::new(),
            bms_initial_soc: None,
            bms_cycle_count: 0,
            bms_temperatures: Vec::new(),
            health_events: Vec::new(),
        }
    }

    pub fn calculated_capacity_ah(&self) -> f64 {
        self.capacity.calculated_capacity_ah
    }

    pub fn capacity_percent(&self) -> f64 {
        capacity::capacity_percent(self.capacity.calculated_capacity_ah, self.rated_capacity_ah)
    }

    pub fn storage_voltage(&self) -> f64 {
        self.chemistry.storage_voltage
    }

    pub fn discharge_end_voltage(&self) -> f64 {
        self.chemistry.discharge_end_voltage
    }

    /// Seconds between start and end, or `now` while the test is running.
    pub fn runtime_seconds(&self, now: f64) -> f64 {
        match self.start_time {
            None => 0.0,
            Some(start) => (self.end_time.unwrap_or(now) - start).max(0.0),
        }
    }

    pub fn runtime_str(&self, now: f64) -> String {
        format_runtime(self.runtime_seconds(now))
    }

    pub fn cell_count(&self) -> usize {
        self.samples.first().map_or(0, |s| s.voltages.len())
    }

    pub fn time_data(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.timestamp).collect()
    }

    /// Voltage series per cell, `cell_data()[cell][sample]`.
    pub fn cell_data(&self) -> Vec<Vec<f64>> {
        (0..self.cell_count())
            .map(|cell| self.samples.iter().map(|s| s.voltages[cell]).collect())
            .collect()
    }

    pub fn current_data(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.current_ma).collect()
    }

    pub fn latest_voltages(&self) -> &[f64] {
        self.samples
            .last()
            .map(|s| s.voltages.as_slice())
            .unwrap_or_default()
    }

    pub fn latest_current_ma(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.current_ma)
    }
}

/// `"1h 02m 03s"`, or `"2m 05s"` below one hour.
pub fn format_runtime(seconds: f64) -> String {
    let s = seconds.max(0.0) as u64;
    let (h, rem) = (s / 3600, s % 3600);
    let (m, sec) = (rem / 60, rem % 60);
    if h > 0 {
        format!("{h}h {m:02}m {sec:02}s")
    } else {
        format!("{m}m {sec:02}s")
    }
}
