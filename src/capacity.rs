use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Discharged amp-hours by trapezoidal integration of the pack current.
///
/// Only intervals that end on a discharging sample (negative current) count,
/// so a discharge-to-idle transition contributes nothing for that interval.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityIntegrator {
    pub calculated_capacity_ah: f64,
    pub last_current_ma: f64,
    /// Seconds since test start of the previous reading.
    pub last_sample_time: Option<f64>,
}

impl CapacityIntegrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one reading and returns the amp-hours it added.
    pub fn update(&mut self, current_ma: f64, timestamp: f64) -> f64 {
        let mut added = 0.0;
        if let Some(previous) = self.last_sample_time {
            let delta_hours = (timestamp - previous).max(0.0) / SECONDS_PER_HOUR;
            let avg_current_a = (self.last_current_ma.abs() + current_ma.abs()) / 2.0 / 1000.0;
            if current_ma < 0.0 {
                added = avg_current_a * delta_hours;
                self.calculated_capacity_ah += added;
            }
        }
        self.last_sample_time = Some(timestamp);
        self.last_current_ma = current_ma;
        added
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// `100 * measured / rated`, zero when the rated capacity is not positive.
pub fn capacity_percent(calculated_capacity_ah: f64, rated_capacity_ah: f64) -> f64 {
    if rated_capacity_ah <= 0.0 {
        return 0.0;
    }
    calculated_capacity_ah / rated_capacity_ah * 100.0
}

/// Moving average over the last `window` raw samples, per cell and for the current.
#[derive(Debug, Clone)]
pub struct SampleSmoother {
    window: usize,
    voltages: VecDeque<Vec<f64>>,
    currents: VecDeque<f64>,
}

impl SampleSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            voltages: VecDeque::with_capacity(window),
            currents: VecDeque::with_capacity(window),
        }
    }

    /// Adds a raw sample and returns the smoothed voltages and current.
    pub fn push(&mut self, voltages: &[f64], current_ma: f64) -> (Vec<f64>, f64) {
        if self.window == 1 {
            return (voltages.to_vec(), current_ma);
        }
        if self
            .voltages
            .front()
            .is_some_and(|sample| sample.len() != voltages.len())
        {
            self.reset();
        }

        self.voltages.push_back(voltages.to_vec());
        self.currents.push_back(current_ma);
        if self.voltages.len() > self.window {
            self.voltages.pop_front();
            self.currents.pop_front();
        }

        let n = self.voltages.len() as f64;
        let avg_voltages = (0..voltages.len())
            .map(|cell| self.voltages.iter().map(|sample| sample[cell]).sum::<f64>() / n)
            .collect();
        let avg_current = self.currents.iter().sum::<f64>() / n;
        (avg_voltages, avg_current)
    }

    pub fn reset(&mut self) {
        self.voltages.clear();
        self.currents.clear();
    }

    pub fn len(&self) -> usize {
        self.voltages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltages.is_empty()
    }
}
