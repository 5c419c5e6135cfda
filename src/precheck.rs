//! Gate in front of the discharge: the pack must be complete, charged and balanced.

use crate::chemistry::ChemistryProfile;
use crate::config::TestConfig;
use serde::{Deserialize, Serialize};

/// Outcome of one pre-test check. Built fresh on every evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreCheckResult {
    pub all_cells_found: bool,
    pub cells_charged: bool,
    pub cells_balanced: bool,
    pub cell_count: usize,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub spread: f64,
    /// 1-based positions of cells below the dead-cell voltage.
    pub dead_cells: Vec<usize>,
    pub messages: Vec<String>,
}

impl PreCheckResult {
    pub fn passed(&self) -> bool {
        self.all_cells_found && self.cells_charged && self.cells_balanced
    }
}

pub fn run_pre_check(
    voltages: &[f64],
    profile: &ChemistryProfile,
    config: &TestConfig,
) -> PreCheckResult {
    let mut result = PreCheckResult::default();

    if voltages.is_empty() {
        result
            .messages
            .push("No voltage data received from BMS".to_string());
        return result;
    }

    let live: Vec<f64> = voltages
        .iter()
        .copied()
        .filter(|v| *v >= config.dead_cell_voltage)
        .collect();
    result.dead_cells = voltages
        .iter()
        .enumerate()
        .filter(|(_, v)| **v < config.dead_cell_voltage)
        .map(|(i, _)| i + 1)
        .collect();

    // Dead cells in a complete pack are only a warning, the test may proceed.
    result.cell_count = voltages.len();
    result.all_cells_found = voltages.len() == config.expected_cell_count;
    if !result.all_cells_found {
        result.messages.push(format!(
            "Expected {} cells total, got {}",
            config.expected_cell_count,
            voltages.len()
        ));
    } else if !result.dead_cells.is_empty() {
        result.messages.push(format!(
            "Warning: {} dead cell(s) at position(s) {:?}, test allowed",
            result.dead_cells.len(),
            result.dead_cells
        ));
    } else {
        result
            .messages
            .push(format!("All {} cells detected", config.expected_cell_count));
    }

    if live.is_empty() {
        result.messages.push(format!(
            "No live cells (all below {:.2}V), cannot judge charge or balance",
            config.dead_cell_voltage
        ));
        return result;
    }

    let min_v = live.iter().copied().fold(f64::INFINITY, f64::min);
    let max_v = live.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    result.min_voltage = min_v;
    result.max_voltage = max_v;

    let min_start = profile.min_start_voltage;
    result.cells_charged = min_v >= min_start;
    if result.cells_charged {
        result.messages.push(format!(
            "Live cells charged (min: {min_v:.3}V >= {min_start:.2}V)"
        ));
    } else {
        result.messages.push(format!(
            "Live cell(s) below start threshold (min: {min_v:.3}V < {min_start:.2}V)"
        ));
    }

    let spread = max_v - min_v;
    result.spread = spread;
    result.cells_balanced = spread <= config.imbalance_warning_v;
    if result.cells_balanced {
        result
            .messages
            .push(format!("Live cells balanced (spread: {spread:.3}V)"));
    } else {
        result.messages.push(format!(
            "Live cells unbalanced (spread: {spread:.3}V > {:.2}V)",
            config.imbalance_warning_v
        ));
    }

    log::debug!(
        "Pre-check: cells={} min={:.3} max={:.3} spread={:.3} passed={}",
        result.cell_count,
        min_v,
        max_v,
        spread,
        result.passed()
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::Chemistry;

    fn nmc() -> ChemistryProfile {
        ChemistryProfile::builtin(Chemistry::Nmc)
    }

    #[test]
    fn charged_balanced_pack_passes() {
        let config = TestConfig::default();
        let result = run_pre_check(&[3.9; 14], &nmc(), &config);
        assert!(result.passed());
        assert_eq!(result.cell_count, 14);
        assert_eq!(result.spread, 0.0);
    }

    #[test]
    fn min_start_voltage_is_inclusive() {
        let config = TestConfig::default();
        let profile = nmc();
        let at_limit = vec![profile.min_start_voltage; 14];
        assert!(run_pre_check(&at_limit, &profile, &config).cells_charged);

        let mut below = at_limit.clone();
        below[5] = profile.min_start_voltage - 0.001;
        let result = run_pre_check(&below, &profile, &config);
        assert!(!result.cells_charged);
        assert!(!result.passed());
    }

    #[test]
    fn missing_cells_fail_the_count() {
        let config = TestConfig::default();
        let result = run_pre_check(&[3.9; 13], &nmc(), &config);
        assert!(!result.all_cells_found);
        assert!(result.cells_charged && result.cells_balanced);
        assert!(!result.passed());
    }

    #[test]
    fn dead_cells_in_complete_pack_only_warn() {
        let config = TestConfig::default();
        let mut voltages = vec![3.9; 14];
        voltages[2] = 0.4;
        voltages[9] = 1.2;
        let result = run_pre_check(&voltages, &nmc(), &config);
        assert!(result.all_cells_found);
        assert_eq!(result.dead_cells, vec![3, 10]);
        // dead cells are not part of min/max
        assert_eq!(result.min_voltage, 3.9);
        assert!(result.passed());
        assert!(result.messages[0].contains("dead cell"));
    }

    #[test]
    fn spread_above_warning_is_unbalanced() {
        let config = TestConfig::default();
        let mut voltages = vec![4.0; 14];
        voltages[0] = 3.65;
        let result = run_pre_check(&voltages, &nmc(), &config);
        assert!(result.cells_charged);
        assert!(!result.cells_balanced);
        assert!((result.spread - 0.35).abs() < 1e-9);
    }

    #[test]
    fn no_live_cells() {
        let config = TestConfig::default();
        let result = run_pre_check(&[0.0; 14], &nmc(), &config);
        assert!(result.all_cells_found);
        assert!(!result.cells_charged);
        assert!(!result.cells_balanced);
        assert_eq!(result.min_voltage, 0.0);
        assert_eq!(result.max_voltage, 0.0);
        assert!(result.messages.iter().any(|m| m.contains("No live cells")));
    }

    #[test]
    fn empty_reading() {
        let result = run_pre_check(&[], &nmc(), &TestConfig::default());
        assert!(!result.passed());
        assert_eq!(result.cell_count, 0);
        assert_eq!(result.messages.len(), 1);
    }
}
