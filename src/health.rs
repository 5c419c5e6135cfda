//! Cell health: per-sample event detection for the session log and a
//! stateless point-in-time summary for live display.

use crate::chemistry::ChemistryProfile;
use crate::config::TestConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthEventKind {
    Imbalance,
    Critical,
}

impl fmt::Display for HealthEventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HealthEventKind::Imbalance => write!(f, "IMBALANCE"),
            HealthEventKind::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One entry of the append-only session health log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    /// Seconds since test start.
    pub time: f64,
    pub kind: HealthEventKind,
    /// 1-based cell position.
    pub cell: usize,
    pub voltage: f64,
    pub avg: Option<f64>,
    pub message: String,
}

fn live_average(voltages: &[f64], dead_cell_voltage: f64) -> Option<f64> {
    let (sum, count) = voltages
        .iter()
        .filter(|v| **v >= dead_cell_voltage)
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Events raised by one recorded sample.
///
/// Both checks run for every live cell, so a single cell may yield an
/// imbalance and a critical event in the same sample. Nothing is coalesced.
pub fn check_sample(
    voltages: &[f64],
    timestamp: f64,
    profile: &ChemistryProfile,
    config: &TestConfig,
) -> Vec<HealthEvent> {
    let Some(avg) = live_average(voltages, config.dead_cell_voltage) else {
        return Vec::new();
    };

    let mut events = Vec::new();
    for (i, &v) in voltages.iter().enumerate() {
        if v < config.dead_cell_voltage {
            continue;
        }
        let cell = i + 1;
        let deviation = (v - avg).abs();
        if deviation >= config.imbalance_alert_v {
            events.push(HealthEvent {
                time: timestamp,
                kind: HealthEventKind::Imbalance,
                cell,
                voltage: v,
                avg: Some(avg),
                message: format!("Cell {cell} is {deviation:.3}V from average"),
            });
        }
        if v < profile.cell_fail_voltage {
            events.push(HealthEvent {
                time: timestamp,
                kind: HealthEventKind::Critical,
                cell,
                voltage: v,
                avg: None,
                message: format!("Cell {cell} below {:.2}V", profile.cell_fail_voltage),
            });
        }
    }
    events
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    DeadCell,
    Imbalance,
    SpreadWarning,
    CriticalVoltage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallHealth {
    /// No reading, or no live cell to judge.
    Unknown,
    Normal,
    /// Only medium severity issues.
    Warning,
    /// At least one high severity issue.
    Abnormal,
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OverallHealth::Unknown => write!(f, "UNKNOWN"),
            OverallHealth::Normal => write!(f, "NORMAL"),
            OverallHealth::Warning => write!(f, "WARNING"),
            OverallHealth::Abnormal => write!(f, "ABNORMAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall: OverallHealth,
    pub issues: Vec<HealthIssue>,
    pub avg_voltage: f64,
    pub spread: f64,
    pub min_voltage: f64,
    pub max_voltage: f64,
}

impl HealthStatus {
    fn unknown(issues: Vec<HealthIssue>) -> Self {
        Self {
            overall: OverallHealth::Unknown,
            issues,
            avg_voltage: 0.0,
            spread: 0.0,
            min_voltage: 0.0,
            max_voltage: 0.0,
        }
    }
}

fn cell_list(cells: &[(usize, f64)]) -> String {
    cells
        .iter()
        .map(|(cell, v)| format!("Cell {cell}: {v:.3}V"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Point-in-time health summary; does not touch any session.
pub fn current_health_status(
    voltages: &[f64],
    profile: &ChemistryProfile,
    config: &TestConfig,
) -> HealthStatus {
    if voltages.is_empty() {
        return HealthStatus::unknown(Vec::new());
    }

    let dead_limit = config.dead_cell_voltage;
    let Some(avg) = live_average(voltages, dead_limit) else {
        return HealthStatus::unknown(vec![HealthIssue {
            kind: IssueKind::DeadCell,
            severity: Severity::High,
            message: "No live cells detected".to_string(),
        }]);
    };

    let cells: Vec<(usize, f64)> = voltages.iter().enumerate().map(|(i, v)| (i + 1, *v)).collect();
    let (live, dead): (Vec<(usize, f64)>, Vec<(usize, f64)>) =
        cells.into_iter().partition(|(_, v)| *v >= dead_limit);
    let min_v = live.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max_v = live.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    let spread = max_v - min_v;

    let mut issues = Vec::new();
    if !dead.is_empty() {
        issues.push(HealthIssue {
            kind: IssueKind::DeadCell,
            severity: Severity::High,
            message: format!("Dead cell(s) detected: {}", cell_list(&dead)),
        });
    }

    let imbalanced: Vec<usize> = live
        .iter()
        .filter(|(_, v)| (v - avg).abs() >= config.imbalance_alert_v)
        .map(|(cell, _)| *cell)
        .collect();
    if !imbalanced.is_empty() {
        issues.push(HealthIssue {
            kind: IssueKind::Imbalance,
            severity: Severity::High,
            message: format!(
                "Cell(s) {imbalanced:?} are {:.2}V+ from average",
                config.imbalance_alert_v
            ),
        });
    }

    if config.imbalance_warning_v < spread && spread < config.imbalance_alert_v {
        issues.push(HealthIssue {
            kind: IssueKind::SpreadWarning,
            severity: Severity::Medium,
            message: format!("Voltage spread: {spread:.3}V"),
        });
    }

    let critical: Vec<(usize, f64)> = live
        .iter()
        .copied()
        .filter(|(_, v)| *v < profile.cell_fail_voltage)
        .collect();
    if !critical.is_empty() {
        issues.push(HealthIssue {
            kind: IssueKind::CriticalVoltage,
            severity: Severity::High,
            message: format!(
                "Below {:.2}V: {}",
                profile.cell_fail_voltage,
                cell_list(&critical)
            ),
        });
    }

    let overall = match issues.iter().map(|i| i.severity).max() {
        None => OverallHealth::Normal,
        Some(Severity::Medium) => OverallHealth::Warning,
        Some(Severity::High) => OverallHealth::Abnormal,
    };

    HealthStatus {
        overall,
        issues,
        avg_voltage: avg,
        spread,
        min_voltage: min_v,
        max_voltage: max_v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chemistry::Chemistry;

    fn nmc() -> ChemistryProfile {
        ChemistryProfile::builtin(Chemistry::Nmc)
    }

    #[test]
    fn uniform_pack_raises_nothing() {
        let config = TestConfig::default();
        assert!(check_sample(&[3.8; 14], 1.0, &nmc(), &config).is_empty());
        let status = current_health_status(&[3.8; 14], &nmc(), &config);
        assert_eq!(status.overall, OverallHealth::Normal);
        assert!(status.issues.is_empty());
    }

    #[test]
    fn low_cell_raises_imbalance() {
        let config = TestConfig::default();
        let mut voltages = vec![4.0; 14];
        voltages[13] = 3.4;
        let events = check_sample(&voltages, 12.0, &nmc(), &config);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, HealthEventKind::Imbalance);
        assert_eq!(events[0].cell, 14);
        assert_eq!(events[0].time, 12.0);
        assert!(events[0].avg.is_some());
    }

    #[test]
    fn one_cell_can_raise_both_events() {
        let config = TestConfig::default();
        let mut voltages = vec![3.8; 14];
        voltages[0] = 2.9;
        let events = check_sample(&voltages, 0.0, &nmc(), &config);
        let kinds: Vec<_> = events.iter().map(|e| (e.cell, e.kind)).collect();
        assert_eq!(
            kinds,
            vec![(1, HealthEventKind::Imbalance), (1, HealthEventKind::Critical)]
        );
    }

    #[test]
    fn dead_cells_are_skipped_by_events() {
        let config = TestConfig::default();
        let mut voltages = vec![3.8; 14];
        voltages[4] = 0.2;
        assert!(check_sample(&voltages, 0.0, &nmc(), &config).is_empty());
        assert!(check_sample(&[0.1; 14], 0.0, &nmc(), &config).is_empty());
    }

    #[test]
    fn moderate_spread_is_a_warning() {
        let config = TestConfig::default();
        let mut voltages = vec![3.9; 14];
        voltages[3] = 3.5;
        let status = current_health_status(&voltages, &nmc(), &config);
        assert_eq!(status.overall, OverallHealth::Warning);
        assert_eq!(status.issues.len(), 1);
        assert_eq!(status.issues[0].kind, IssueKind::SpreadWarning);
    }

    #[test]
    fn dead_or_critical_cells_are_abnormal() {
        let config = TestConfig::default();
        let mut voltages = vec![3.9; 14];
        voltages[7] = 0.5;
        let status = current_health_status(&voltages, &nmc(), &config);
        assert_eq!(status.overall, OverallHealth::Abnormal);
        assert_eq!(status.issues[0].kind, IssueKind::DeadCell);
        assert!(status.issues[0].message.contains("Cell 8"));

        let status = current_health_status(&[2.95; 14], &nmc(), &config);
        assert_eq!(status.overall, OverallHealth::Abnormal);
        assert_eq!(status.issues[0].kind, IssueKind::CriticalVoltage);
    }

    #[test]
    fn nothing_to_judge_is_unknown() {
        let config = TestConfig::default();
        assert_eq!(
            current_health_status(&[], &nmc(), &config).overall,
            OverallHealth::Unknown
        );
        let status = current_health_status(&[0.0; 14], &nmc(), &config);
        assert_eq!(status.overall, OverallHealth::Unknown);
        assert_eq!(status.issues[0].kind, IssueKind::DeadCell);
    }
}
