use crate::chemistry::{Chemistry, ChemistryProfile};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Pack and threshold settings shared by every session of a test station.
///
/// Every field has a default, so a YAML file only needs the values it changes:
///
/// ```yaml
/// expected_cell_count: 16
/// default_chemistry: LiFePO4
/// imbalance_warning_v: 0.05
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Number of cells a complete pack reports.
    pub expected_cell_count: usize,
    pub default_chemistry: Chemistry,
    /// Measured capacity must reach this share of the rated one to pass.
    pub default_pass_threshold_pct: f64,
    /// Cells below this voltage are treated as dead and left out of the statistics.
    pub dead_cell_voltage: f64,
    /// Spread above this value blocks the start and raises a warning.
    pub imbalance_warning_v: f64,
    /// Deviation from the average at or above this value is an imbalance alert.
    pub imbalance_alert_v: f64,
    /// Moving average over this many raw samples; 1 records raw values.
    pub smoothing_window: usize,
    /// Stop the test when the BMS reports cell undervoltage protection.
    pub auto_stop_on_protection: bool,
    /// Overrides for the built-in chemistry table.
    pub chemistries: BTreeMap<Chemistry, Arc<ChemistryProfile>>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            expected_cell_count: 14,
            default_chemistry: Chemistry::Nmc,
            default_pass_threshold_pct: 95.0,
            dead_cell_voltage: 2.0,
            imbalance_warning_v: 0.30,
            imbalance_alert_v: 0.50,
            smoothing_window: 1,
            auto_stop_on_protection: true,
            chemistries: Chemistry::ALL
                .into_iter()
                .map(|c| (c, Arc::new(ChemistryProfile::builtin(c))))
                .collect(),
        }
    }
}

impl TestConfig {
    pub const DEFAULT_CONFIG_FILE: &str = "bmstest.yaml";

    pub fn load<P: AsRef<Path>>(config_file_path: P) -> Result<Self, Error> {
        let path = config_file_path.as_ref();
        log::debug!("Loading config file from {path:?}");
        let config_file = std::fs::File::open(path)?;
        let config: Self = serde_yaml::from_reader(&config_file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.expected_cell_count == 0 {
            return Err(Error::InvalidConfig(
                "expected_cell_count must be at least 1".into(),
            ));
        }
        if self.smoothing_window == 0 {
            return Err(Error::InvalidConfig(
                "smoothing_window must be at least 1".into(),
            ));
        }
        if !(self.default_pass_threshold_pct > 0.0 && self.default_pass_threshold_pct <= 100.0) {
            return Err(Error::InvalidConfig(format!(
                "default_pass_threshold_pct {} outside (0, 100]",
                self.default_pass_threshold_pct
            )));
        }
        if self.imbalance_warning_v > self.imbalance_alert_v {
            return Err(Error::InvalidConfig(format!(
                "imbalance_warning_v {} above imbalance_alert_v {}",
                self.imbalance_warning_v, self.imbalance_alert_v
            )));
        }
        if let Some((key, profile)) = self.chemistries.iter().find(|(k, p)| **k != p.chemistry) {
            return Err(Error::InvalidConfig(format!(
                "profile listed under {key} describes {}",
                profile.chemistry
            )));
        }
        Ok(())
    }

    /// Profile for `chemistry`, falling back to the built-in table.
    pub fn profile(&self, chemistry: Chemistry) -> Arc<ChemistryProfile> {
        self.chemistries
            .get(&chemistry)
            .cloned()
            .unwrap_or_else(|| Arc::new(ChemistryProfile::builtin(chemistry)))
    }

    pub fn default_profile(&self) -> Arc<ChemistryProfile> {
        self.profile(self.default_chemistry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let config = TestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expected_cell_count, 14);
        assert_eq!(config.default_profile().min_start_voltage, 3.60);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = write_config("expected_cell_count: 16\ndefault_chemistry: LiFePO4\n");
        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.expected_cell_count, 16);
        assert_eq!(config.default_chemistry, Chemistry::LiFePo4);
        assert_eq!(config.imbalance_alert_v, 0.50);
        assert_eq!(config.default_profile().name, "LiFePO4");
    }

    #[test]
    fn profile_override_replaces_table() {
        let file = write_config(
            r#"
chemistries:
  NMC:
    chemistry: NMC
    name: NMC Pouch
    storage_voltage: 3.7
    discharge_end_voltage: 3.0
    min_cell_voltage: 2.5
    max_cell_voltage: 4.2
    full_charge_voltage: 4.15
    cell_fail_voltage: 3.1
    min_start_voltage: 3.9
    rated_capacity_ah: 80.0
"#,
        );
        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.profile(Chemistry::Nmc).rated_capacity_ah, 80.0);
        // not listed, so taken from the built-in table
        assert_eq!(config.profile(Chemistry::LiPo).rated_capacity_ah, 46.0);
    }

    #[test]
    fn inconsistent_thresholds_are_refused() {
        let file = write_config("imbalance_warning_v: 0.6\nimbalance_alert_v: 0.5\n");
        assert!(matches!(
            TestConfig::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));

        let file = write_config("smoothing_window: 0\n");
        assert!(matches!(
            TestConfig::load(file.path()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            TestConfig::load("/nonexistent/bmstest.yaml"),
            Err(Error::Io(_))
        ));
    }
}
