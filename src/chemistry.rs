use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Chemistry {
    #[serde(rename = "NMC")]
    Nmc,
    #[serde(rename = "LiPo")]
    LiPo,
    #[serde(rename = "LiFePO4")]
    LiFePo4,
    #[serde(rename = "NCA")]
    Nca,
}

impl Chemistry {
    pub const ALL: [Chemistry; 4] = [
        Chemistry::Nmc,
        Chemistry::LiPo,
        Chemistry::LiFePo4,
        Chemistry::Nca,
    ];
}

impl fmt::Display for Chemistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Chemistry::Nmc => write!(f, "NMC"),
            Chemistry::LiPo => write!(f, "LiPo"),
            Chemistry::LiFePo4 => write!(f, "LiFePO4"),
            Chemistry::Nca => write!(f, "NCA"),
        }
    }
}

impl std::str::FromStr for Chemistry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chemistry::ALL
            .into_iter()
            .find(|c| c.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown chemistry '{s}'"))
    }
}

/// Voltage limits and rated capacity of one cell chemistry. All voltages are
/// per cell, in volts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChemistryProfile {
    pub chemistry: Chemistry,
    pub name: String,
    /// Long-term storage voltage, informational only.
    pub storage_voltage: f64,
    /// Discharge endpoint; the test itself ends on the BMS protection flag.
    pub discharge_end_voltage: f64,
    pub min_cell_voltage: f64,
    pub max_cell_voltage: f64,
    pub full_charge_voltage: f64,
    pub cell_fail_voltage: f64,
    pub min_start_voltage: f64,
    pub rated_capacity_ah: f64,
}

impl ChemistryProfile {
    pub fn builtin(chemistry: Chemistry) -> Self {
        match chemistry {
            Chemistry::Nmc => Self {
                chemistry,
                name: "NMC Prismatic".into(),
                storage_voltage: 3.60,
                discharge_end_voltage: 3.00,
                min_cell_voltage: 2.50,
                max_cell_voltage: 4.20,
                full_charge_voltage: 4.15,
                cell_fail_voltage: 3.00,
                min_start_voltage: 3.60,
                rated_capacity_ah: 62.0,
            },
            Chemistry::LiPo => Self {
                chemistry,
                name: "LiPo".into(),
                storage_voltage: 3.80,
                discharge_end_voltage: 3.00,
                min_cell_voltage: 2.50,
                max_cell_voltage: 4.20,
                full_charge_voltage: 4.15,
                cell_fail_voltage: 3.00,
                min_start_voltage: 3.00,
                rated_capacity_ah: 46.0,
            },
            Chemistry::LiFePo4 => Self {
                chemistry,
                name: "LiFePO4".into(),
                storage_voltage: 3.30,
                discharge_end_voltage: 2.80,
                min_cell_voltage: 2.50,
                max_cell_voltage: 3.65,
                full_charge_voltage: 3.60,
                cell_fail_voltage: 2.80,
                min_start_voltage: 3.20,
                rated_capacity_ah: 100.0,
            },
            Chemistry::Nca => Self {
                chemistry,
                name: "NCA Cylindrical".into(),
                storage_voltage: 3.60,
                discharge_end_voltage: 3.00,
                min_cell_voltage: 2.50,
                max_cell_voltage: 4.20,
                full_charge_voltage: 4.15,
                cell_fail_voltage: 3.00,
                min_start_voltage: 3.60,
                rated_capacity_ah: 50.0,
            },
        }
    }
}
