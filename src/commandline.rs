use bmstest_lib::{Chemistry, TestConfig};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM1")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Show pack voltage, current, capacities, SoC, cycles, protections and temperatures
    BasicInfo,
    /// Show individual cell voltages
    CellVoltages,
    /// Show the BMS hardware version string
    Version,
    /// Read cell voltages and show the live health summary
    Health {
        /// Chemistry used for the critical voltage limit (default from config)
        #[arg(long, short)]
        chemistry: Option<Chemistry>,
    },
    /// Read cell voltages and run the pre-test check
    PreCheck {
        /// Chemistry used for the minimum start voltage (default from config)
        #[arg(long, short)]
        chemistry: Option<Chemistry>,
    },
    /// Switch the charge and discharge MOSFETs
    Mosfet {
        /// Enable the charge MOSFET. If this flag is not present, it will be disabled.
        #[clap(long, action)]
        charge: bool,
        /// Enable the discharge MOSFET. If this flag is not present, it will be disabled.
        #[clap(long, action)]
        discharge: bool,
    },
    /// Run a capacity test: pre-check, then poll the BMS until stopped
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct RunArgs {
    /// Serial number of the pack under test
    #[arg(long, short)]
    pub serial_number: String,
    /// Battery chemistry (NMC, LiPo, LiFePO4, NCA); default from config
    #[arg(long, short)]
    pub chemistry: Option<Chemistry>,
    /// Rated capacity in Ah; default from the chemistry profile
    #[arg(long)]
    pub rated_capacity: Option<f64>,
    /// Pass threshold in percent of rated capacity; default from config
    #[arg(long)]
    pub pass_threshold: Option<f64>,
    /// Technician initials
    #[arg(long, default_value = "")]
    pub tech: String,
    /// Manufacture date, free text
    #[arg(long, default_value = "")]
    pub mfg_date: String,
    /// Battery age, free text
    #[arg(long, default_value = "")]
    pub battery_age: String,
    /// Stop the test after this duration (e.g., "90m", "2h 30m")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub max_duration: Option<Duration>,
    /// Polling interval
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub interval: Duration,
    /// Abort after this many consecutive failed polls
    #[arg(long, default_value = "5")]
    pub max_failures: u32,
    /// Start even if the pre-check fails
    #[arg(long, action)]
    pub force: bool,
    /// Write the final session as JSON to this file
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

const fn about_text() -> &'static str {
    "battery pack capacity tester for smart BMS packs"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    /// Serial port device path (e.g., /dev/ttyUSB0 on Linux, COM1 on Windows)
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Serial baud rate
    #[arg(short, long, default_value = "9600")]
    pub baud: u32,

    /// Test configuration file; built-in defaults are used if it does not exist
    #[arg(long, default_value = TestConfig::DEFAULT_CONFIG_FILE)]
    pub config_file: PathBuf,

    #[command(subcommand)]
    pub command: CliCommands,

    /// Timeout for serial I/O operations (e.g., "500ms", "1s", "2s 500ms")
    #[arg(value_parser = humantime::parse_duration, long, default_value = "500ms")]
    pub timeout: Duration,

    /// Delay between sending multiple commands to the BMS (e.g., "100ms", "200ms")
    /// (useful for some serial adapters that need time to switch between TX/RX)
    #[arg(value_parser = humantime::parse_duration, long, default_value = "100ms")]
    pub delay: Duration,
}
