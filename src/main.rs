use anyhow::{Context, Result};
use bmstest_lib::serialport::BmsClient;
use bmstest_lib::{health, precheck, TestConfig};
use clap::Parser;
use commandline::{CliArgs, CliCommands};
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::path::Path;
use std::{ops::Deref, panic};

mod commandline;
mod monitor;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn load_config(path: &Path) -> Result<TestConfig> {
    if !path.exists() {
        info!(
            "Config file '{}' not found, using built-in defaults",
            path.display()
        );
        return Ok(TestConfig::default());
    }
    let config = TestConfig::load(path)
        .with_context(|| format!("Cannot load config file '{}'", path.display()))?;
    debug!("Loaded config from {}: {config:?}", path.display());
    Ok(config)
}

macro_rules! print_basic_info {
    ($bms:expr) => {{
        let info = $bms
            .get_basic_info()
            .with_context(|| "Cannot get basic info")?;
        println!(
            "Pack: {:.2} V, {:.2} A, SoC {}%",
            f64::from(info.total_voltage_mv) / 1000.0,
            f64::from(info.current_ma) / 1000.0,
            info.rsoc_percent
        );
        println!(
            "Capacity: {:.2} / {:.2} Ah, cycles {}",
            f64::from(info.residual_capacity_mah) / 1000.0,
            f64::from(info.nominal_capacity_mah) / 1000.0,
            info.cycle_count
        );
        println!(
            "Cells: {}, FET charge={} discharge={}",
            info.cell_count,
            info.charge_fet_on(),
            info.discharge_fet_on()
        );
        println!("Temperatures: {:.1?} °C", info.temperatures_c);
        let protections = info.protections();
        if protections.is_empty() {
            println!("Protections: none");
        }
        for flag in protections {
            println!("Protection: {flag}");
        }
    }};
}
macro_rules! read_cell_voltages {
    ($bms:expr) => {
        $bms.get_cell_voltages()
            .with_context(|| "Cannot get cell voltages")?
    };
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let config = load_config(&args.config_file)?;

    let mut bms = BmsClient::new(&args.device, args.baud)
        .with_context(|| format!("Cannot open serial port '{}'", args.device))?;
    bms.set_timeout(args.timeout)?;
    bms.set_delay(args.delay);

    match args.command {
        CliCommands::BasicInfo => print_basic_info!(bms),
        CliCommands::CellVoltages => {
            let voltages = read_cell_voltages!(bms);
            for (i, v) in voltages.iter().enumerate() {
                println!("Cell {:2}: {v:.3} V", i + 1);
            }
        }
        CliCommands::Version => println!(
            "Version: {}",
            bms.get_version().with_context(|| "Cannot get version")?
        ),
        CliCommands::Health { chemistry } => {
            let voltages = read_cell_voltages!(bms);
            let profile = config.profile(chemistry.unwrap_or(config.default_chemistry));
            let status = health::current_health_status(&voltages, &profile, &config);
            println!(
                "Health: {} (avg {:.3} V, spread {:.3} V, min {:.3} V, max {:.3} V)",
                status.overall,
                status.avg_voltage,
                status.spread,
                status.min_voltage,
                status.max_voltage
            );
            for issue in &status.issues {
                println!("{:?}: {}", issue.severity, issue.message);
            }
        }
        CliCommands::PreCheck { chemistry } => {
            let voltages = read_cell_voltages!(bms);
            let profile = config.profile(chemistry.unwrap_or(config.default_chemistry));
            let result = precheck::run_pre_check(&voltages, &profile, &config);
            for message in &result.messages {
                println!("{message}");
            }
            println!(
                "Pre-check {} for {}",
                if result.passed() { "passed" } else { "failed" },
                profile.name
            );
        }
        CliCommands::Mosfet { charge, discharge } => bms
            .set_mosfets(charge, discharge)
            .with_context(|| "Cannot set mosfets")?,
        CliCommands::Run(run_args) => {
            monitor::run(&mut bms, config, run_args)?;
        }
    }

    Ok(())
}
