use crate::commandline::RunArgs;
use anyhow::{bail, Context, Result};
use bmstest_lib::serialport::BmsClient;
use bmstest_lib::{SessionParams, SharedEngine, TestConfig, TestEngine, TestSession};
use log::{debug, error, info, warn};
use serde_json::json;
use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

const STOP_USER: &str = "User Stopped Manually";
const STOP_MAX_DURATION: &str = "Max Duration Reached";
// basic info is polled on every n-th cycle only
const BASIC_INFO_EVERY: u64 = 2;

/// Pressing enter on the console stops the running test.
fn spawn_stop_listener(engine: SharedEngine) {
    std::thread::spawn(move || {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(n) if n > 0 => engine.write(|e| e.stop_test(STOP_USER)),
            Ok(_) => debug!("stdin closed, stop by keyboard disabled"),
            Err(e) => warn!("Cannot read stdin: {e}"),
        }
    });
}

fn print_status_line(session: &TestSession, runtime: f64) {
    let voltages = session.latest_voltages();
    if voltages.is_empty() {
        println!("{} no sample recorded yet", chrono::Local::now().format("%H:%M:%S"));
        return;
    }
    let (min_v, max_v) = voltages
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    println!(
        "{} {:>11} | {:>8.0} mA | {:.4} Ah ({:5.1}%) | cells {:.3}..{:.3} V",
        chrono::Local::now().format("%H:%M:%S"),
        bmstest_lib::session::format_runtime(runtime),
        session.latest_current_ma(),
        session.calculated_capacity_ah(),
        session.capacity_percent(),
        min_v,
        max_v,
    );
}

fn print_summary(session: &TestSession, runtime: f64) {
    println!("--- Test {} ---", session.status);
    println!("Serial number: {}", session.serial_number);
    println!("Chemistry:     {}", session.chemistry.name);
    println!("Runtime:       {}", bmstest_lib::session::format_runtime(runtime));
    println!("Stop reason:   {}", session.stop_reason);
    println!(
        "Capacity:      {:.3} Ah of {:.1} Ah rated ({:.1}%, pass at {:.0}%)",
        session.calculated_capacity_ah(),
        session.rated_capacity_ah,
        session.capacity_percent(),
        session.pass_threshold_pct
    );
    if let Some(soc) = session.bms_initial_soc {
        println!("BMS start SoC: {soc}% (cycles: {})", session.bms_cycle_count);
    }
    println!("Health events: {}", session.health_events.len());
    println!("Result:        {}", session.result);
}

fn write_snapshot(session: &TestSession, path: &std::path::Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Cannot create output file '{}'", path.display()))?;
    let document = json!({
        "exported_at": chrono::Local::now().to_rfc3339(),
        "session": session,
    });
    serde_json::to_writer_pretty(BufWriter::new(file), &document)
        .with_context(|| format!("Cannot write session to '{}'", path.display()))?;
    info!("Session written to {}", path.display());
    Ok(())
}

pub fn run(bms: &mut BmsClient, config: TestConfig, args: RunArgs) -> Result<TestSession> {
    let chemistry = args.chemistry.unwrap_or(config.default_chemistry);
    let mut params = SessionParams::new(args.serial_number.clone(), chemistry)
        .tech_initials(args.tech.clone())
        .mfg_date(args.mfg_date.clone())
        .battery_age(args.battery_age.clone());
    if let Some(rated) = args.rated_capacity {
        params = params.rated_capacity_ah(rated);
    }
    if let Some(threshold) = args.pass_threshold {
        params = params.pass_threshold_pct(threshold);
    }

    let engine = SharedEngine::new(TestEngine::new(config));
    engine.write(|e| {
        e.new_session(params);
    });

    let voltages = bms
        .get_cell_voltages()
        .with_context(|| "Cannot read cell voltages for the pre-check")?;
    let pre_check = engine.read(|e| e.run_pre_check(&voltages));
    for message in &pre_check.messages {
        println!("Pre-check: {message}");
    }
    if !pre_check.passed() {
        if !args.force {
            bail!("Pre-check failed, use --force to start anyway");
        }
        warn!("Pre-check failed, starting anyway");
    }

    engine.write(|e| e.start_test());
    spawn_stop_listener(engine.clone());
    println!("Test running, press enter to stop");

    let mut cycle: u64 = 0;
    let mut failures: u32 = 0;
    let mut last_current_ma = 0.0;
    loop {
        let loop_start = Instant::now();

        if cycle % BASIC_INFO_EVERY == 0 {
            match bms.get_basic_info() {
                Ok(info) => {
                    debug!("Basic info: {info:?}");
                    last_current_ma = f64::from(info.current_ma);
                    for flag in info.protections() {
                        warn!("BMS protection active: {flag}");
                    }
                    engine.write(|e| e.update_bms_info(&info));
                }
                Err(e) => warn!("Cannot get basic info: {e}"),
            }
        }

        match bms.get_cell_voltages() {
            Ok(voltages) => {
                failures = 0;
                engine.write(|e| e.record_voltage_sample(&voltages, last_current_ma));
            }
            Err(e) => {
                failures += 1;
                error!("Cannot get cell voltages ({failures}/{}): {e}", args.max_failures);
                if failures >= args.max_failures {
                    engine.write(|engine| engine.abort_test(&format!("Connection Lost: {e}")));
                }
            }
        }
        cycle += 1;

        let runtime = engine.read(|e| e.runtime_seconds());
        if let Some(max_duration) = args.max_duration {
            if runtime >= max_duration.as_secs_f64() {
                engine.write(|e| e.stop_test(STOP_MAX_DURATION));
            }
        }

        let Some(status) = engine.status() else {
            bail!("Test session disappeared");
        };
        if status.is_terminal() {
            let (session, runtime) = engine.read(|e| (e.snapshot(), e.runtime_seconds()));
            let session = session.context("Test session disappeared")?;
            print_summary(&session, runtime);
            if let Some(path) = &args.output {
                write_snapshot(&session, path)?;
            }
            return Ok(session);
        }
        engine.read(|e| {
            if let Some(session) = e.session() {
                print_status_line(session, runtime);
            }
        });

        let elapsed = loop_start.elapsed();
        if let Some(remaining) = args.interval.checked_sub(elapsed) {
            std::thread::sleep(remaining);
        } else {
            debug!("Poll cycle took {elapsed:?}, longer than {:?}", args.interval);
        }
    }
}
