// src/main.rs
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use serde::Deserialize;
use lcr_sweep::config::{HardwareProfile, SweepConfig};
use lcr_sweep::drivers::{LoadModel, SimulatedBench, SweepController};
use lcr_sweep::types::SweepResultTable;
/// Everything the bench binary reads from its JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BenchConfig {
    profile: HardwareProfile,
    sweep: SweepConfig,
    /// Device under test on the simulated fixture.
    load: LoadModel,
    /// Uniform ADC noise in counts.
    noise_counts: f64,
}
fn load_config(path: &Path) -> Result<BenchConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading bench config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing bench config {}", path.display()))
}
// 从终端读取 y/n
fn console_confirm(prompt: &str) -> bool {
    print!("{prompt} ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => line.trim().eq_ignore_ascii_case("y"),
        Err(e) => {
            warn!("could not read answer: {e}");
            false
        }
    }
}
fn print_table(table: &SweepResultTable) {
    println!(
        "{:>14} {:>14} {:>14} {:>14} {:>10} {:>7}",
        "freq [Hz]", "R [ohm]", "X [ohm]", "|Z| [ohm]", "phase", "passes"
    );
    for r in table.iter() {
        println!(
            "{:>14.3} {:>14.4} {:>14.4} {:>14.4} {:>10.3} {:>7}",
            r.frequency_hz,
            r.mean_real_ohms,
            r.mean_imag_ohms,
            r.magnitude_ohms(),
            r.phase_deg(),
            r.passes
        );
    }
    for f in table.skipped() {
        println!("{f:>14.3} skipped (no acquisition)");
    }
}
// 入口函数
fn main() -> Result<()> {
    env_logger::init();
    let mut json = false;
    let mut config_path = None;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--json" => json = true,
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            path => config_path = Some(path.to_owned()),
        }
    }
    let bench_config = match &config_path {
        Some(path) => load_config(Path::new(path))?,
        None => BenchConfig {
            load: LoadModel::resistor(4700.0),
            ..BenchConfig::default()
        },
    };
    let BenchConfig {
        profile,
        sweep,
        load,
        noise_counts,
    } = bench_config;
    let calibrate = sweep.calibration;
    let shunt_ohms = sweep.shunt_resistance_ohms;
    let sweep = sweep
        .validate(&profile)
        .context("invalid sweep configuration")?;
    let bench = SimulatedBench::new(profile, load, shunt_ohms)
        .with_noise(noise_counts, 0x1c2)
        .with_dc_bias(sweep.config().dc_bias_volts);
    let mut controller = SweepController::new(bench.generator(), bench.scope());
    controller.init().context("bringing up the bench")?;
    let short = if calibrate {
        bench.set_load(LoadModel::short());
        let mut gate = console_confirm;
        let short = controller
            .run_calibration(&mut gate, &sweep)
            .context("short-circuit calibration")?;
        bench.set_load(load);
        Some(short)
    } else {
        None
    };
    let measured = controller.run_sweep(&sweep).context("measurement sweep")?;
    let table = match &short {
        Some(short) => measured.corrected_by(short).context("applying calibration")?,
        None => measured,
    };
    info!("{} point(s) measured", table.len());
    if json {
        println!("{}", serde_json::to_string_pretty(&table)?);
    } else {
        print_table(&table);
    }
    Ok(())
}
